//! Chunk sizing.

/// Target number of chunks a resource of known size is split into.
pub const TARGET_CHUNKS: u64 = 50;

/// Smallest allowed chunk size.
pub const MIN_CHUNK: u64 = 10 * 1024 * 1024;

/// Largest allowed chunk size.
pub const MAX_CHUNK: u64 = 100 * 1024 * 1024;

/// Computes the fixed chunk size for a resource.
///
/// `chunk_size` is committed to metadata once and reused verbatim on
/// resumption; callers must not recompute it mid-download.
pub fn calculate_chunk_size(total_bytes: u64) -> u64 {
    if total_bytes == 0 {
        return MIN_CHUNK;
    }
    let target = total_bytes.div_ceil(TARGET_CHUNKS);
    target.clamp(MIN_CHUNK, MAX_CHUNK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_size_uses_min_chunk() {
        assert_eq!(calculate_chunk_size(0), MIN_CHUNK);
    }

    #[test]
    fn small_file_clamps_to_min_chunk() {
        assert_eq!(calculate_chunk_size(7), MIN_CHUNK);
        assert_eq!(calculate_chunk_size(MIN_CHUNK), MIN_CHUNK);
    }

    #[test]
    fn huge_file_clamps_to_max_chunk() {
        // 50 * MAX_CHUNK would divide evenly to MAX_CHUNK; go well beyond it.
        let total = TARGET_CHUNKS * MAX_CHUNK * 10;
        assert_eq!(calculate_chunk_size(total), MAX_CHUNK);
    }

    #[test]
    fn mid_size_file_divides_into_target_chunks() {
        let total = 500_000_000u64; // comfortably between MIN*50 and MAX*50
        let expected = total.div_ceil(TARGET_CHUNKS);
        assert_eq!(calculate_chunk_size(total), expected);
        assert!(expected >= MIN_CHUNK && expected <= MAX_CHUNK);
    }
}
