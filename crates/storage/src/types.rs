//! Row types exchanged with the chunk store.

/// Per-resource metadata persisted while a download is in progress.
///
/// Primary key is [`TaskMetadata::url`]. `downloaded_bytes <= total_bytes`
/// whenever `total_bytes > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMetadata {
    pub url: String,
    pub filename: String,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    pub supports_resume: bool,
    pub chunk_size: u64,
}

/// A single stored chunk: its ordinal index and payload bytes.
pub type ChunkRecord = (u64, Vec<u8>);
