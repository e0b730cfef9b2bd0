//! Chunk request construction and response classification.

use reqwest::{Client, RequestBuilder, StatusCode};

use crate::discovery::parse_content_range_total;

/// Appends a cache-busting `_t=<unix-ms>` query parameter to `url`,
/// defeating intermediate caches and stale keep-alive connections.
pub fn cache_busted_url(url: &str, now_unix_ms: u64) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}_t={now_unix_ms}")
}

/// Builds the GET request for one chunk. Attaches `Range: bytes=start-end`
/// (inclusive) when `supports_resume` is true.
pub fn build_chunk_request(
    client: &Client,
    url: &str,
    now_unix_ms: u64,
    start: u64,
    end: u64,
    supports_resume: bool,
) -> RequestBuilder {
    let request = client.get(cache_busted_url(url, now_unix_ms));
    if supports_resume {
        request.header("Range", format!("bytes={start}-{end}"))
    } else {
        request
    }
}

/// How a chunk response's status should be handled by the chunk loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// `206 Partial Content` — the expected path for a ranged request.
    Partial,
    /// `200 OK` to a request that asked for `start == 0` — the whole
    /// resource arrived and should be treated as the single chunk.
    FullBodyAtStart,
    /// `200 OK` to a request that asked for `start > 0` — the server
    /// silently ignored the range and served the entire resource again.
    FullBodyMidStream,
    /// `5xx` — retryable.
    Retryable,
    /// Any other non-success status — terminal.
    Fatal,
}

/// Classifies `status` given whether this request's range began at byte 0.
pub fn classify_chunk_status(status: StatusCode, start: u64) -> ChunkOutcome {
    if status == StatusCode::PARTIAL_CONTENT {
        ChunkOutcome::Partial
    } else if status == StatusCode::OK {
        if start == 0 {
            ChunkOutcome::FullBodyAtStart
        } else {
            ChunkOutcome::FullBodyMidStream
        }
    } else if status.is_server_error() {
        ChunkOutcome::Retryable
    } else {
        ChunkOutcome::Fatal
    }
}

/// Extracts `total_bytes` from a `Content-Range: bytes a-b/total` header,
/// if present.
pub fn content_range_total(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("content-range")
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_busting_appends_a_query_param_with_no_existing_query() {
        assert_eq!(
            cache_busted_url("http://h/f.bin", 1234),
            "http://h/f.bin?_t=1234"
        );
    }

    #[test]
    fn cache_busting_joins_an_existing_query_string() {
        assert_eq!(
            cache_busted_url("http://h/f.bin?a=1", 1234),
            "http://h/f.bin?a=1&_t=1234"
        );
    }

    #[test]
    fn classifies_partial_content_as_partial() {
        assert_eq!(
            classify_chunk_status(StatusCode::PARTIAL_CONTENT, 0),
            ChunkOutcome::Partial
        );
    }

    #[test]
    fn classifies_200_at_start_as_full_body_at_start() {
        assert_eq!(
            classify_chunk_status(StatusCode::OK, 0),
            ChunkOutcome::FullBodyAtStart
        );
    }

    #[test]
    fn classifies_200_mid_stream_as_full_body_mid_stream() {
        assert_eq!(
            classify_chunk_status(StatusCode::OK, 10_485_760),
            ChunkOutcome::FullBodyMidStream
        );
    }

    #[test]
    fn classifies_5xx_as_retryable() {
        assert_eq!(
            classify_chunk_status(StatusCode::SERVICE_UNAVAILABLE, 0),
            ChunkOutcome::Retryable
        );
        assert_eq!(
            classify_chunk_status(StatusCode::INTERNAL_SERVER_ERROR, 0),
            ChunkOutcome::Retryable
        );
    }

    #[test]
    fn classifies_4xx_as_fatal() {
        assert_eq!(
            classify_chunk_status(StatusCode::NOT_FOUND, 0),
            ChunkOutcome::Fatal
        );
    }
}
