//! Error kinds surfaced by a [`crate::DownloadTask`].

use storage::StoreError;

/// Distinguishable failure classes for a download task.
///
/// `Network` and `Http` with `status >= 500` are retryable inside the task;
/// every other variant is terminal and is surfaced to observers via
/// [`crate::events::TaskEvent::Error`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum DownloadError {
    /// Transport-level failure (connection reset, DNS, timeout, ...).
    #[error("network error: {0}")]
    Network(String),

    /// Server returned a non-2xx, non-206 status.
    #[error("http error {status}: {text}")]
    Http { status: u16, text: String },

    /// A required capability (byte ranges, or a `Content-Range` header
    /// needed to learn the resource size) was not provided by the server.
    #[error("server does not support the required capability: {0}")]
    UnsupportedServer(String),

    /// Final assembly failed: a missing chunk, or a size mismatch against
    /// the known `total_bytes`.
    #[error("assembly failed: {0}")]
    Assembly(String),

    /// The chunk store's backing medium is full.
    #[error("storage quota exceeded")]
    Quota,

    /// Any other unexpected condition.
    #[error("{0}")]
    Generic(String),
}

impl DownloadError {
    /// Whether this error is retried internally by the chunk loop rather
    /// than surfaced as a terminal `error` event.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) => true,
            DownloadError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Whether this is the network-class failure that makes a task eligible
    /// for platform-driven re-entry: tasks currently in `error` whose most
    /// recent failure was network-class may be retried once connectivity
    /// returns.
    pub fn is_network_class(&self) -> bool {
        matches!(self, DownloadError::Network(_))
    }
}

impl From<StoreError> for DownloadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded => DownloadError::Quota,
            StoreError::StorageFailure(msg) => DownloadError::Generic(msg),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Network(err.to_string())
    }
}
