//! Errors surfaced by the chunk store.

/// Failure modes the chunk store can report to callers.
///
/// Every other backend failure (corruption, I/O, pool exhaustion) collapses
/// into [`StoreError::StorageFailure`]; only out-of-space is distinguished,
/// since the download task and its callers react to it differently.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing storage medium is full.
    #[error("storage quota exceeded")]
    QuotaExceeded,

    /// Any other backend failure (I/O, corruption, pool exhaustion, ...).
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

/// Classifies a raw `sqlx` error into the store's narrower error kind.
///
/// SQLite reports a full disk/quota as primary result code `SQLITE_FULL`
/// (13) or `SQLITE_IOERR` variants carrying "full" in their message; both
/// are treated as [`StoreError::QuotaExceeded`].
pub(crate) fn classify_sqlx_error(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        let is_full = db_err.code().as_deref() == Some("13")
            || db_err.message().to_lowercase().contains("full");
        if is_full {
            tracing::warn!(error = %db_err.message(), "storage quota exceeded");
            return StoreError::QuotaExceeded;
        }
    }
    StoreError::StorageFailure(err.to_string())
}
