//! Durable chunk store: per-resource metadata and per-chunk blobs.
//!
//! This crate has no knowledge of HTTP or of the task state machine; it is
//! a thin, transactional key/value layer over SQLite.

mod error;
mod store;
mod types;

pub use error::StoreError;
pub use store::ChunkStore;
pub use types::{ChunkRecord, TaskMetadata};
