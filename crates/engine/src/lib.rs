//! The per-resource download engine: capability discovery, chunked
//! transfer, retry/backoff, and assembly.

mod discovery;
mod error;
mod events;
mod http;
mod sizing;
mod state;
mod task;

pub use error::DownloadError;
pub use events::{CompletePayload, EventEmitter, HandlerId, ProgressPayload, TaskEvent};
pub use sizing::{calculate_chunk_size, MAX_CHUNK, MIN_CHUNK, TARGET_CHUNKS};
pub use state::TaskState;
pub use task::DownloadTask;
