//! Scheduler-level errors.

/// Failures returned by [`crate::Scheduler`] operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SchedulerError {
    /// `add()` was called with a task already queued or active.
    #[error("task is already queued or active")]
    AlreadyScheduled,

    /// `add()` was called with a task already in a terminal state.
    #[error("task is in a terminal state")]
    TaskTerminal,

    /// `resume_job()` was called on a task that is not `paused`.
    #[error("task is not paused")]
    TaskNotPaused,

    /// `resume_job()` found no free concurrency slot; the task was left at
    /// the head of the queue.
    #[error("no free concurrency slot")]
    NoFreeSlot,
}
