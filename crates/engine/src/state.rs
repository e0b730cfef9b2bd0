//! The per-task state machine.

/// One value of a [`crate::DownloadTask`]'s observable state.
///
/// `Completed` and `Canceled` are terminal: no further transition leaves
/// them without an explicit restart. `Error` is *not* terminal — `start()`
/// may be called again to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Idle,
    FetchingMetadata,
    Downloading,
    Paused,
    Assembling,
    Completed,
    Error,
    Canceled,
}

impl TaskState {
    /// Terminal states admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Canceled)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskState::Idle => "idle",
            TaskState::FetchingMetadata => "fetching_metadata",
            TaskState::Downloading => "downloading",
            TaskState::Paused => "paused",
            TaskState::Assembling => "assembling",
            TaskState::Completed => "completed",
            TaskState::Error => "error",
            TaskState::Canceled => "canceled",
        };
        f.write_str(label)
    }
}
