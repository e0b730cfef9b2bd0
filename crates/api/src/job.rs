//! Aggregates a fixed set of tasks, exposing combined progress and
//! completion.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use engine::{DownloadError, DownloadTask, EventEmitter, HandlerId, TaskEvent};

/// One job-level lifecycle event.
#[derive(Debug, Clone)]
pub enum JobEvent {
    /// Aggregate progress across every task in the job.
    Progress { loaded: u64, total: u64, percent: f64 },
    /// Echoes a single task's own `progress` event, tagged with its index.
    TaskProgress { index: usize, loaded: u64, total: u64 },
    /// One task reached `completed`.
    TaskComplete { index: usize },
    /// One task reached `error`.
    TaskError { index: usize, kind: DownloadError },
    /// Every task has reached a terminal state (completed or errored).
    Complete,
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::Progress { .. } => "progress",
            JobEvent::TaskProgress { .. } => "taskProgress",
            JobEvent::TaskComplete { .. } => "taskComplete",
            JobEvent::TaskError { .. } => "taskError",
            JobEvent::Complete => "complete",
        }
    }
}

impl EventEmitter<JobEvent> {
    pub fn emit_event(&self, event: JobEvent) {
        self.emit(event.name(), &event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct TaskSlot {
    loaded: u64,
    total: u64,
}

/// Owns a fixed set of [`DownloadTask`]s and republishes their progress and
/// completion as job-level events.
///
/// A `Job` never calls `start`/`pause`/`resume`/`cancel` on its tasks; that
/// belongs to whatever drives the tasks externally (typically
/// [`crate::Scheduler`]).
pub struct Job {
    tasks: Vec<Arc<DownloadTask>>,
    progress: Mutex<Vec<TaskSlot>>,
    completed: AtomicUsize,
    errored: AtomicUsize,
    events: EventEmitter<JobEvent>,
}

impl Job {
    /// Builds a job from parallel `urls`/`filenames` arrays of equal
    /// length, materializing one [`DownloadTask`] per entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        urls: Vec<String>,
        filenames: Vec<String>,
        dest_dir: impl Into<std::path::PathBuf>,
        client: reqwest::Client,
        store: storage::ChunkStore,
        network: Arc<dyn platform::NetworkMonitor>,
    ) -> Arc<Self> {
        assert_eq!(
            urls.len(),
            filenames.len(),
            "urls and filenames must be the same length"
        );
        let dest_dir = dest_dir.into();
        let tasks: Vec<Arc<DownloadTask>> = urls
            .into_iter()
            .zip(filenames)
            .map(|(url, filename)| {
                DownloadTask::new(
                    url,
                    filename,
                    dest_dir.clone(),
                    client.clone(),
                    store.clone(),
                    Arc::clone(&network),
                )
            })
            .collect();

        let n = tasks.len();
        let job = Arc::new(Self {
            tasks,
            progress: Mutex::new(vec![TaskSlot::default(); n]),
            completed: AtomicUsize::new(0),
            errored: AtomicUsize::new(0),
            events: EventEmitter::new(),
        });
        job.attach_listeners();
        job
    }

    pub fn tasks(&self) -> &[Arc<DownloadTask>] {
        &self.tasks
    }

    pub fn on<F>(&self, event_name: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&JobEvent) + Send + Sync + 'static,
    {
        self.events.on(event_name, handler)
    }

    pub fn off(&self, event_name: &str, id: HandlerId) {
        self.events.off(event_name, id);
    }

    pub fn clear_listeners(&self) {
        self.events.clear();
    }

    fn attach_listeners(self: &Arc<Self>) {
        for (index, task) in self.tasks.iter().enumerate() {
            let weak = Arc::downgrade(self);
            task.on("progress", move |event| {
                let TaskEvent::Progress(payload) = event else {
                    return;
                };
                if let Some(job) = weak.upgrade() {
                    job.on_task_progress(index, payload.loaded, payload.total);
                }
            });

            let weak = Arc::downgrade(self);
            task.on("complete", move |_event| {
                if let Some(job) = weak.upgrade() {
                    job.on_task_complete(index);
                }
            });

            let weak = Arc::downgrade(self);
            task.on("error", move |event| {
                let TaskEvent::Error(kind) = event else {
                    return;
                };
                if let Some(job) = weak.upgrade() {
                    job.on_task_error(index, kind.clone());
                }
            });
        }
    }

    fn on_task_progress(&self, index: usize, loaded: u64, total: u64) {
        let (job_loaded, job_total) = {
            let mut progress = self.progress.lock().unwrap();
            progress[index] = TaskSlot { loaded, total };
            progress.iter().fold((0u64, 0u64), |(l, t), slot| {
                (l + slot.loaded, t + slot.total)
            })
        };
        let percent = if job_total > 0 {
            100.0 * job_loaded as f64 / job_total as f64
        } else {
            0.0
        };
        self.events.emit_event(JobEvent::Progress {
            loaded: job_loaded,
            total: job_total,
            percent,
        });
        self.events
            .emit_event(JobEvent::TaskProgress { index, loaded, total });
    }

    fn on_task_complete(&self, index: usize) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.events.emit_event(JobEvent::TaskComplete { index });
        self.check_terminal();
    }

    fn on_task_error(&self, index: usize, kind: DownloadError) {
        self.errored.fetch_add(1, Ordering::SeqCst);
        self.events.emit_event(JobEvent::TaskError { index, kind });
        self.check_terminal();
    }

    fn check_terminal(&self) {
        let done = self.completed.load(Ordering::SeqCst) + self.errored.load(Ordering::SeqCst);
        if done == self.tasks.len() {
            tracing::info!(
                completed = self.completed.load(Ordering::SeqCst),
                errored = self.errored.load(Ordering::SeqCst),
                "job finished"
            );
            self.events.emit_event(JobEvent::Complete);
        }
    }
}
