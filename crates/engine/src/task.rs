//! The per-resource download engine.
//!
//! `DownloadTask` owns one in-flight HTTP request at a time, discovers
//! server capabilities, splits the resource into chunks, writes each to the
//! chunk store, retries transient failures, and assembles the final
//! artifact. The chunk loop runs inside a single spawned `tokio` task per
//! `DownloadTask` at a time; `pause`, `resume` and `cancel` signal that loop
//! through a `watch` channel rather than touching its state directly.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, Response};
use tokio::sync::watch;

use crate::discovery::{self, Capabilities};
use crate::error::DownloadError;
use crate::events::{CompletePayload, EventEmitter, HandlerId, ProgressPayload, TaskEvent};
use crate::http::{self, ChunkOutcome};
use crate::sizing::calculate_chunk_size;
use crate::state::TaskState;
use storage::{ChunkStore, TaskMetadata};

const MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Run,
    PauseRequested,
    CancelRequested,
}

/// Where the chunk loop stands between suspension points. Rebuilt from
/// stored metadata on every `start()`/`resume()` entry — nothing here
/// survives a loop exit, since the store is the only durable state.
#[derive(Debug, Clone)]
struct ChunkCursor {
    total_bytes: u64,
    downloaded_bytes: u64,
    supports_resume: bool,
    chunk_size: u64,
    chunk_index: u64,
    retry_count: u32,
}

enum ChunkStep {
    Continue,
    Done,
    PreEmpted,
}

enum StreamOutcome {
    Body(Vec<u8>),
    PreEmpted,
}

enum RetryOutcome {
    Retry,
    PreEmpted(Control),
    Exhausted(DownloadError),
}

/// Drives one resource from URL to assembled file on disk.
///
/// Always held behind an `Arc` — the control methods spawn a background
/// task that needs to outlive the call that triggered it.
pub struct DownloadTask {
    url: String,
    filename: String,
    dest_dir: PathBuf,
    client: Client,
    store: ChunkStore,
    network: Arc<dyn platform::NetworkMonitor>,
    state: Mutex<TaskState>,
    control: watch::Sender<Control>,
    loop_running: AtomicBool,
    events: EventEmitter<TaskEvent>,
}

impl DownloadTask {
    pub fn new(
        url: impl Into<String>,
        filename: impl Into<String>,
        dest_dir: impl Into<PathBuf>,
        client: Client,
        store: ChunkStore,
        network: Arc<dyn platform::NetworkMonitor>,
    ) -> Arc<Self> {
        let (control, _) = watch::channel(Control::Run);
        Arc::new(Self {
            url: url.into(),
            filename: filename.into(),
            dest_dir: dest_dir.into(),
            client,
            store,
            network,
            state: Mutex::new(TaskState::Idle),
            control,
            loop_running: AtomicBool::new(false),
            events: EventEmitter::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock().unwrap()
    }

    /// Subscribes `handler` to `event_name`. See [`TaskEvent::name`] for the
    /// event names emitted by this task.
    pub fn on<F>(&self, event_name: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.events.on(event_name, handler)
    }

    pub fn off(&self, event_name: &str, id: HandlerId) {
        self.events.off(event_name, id);
    }

    pub fn clear_listeners(&self) {
        self.events.clear();
    }

    /// Starts (or retries) the task. No-op unless the current state is
    /// `idle` or `error`.
    pub fn start(self: &Arc<Self>) {
        if !matches!(self.state(), TaskState::Idle | TaskState::Error) {
            return;
        }
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.control.send_replace(Control::Run);
        self.events.emit_event(TaskEvent::Start);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive().await;
            this.loop_running.store(false, Ordering::SeqCst);
        });
    }

    /// Requests that the in-flight chunk request be aborted and the task
    /// parked in `paused`. No-op unless currently `downloading`.
    pub fn pause(&self) {
        if self.state() != TaskState::Downloading {
            return;
        }
        let _ = self.control.send_replace(Control::PauseRequested);
    }

    /// Resumes a paused task, driving the next chunk. No-op unless
    /// currently `paused`.
    pub fn resume(self: &Arc<Self>) {
        if self.state() != TaskState::Paused {
            return;
        }
        if self.loop_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.control.send_replace(Control::Run);
        self.events.emit_event(TaskEvent::Resume);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drive().await;
            this.loop_running.store(false, Ordering::SeqCst);
        });
    }

    /// Cancels the task from any non-terminal state. Transitions state
    /// immediately; the in-flight request (if any) is pre-empted by the
    /// control signal; the store is purged asynchronously.
    pub fn cancel(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.set_state(TaskState::Canceled);
        self.events.emit_event(TaskEvent::Cancel);
        let _ = self.control.send_replace(Control::CancelRequested);

        let store = self.store.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(err) = store.purge(&url).await {
                tracing::warn!(url, error = %err, "purge after cancel failed");
            }
        });
    }

    fn set_state(&self, new_state: TaskState) {
        let previous = {
            let mut state = self.state.lock().unwrap();
            let previous = *state;
            *state = new_state;
            previous
        };
        tracing::debug!(url = %self.url, from = %previous, to = %new_state, "task state transition");
        self.events.emit_event(TaskEvent::StateChange { new_state });
    }

    fn emit_progress(&self, loaded: u64, total: u64) {
        if total == 0 {
            return;
        }
        let percent = 100.0 * loaded as f64 / total as f64;
        self.events
            .emit_event(TaskEvent::Progress(ProgressPayload {
                loaded,
                total,
                percent,
            }));
    }

    async fn persist_metadata(&self, ctx: &ChunkCursor) -> Result<(), DownloadError> {
        self.store
            .put_metadata(&TaskMetadata {
                url: self.url.clone(),
                filename: self.filename.clone(),
                total_bytes: ctx.total_bytes,
                downloaded_bytes: ctx.downloaded_bytes,
                supports_resume: ctx.supports_resume,
                chunk_size: ctx.chunk_size,
            })
            .await?;
        Ok(())
    }

    /// Builds a [`ChunkCursor`] either from a stored metadata record
    /// (resumption) or from fresh capability discovery, persisting metadata
    /// in the fresh case so a later `pause`/resume or crash always has
    /// something to resume from.
    async fn enter(self: &Arc<Self>) -> Result<ChunkCursor, DownloadError> {
        if let Some(meta) = self.store.get_metadata(&self.url).await? {
            let chunk_index = meta.downloaded_bytes / meta.chunk_size;
            self.set_state(TaskState::Downloading);
            self.emit_progress(meta.downloaded_bytes, meta.total_bytes);
            return Ok(ChunkCursor {
                total_bytes: meta.total_bytes,
                downloaded_bytes: meta.downloaded_bytes,
                supports_resume: meta.supports_resume,
                chunk_size: meta.chunk_size,
                chunk_index,
                retry_count: 0,
            });
        }

        self.set_state(TaskState::FetchingMetadata);
        let caps = match discovery::discover(&self.client, &self.url).await {
            Ok(caps) => caps,
            Err(err) => {
                tracing::warn!(url = %self.url, error = %err, "capability discovery failed, proceeding degraded");
                Capabilities {
                    total_bytes: 0,
                    supports_resume: false,
                }
            }
        };

        let chunk_size = calculate_chunk_size(caps.total_bytes);
        let ctx = ChunkCursor {
            total_bytes: caps.total_bytes,
            downloaded_bytes: 0,
            supports_resume: caps.supports_resume,
            chunk_size,
            chunk_index: 0,
            retry_count: 0,
        };
        self.persist_metadata(&ctx).await?;
        self.set_state(TaskState::Downloading);
        Ok(ctx)
    }

    async fn drive(self: &Arc<Self>) {
        let ctx = match self.enter().await {
            Ok(ctx) => ctx,
            Err(err) => {
                self.fail(err).await;
                return;
            }
        };
        self.chunk_loop(ctx).await;
    }

    fn poll_control(&self) -> Option<Control> {
        match *self.control.borrow() {
            Control::Run => None,
            other => Some(other),
        }
    }

    async fn finish_preemption(&self, control: Control) {
        match control {
            Control::PauseRequested => {
                self.set_state(TaskState::Paused);
                self.events.emit_event(TaskEvent::Pause);
            }
            Control::CancelRequested => {
                // state and the cancel event were already set by cancel().
            }
            Control::Run => unreachable!("finish_preemption called with Control::Run"),
        }
    }

    async fn chunk_loop(self: &Arc<Self>, mut ctx: ChunkCursor) {
        loop {
            if let Some(control) = self.poll_control() {
                self.finish_preemption(control).await;
                return;
            }

            if !self.network.is_online() {
                self.events.emit_event(TaskEvent::NetworkLost);
                self.set_state(TaskState::Paused);
                return;
            }

            if ctx.total_bytes > 0 && ctx.downloaded_bytes >= ctx.total_bytes {
                self.assemble(ctx).await;
                return;
            }

            match self.fetch_and_store_chunk(&mut ctx).await {
                Ok(ChunkStep::Continue) => continue,
                Ok(ChunkStep::Done) => {
                    self.assemble(ctx).await;
                    return;
                }
                Ok(ChunkStep::PreEmpted) => {
                    if let Some(control) = self.poll_control() {
                        self.finish_preemption(control).await;
                    }
                    return;
                }
                Err(err) if err.is_retryable() => {
                    match self.retry_with_backoff(&mut ctx, err).await {
                        RetryOutcome::Retry => continue,
                        RetryOutcome::PreEmpted(control) => {
                            self.finish_preemption(control).await;
                            return;
                        }
                        RetryOutcome::Exhausted(err) => {
                            self.fail(err).await;
                            return;
                        }
                    }
                }
                Err(err) => {
                    self.fail(err).await;
                    return;
                }
            }
        }
    }

    async fn retry_with_backoff(
        self: &Arc<Self>,
        ctx: &mut ChunkCursor,
        err: DownloadError,
    ) -> RetryOutcome {
        ctx.retry_count += 1;
        if ctx.retry_count > MAX_RETRIES {
            return RetryOutcome::Exhausted(err);
        }
        let delay_ms = 1000u64 * 2u64.pow(ctx.retry_count - 1);
        tracing::warn!(url = %self.url, attempt = ctx.retry_count, delay_ms, "retrying chunk request");

        let mut control_rx = self.control.subscribe();
        tokio::select! {
            biased;
            _ = control_rx.changed() => RetryOutcome::PreEmpted(*control_rx.borrow()),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => RetryOutcome::Retry,
        }
    }

    async fn fetch_and_store_chunk(
        self: &Arc<Self>,
        ctx: &mut ChunkCursor,
    ) -> Result<ChunkStep, DownloadError> {
        let start = ctx.chunk_index * ctx.chunk_size;
        let end = if ctx.total_bytes > 0 {
            (start + ctx.chunk_size).min(ctx.total_bytes) - 1
        } else {
            start + ctx.chunk_size - 1
        };

        if !ctx.supports_resume && start > 0 {
            return Err(DownloadError::UnsupportedServer(
                "server does not honor byte range requests".to_string(),
            ));
        }

        let mut control_rx = self.control.subscribe();
        let request = http::build_chunk_request(
            &self.client,
            &self.url,
            now_unix_ms(),
            start,
            end,
            ctx.supports_resume,
        );

        tracing::info!(url = %self.url, chunk_index = ctx.chunk_index, start, end, "requesting chunk");

        let response = tokio::select! {
            biased;
            _ = control_rx.changed() => return Ok(ChunkStep::PreEmpted),
            result = request.send() => result,
        }?;

        let status = response.status();
        tracing::info!(url = %self.url, chunk_index = ctx.chunk_index, status = status.as_u16(), "chunk response received");

        match http::classify_chunk_status(status, start) {
            ChunkOutcome::Retryable | ChunkOutcome::Fatal => Err(DownloadError::Http {
                status: status.as_u16(),
                text: status.canonical_reason().unwrap_or_default().to_string(),
            }),
            ChunkOutcome::FullBodyAtStart => {
                let content_length = response.content_length();
                match self.stream_response(response, 0, 0, &mut control_rx).await? {
                    StreamOutcome::PreEmpted => Ok(ChunkStep::PreEmpted),
                    StreamOutcome::Body(bytes) => {
                        ctx.total_bytes = content_length.unwrap_or(bytes.len() as u64);
                        self.store.put_chunk(&self.url, 0, &bytes).await?;
                        ctx.downloaded_bytes = bytes.len() as u64;
                        self.persist_metadata(ctx).await?;
                        self.emit_progress(ctx.downloaded_bytes, ctx.total_bytes);
                        Ok(ChunkStep::Done)
                    }
                }
            }
            ChunkOutcome::FullBodyMidStream => {
                match self.stream_response(response, 0, 0, &mut control_rx).await? {
                    StreamOutcome::PreEmpted => Ok(ChunkStep::PreEmpted),
                    StreamOutcome::Body(bytes) => {
                        self.store.delete_chunks(&self.url).await?;
                        ctx.supports_resume = false;
                        ctx.chunk_index = 0;
                        ctx.total_bytes = bytes.len() as u64;
                        self.store.put_chunk(&self.url, 0, &bytes).await?;
                        ctx.downloaded_bytes = bytes.len() as u64;
                        self.persist_metadata(ctx).await?;
                        self.emit_progress(ctx.downloaded_bytes, ctx.total_bytes);
                        Ok(ChunkStep::Done)
                    }
                }
            }
            ChunkOutcome::Partial => {
                if ctx.total_bytes == 0 {
                    ctx.total_bytes = http::content_range_total(response.headers()).ok_or_else(
                        || DownloadError::UnsupportedServer("missing Content-Range total".into()),
                    )?;
                }
                let base_loaded = start;
                let total_bytes = ctx.total_bytes;
                match self
                    .stream_response(response, base_loaded, total_bytes, &mut control_rx)
                    .await?
                {
                    StreamOutcome::PreEmpted => Ok(ChunkStep::PreEmpted),
                    StreamOutcome::Body(bytes) => {
                        self.store
                            .put_chunk(&self.url, ctx.chunk_index, &bytes)
                            .await?;
                        ctx.downloaded_bytes = start + bytes.len() as u64;
                        ctx.chunk_index += 1;
                        ctx.retry_count = 0;
                        self.persist_metadata(ctx).await?;
                        Ok(ChunkStep::Continue)
                    }
                }
            }
        }
    }

    /// Streams `response`'s body, emitting `progress` as bytes arrive.
    /// Races the stream against `control_rx` so a pause/cancel signal
    /// aborts the read immediately rather than waiting for the body to
    /// finish — the accumulated bytes are simply dropped, and since no
    /// metadata update has happened yet the next attempt re-requests the
    /// same range.
    async fn stream_response(
        &self,
        response: Response,
        base_loaded: u64,
        total_bytes: u64,
        control_rx: &mut watch::Receiver<Control>,
    ) -> Result<StreamOutcome, DownloadError> {
        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        loop {
            tokio::select! {
                biased;
                _ = control_rx.changed() => return Ok(StreamOutcome::PreEmpted),
                next = stream.next() => {
                    match next {
                        Some(chunk) => {
                            let chunk = chunk.map_err(DownloadError::from)?;
                            buf.extend_from_slice(&chunk);
                            if total_bytes > 0 {
                                self.emit_progress(base_loaded + buf.len() as u64, total_bytes);
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        Ok(StreamOutcome::Body(buf))
    }

    async fn fail(self: &Arc<Self>, err: DownloadError) {
        tracing::error!(url = %self.url, error = %err, "task failed");
        self.set_state(TaskState::Error);
        self.events.emit_event(TaskEvent::Error(err));
    }

    async fn assemble(self: &Arc<Self>, ctx: ChunkCursor) {
        self.set_state(TaskState::Assembling);

        let chunks = match self.store.list_chunks(&self.url).await {
            Ok(chunks) => chunks,
            Err(err) => {
                self.fail(DownloadError::from(err)).await;
                return;
            }
        };

        let mut buf = Vec::new();
        for (expected_index, (index, bytes)) in chunks.into_iter().enumerate() {
            if index != expected_index as u64 {
                let _ = self.store.purge(&self.url).await;
                self.fail(DownloadError::Assembly(format!(
                    "missing chunk at {expected_index}"
                )))
                .await;
                return;
            }
            buf.extend_from_slice(&bytes);
        }

        if ctx.total_bytes > 0 && buf.len() as u64 != ctx.total_bytes {
            let _ = self.store.purge(&self.url).await;
            self.fail(DownloadError::Assembly("size mismatch".to_string()))
                .await;
            return;
        }

        let path = self.dest_dir.join(&self.filename);
        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                self.fail(DownloadError::Generic(format!(
                    "failed to create destination directory: {err}"
                )))
                .await;
                return;
            }
        }
        if let Err(err) = tokio::fs::write(&path, &buf).await {
            self.fail(DownloadError::Generic(format!(
                "failed to write assembled artifact: {err}"
            )))
            .await;
            return;
        }

        if let Err(err) = self.store.purge(&self.url).await {
            tracing::warn!(url = %self.url, error = %err, "purge after completion failed");
        }

        let size = buf.len() as u64;
        self.set_state(TaskState::Completed);
        self.events
            .emit_event(TaskEvent::Complete(CompletePayload { path, size }));
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
