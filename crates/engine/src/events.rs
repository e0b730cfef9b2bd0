//! A minimal, generic publish/subscribe surface.
//!
//! A subscriber names an event and supplies a callback receiving one
//! payload. Handlers registered for the same name run serially, in
//! registration order; a handler is free to call [`EventEmitter::off`] on
//! itself mid-dispatch because the dispatch loop iterates a snapshot of
//! the handler list taken before invoking any of them.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::DownloadError;
use crate::state::TaskState;

/// Payload of a `progress` event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressPayload {
    pub loaded: u64,
    pub total: u64,
    pub percent: f64,
}

/// Payload of a `complete` event: the assembled artifact's location and
/// size on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletePayload {
    pub path: PathBuf,
    pub size: u64,
}

/// One lifecycle event emitted by a [`crate::task::DownloadTask`].
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Start,
    Progress(ProgressPayload),
    StateChange { new_state: TaskState },
    NetworkLost,
    Pause,
    Resume,
    Cancel,
    Complete(CompletePayload),
    Error(DownloadError),
}

impl TaskEvent {
    /// The event name under which handlers subscribe via
    /// [`EventEmitter::on`].
    pub fn name(&self) -> &'static str {
        match self {
            TaskEvent::Start => "start",
            TaskEvent::Progress(_) => "progress",
            TaskEvent::StateChange { .. } => "stateChange",
            TaskEvent::NetworkLost => "networkLost",
            TaskEvent::Pause => "pause",
            TaskEvent::Resume => "resume",
            TaskEvent::Cancel => "cancel",
            TaskEvent::Complete(_) => "complete",
            TaskEvent::Error(_) => "error",
        }
    }
}

/// Opaque handle returned by [`EventEmitter::on`], used to detach a single
/// handler via [`EventEmitter::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// A named, serial event emitter.
///
/// Generic over the payload type so both [`crate::events::TaskEvent`] and
/// the job-level event enum in the `api` crate can share one
/// implementation.
pub struct EventEmitter<E> {
    handlers: Mutex<HashMap<&'static str, Vec<(HandlerId, Handler<E>)>>>,
    next_id: AtomicU64,
}

impl<E> Default for EventEmitter<E> {
    fn default() -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<E> EventEmitter<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `event_name`. Returns an id usable with
    /// [`Self::off`].
    pub fn on<F>(&self, event_name: &'static str, handler: F) -> HandlerId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap()
            .entry(event_name)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Detaches the handler registered under `event_name` with the given
    /// id. A no-op if the id is not found (already detached, or never
    /// registered under this name).
    pub fn off(&self, event_name: &str, id: HandlerId) {
        if let Some(list) = self.handlers.lock().unwrap().get_mut(event_name) {
            list.retain(|(handler_id, _)| *handler_id != id);
        }
    }

    /// Detaches every handler for every event name.
    pub fn clear(&self) {
        self.handlers.lock().unwrap().clear();
    }

    /// Invokes every handler registered for `event_name`, in registration
    /// order, passing `payload` by reference.
    pub fn emit(&self, event_name: &'static str, payload: &E) {
        // Snapshot under the lock, then release it before invoking
        // handlers: a handler calling `off` on itself must not deadlock
        // and must not disturb this dispatch.
        let snapshot: Vec<Handler<E>> = {
            let handlers = self.handlers.lock().unwrap();
            match handlers.get(event_name) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => return,
            }
        };
        for handler in snapshot {
            handler(payload);
        }
    }
}

impl EventEmitter<TaskEvent> {
    /// Emits `event` under the name [`TaskEvent::name`] returns, so callers
    /// never have to repeat the event name alongside its payload.
    pub fn emit_event(&self, event: TaskEvent) {
        self.emit(event.name(), &event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handlers_run_serially_in_registration_order() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        emitter.on("x", move |_| o1.lock().unwrap().push(1));
        let o2 = Arc::clone(&order);
        emitter.on("x", move |_| o2.lock().unwrap().push(2));

        emitter.emit("x", &0);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn off_detaches_a_single_handler() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = emitter.on("x", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        emitter.emit("x", &0);
        emitter.off("x", id);
        emitter.emit("x", &0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_detach_itself_mid_dispatch() {
        let emitter: Arc<EventEmitter<u32>> = Arc::new(EventEmitter::new());
        let count = Arc::new(AtomicUsize::new(0));

        let emitter_clone = Arc::clone(&emitter);
        let count_clone = Arc::clone(&count);
        // A cell to stash the id once known, so the closure can self-detach.
        let id_cell: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));
        let id_cell_clone = Arc::clone(&id_cell);
        let id = emitter.on("x", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *id_cell_clone.lock().unwrap() {
                emitter_clone.off("x", id);
            }
        });
        *id_cell.lock().unwrap() = Some(id);

        emitter.emit("x", &0); // detaches itself while this dispatch iterates
        emitter.emit("x", &0); // should not run again

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_removes_every_subscriber() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        emitter.on("x", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        emitter.clear();
        emitter.emit("x", &0);

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn emit_with_no_subscribers_is_a_no_op() {
        let emitter: EventEmitter<u32> = EventEmitter::new();
        emitter.emit("nobody-listening", &42);
    }
}
