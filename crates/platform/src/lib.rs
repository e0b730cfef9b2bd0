//! The network-online signal and the "platform reported connectivity
//! restored" re-entry hook.
//!
//! Everything this system actually needs from the host platform — is a
//! link up right now, and should we wake errored tasks back up — is this
//! one small trait. The concrete facility (a real OS reachability check, a
//! browser `online`/`offline` event, ...) is deliberately out of scope:
//! this crate only defines the seam and ships the one implementation that
//! needs no OS integration at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Consulted by the download task before every chunk request.
pub trait NetworkMonitor: Send + Sync {
    /// Returns `true` if the host believes it currently has network
    /// connectivity.
    fn is_online(&self) -> bool;
}

/// A monitor that never reports an outage.
///
/// Suitable for environments with no platform-level connectivity signal
/// (most servers, and tests); the task still discovers real network
/// failures through failed requests and its own retry/backoff logic.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// A monitor whose reported state can be flipped at runtime.
///
/// When the platform reports connectivity restored, callers consult
/// [`FlagMonitor::is_online`] and may then retry tasks parked in `error`.
/// Typically wired to a real platform signal (OS reachability callback,
/// browser `online`/`offline` events) by the embedding application; this
/// crate only provides the flag and its plumbing.
#[derive(Debug, Clone)]
pub struct FlagMonitor {
    online: Arc<AtomicBool>,
}

impl FlagMonitor {
    /// Creates a monitor starting in the given state.
    pub fn new(initially_online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(initially_online)),
        }
    }

    /// Flips the reported state. Call this from whatever platform callback
    /// observes connectivity changes.
    pub fn set_online(&self, online: bool) {
        tracing::debug!(online, "network status changed");
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for FlagMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for FlagMonitor {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_online_is_always_online() {
        assert!(AlwaysOnline.is_online());
    }

    #[test]
    fn flag_monitor_reflects_latest_set_online() {
        let monitor = FlagMonitor::new(true);
        assert!(monitor.is_online());

        monitor.set_online(false);
        assert!(!monitor.is_online());

        monitor.set_online(true);
        assert!(monitor.is_online());
    }

    #[test]
    fn flag_monitor_clone_shares_state() {
        let monitor = FlagMonitor::new(true);
        let clone = monitor.clone();
        clone.set_online(false);
        assert!(!monitor.is_online());
    }
}
