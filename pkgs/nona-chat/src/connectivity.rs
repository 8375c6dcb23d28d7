//! Connectivity monitor - process-wide online/offline signal

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Push-driven offline flag, online at startup
///
/// Platform connectivity notifications call [`set_online`](Self::set_online) /
/// [`set_offline`](Self::set_offline); observers hold a `watch` receiver.
/// Every offline to online transition also bumps a reconnect counter, so a
/// flap that completes before an observer wakes up is still seen.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    offline: Arc<watch::Sender<bool>>,
    reconnects: Arc<watch::Sender<u64>>,
}

impl ConnectivityMonitor {
    pub fn new() -> Self {
        let (offline, _) = watch::channel(false);
        let (reconnects, _) = watch::channel(0);
        Self {
            offline: Arc::new(offline),
            reconnects: Arc::new(reconnects),
        }
    }

    /// Record an online notification; returns whether it was a transition
    pub fn set_online(&self) -> bool {
        let changed = self.set(false);
        if changed {
            self.reconnects.send_modify(|count| *count += 1);
            info!("Connectivity restored");
        }
        changed
    }

    /// Record an offline notification; returns whether it was a transition
    pub fn set_offline(&self) -> bool {
        let changed = self.set(true);
        if changed {
            info!("Connectivity lost, sends will be queued");
        }
        changed
    }

    fn set(&self, offline: bool) -> bool {
        self.offline.send_if_modified(|current| {
            if *current == offline {
                false
            } else {
                *current = offline;
                true
            }
        })
    }

    pub fn is_offline(&self) -> bool {
        *self.offline.borrow()
    }

    /// Observe the offline flag; `changed()` fires on transitions only
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.offline.subscribe()
    }

    /// Observe the number of offline to online transitions so far
    pub fn watch_reconnects(&self) -> watch::Receiver<u64> {
        self.reconnects.subscribe()
    }
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}
