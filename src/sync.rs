//! Change notifications for watch state.
//!
//! Two channels feed the same broadcast: writes made through a store handle
//! publish `Local` changes immediately, and a poller publishes `Foreign`
//! changes when another writer (another process sharing the state directory,
//! or another handle over the same memory store) replaced a document.

use std::time::Duration;

use tokio::{sync::broadcast, task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;

use crate::watch_state::WatchStateStore;

const CHANNEL_CAPACITY: usize = 64;

/// Logical documents kept in the watch-state backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKey {
    ContinueWatching,
    WatchLater,
}

impl WatchKey {
    pub const ALL: [WatchKey; 2] = [WatchKey::ContinueWatching, WatchKey::WatchLater];

    pub fn storage_key(self) -> &'static str {
        match self {
            WatchKey::ContinueWatching => "continueWatching",
            WatchKey::WatchLater => "watchLater",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    Local,
    Foreign,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub key: WatchKey,
    pub origin: ChangeOrigin,
}

#[derive(Clone)]
pub struct SyncNotifier {
    sender: broadcast::Sender<StateChange>,
}

impl Default for SyncNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncNotifier {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Fans the change out to every subscriber. Having none is fine.
    pub fn publish(&self, change: StateChange) {
        let _ = self.sender.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.sender.subscribe()
    }
}

/// Polls the backend for documents replaced by other writers and publishes
/// them as `Foreign` changes. Stops when the returned handle is aborted.
pub fn spawn_foreign_poller(store: WatchStateStore, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let changed = store.poll_foreign_changes();
            if !changed.is_empty() {
                debug!(?changed, "observed foreign watch-state changes");
            }
        }
    })
}
