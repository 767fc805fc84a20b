//! Status broadcasting.
//!
//! Every change to the engine's status is published as a whole
//! [`SyncStatus`] snapshot; there is no diffing. Listeners are plain
//! callbacks, and the latest snapshot is also kept in a `watch` channel
//! for async consumers.

use crate::status::SyncStatus;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

struct Shared {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    published_version: AtomicU64,
    latest: watch::Sender<SyncStatus>,
}

/// Publishes status snapshots to subscribers.
pub struct StatusBroadcaster {
    shared: Arc<Shared>,
}

impl StatusBroadcaster {
    /// Creates a broadcaster holding `initial` as the latest snapshot.
    pub fn new(initial: SyncStatus) -> Self {
        let version = initial.version;
        let (latest, _) = watch::channel(initial);
        Self {
            shared: Arc::new(Shared {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                published_version: AtomicU64::new(version),
                latest,
            }),
        }
    }

    /// Registers a listener called with every new snapshot.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is dropped or unsubscribed.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .listeners
            .write()
            .push((id, Arc::new(listener)));

        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns a receiver that always holds the latest snapshot.
    pub fn receiver(&self) -> watch::Receiver<SyncStatus> {
        self.shared.latest.subscribe()
    }

    /// Returns the latest published snapshot.
    pub fn latest(&self) -> SyncStatus {
        self.shared.latest.borrow().clone()
    }

    /// Number of registered listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.read().len()
    }

    /// Publishes a snapshot.
    ///
    /// Snapshots older than one already published are discarded, so
    /// listeners never observe the status moving backwards.
    pub fn publish(&self, status: SyncStatus) {
        let previous = self
            .shared
            .published_version
            .fetch_max(status.version, Ordering::SeqCst);
        if previous >= status.version {
            return;
        }

        self.shared.latest.send_replace(status.clone());

        // Listeners run without the lock held so they may subscribe,
        // unsubscribe or query the engine.
        let listeners: Vec<Listener> = self
            .shared
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in listeners {
            listener(&status);
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new(SyncStatus::default())
    }
}

/// Handle to a registered listener.
///
/// Dropping it unregisters the listener.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Unregisters the listener.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.upgrade() {
            shared.listeners.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn status(version: u64, pending: usize) -> SyncStatus {
        SyncStatus {
            version,
            pending_operations: pending,
            ..SyncStatus::default()
        }
    }

    #[test]
    fn listeners_receive_snapshots() {
        let broadcaster = StatusBroadcaster::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = broadcaster.subscribe(move |s| sink.lock().push(s.pending_operations));

        broadcaster.publish(status(1, 3));
        broadcaster.publish(status(2, 2));

        assert_eq!(*seen.lock(), vec![3, 2]);
        assert_eq!(broadcaster.latest().pending_operations, 2);
    }

    #[test]
    fn stale_snapshots_are_dropped() {
        let broadcaster = StatusBroadcaster::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        let _sub = broadcaster.subscribe(move |s| sink.lock().push(s.version));

        broadcaster.publish(status(2, 0));
        broadcaster.publish(status(1, 5));
        broadcaster.publish(status(2, 5));

        assert_eq!(*seen.lock(), vec![2]);
        assert_eq!(broadcaster.latest().pending_operations, 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broadcaster = StatusBroadcaster::default();
        let seen = Arc::new(Mutex::new(0));

        let sink = Arc::clone(&seen);
        let sub = broadcaster.subscribe(move |_| *sink.lock() += 1);
        broadcaster.publish(status(1, 0));

        sub.unsubscribe();
        assert_eq!(broadcaster.listener_count(), 0);
        broadcaster.publish(status(2, 0));

        assert_eq!(*seen.lock(), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let broadcaster = StatusBroadcaster::default();
        {
            let _sub = broadcaster.subscribe(|_| {});
            assert_eq!(broadcaster.listener_count(), 1);
        }
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn receiver_tracks_latest() {
        let broadcaster = StatusBroadcaster::default();
        let mut rx = broadcaster.receiver();

        broadcaster.publish(status(1, 4));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().pending_operations, 4);
    }
}
