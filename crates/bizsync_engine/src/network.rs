//! Online/offline signal.

use tokio::sync::watch;

/// Tracks whether the process believes it is online.
///
/// This is a pure signal source: it never retries or dispatches anything.
/// The engine listens to its transitions and drains the queue when the
/// network comes back.
#[derive(Debug)]
pub struct NetworkMonitor {
    state: watch::Sender<bool>,
}

impl NetworkMonitor {
    /// Creates a monitor with the given initial state.
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Sets the current state. Returns true if this was a transition.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if changed {
            if online {
                tracing::info!("network online");
            } else {
                tracing::warn!("network offline");
            }
        }
        changed
    }

    /// Subscribes to transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions() {
        let monitor = NetworkMonitor::default();
        assert!(monitor.is_online());

        assert!(monitor.set_online(false));
        assert!(!monitor.is_online());
        assert!(!monitor.set_online(false));
        assert!(monitor.set_online(true));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let monitor = NetworkMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow_and_update());

        monitor.set_online(true);
        assert!(!rx.has_changed().unwrap());
    }
}
