use crate::domain::events::Notification;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Tracks outbound connectivity. Driven by platform connectivity signals
/// pushed into [`ReachabilityMonitor::set_online`]; emits exactly one
/// transition per actual change, never duplicates for the same state.
pub struct ReachabilityMonitor {
    state: watch::Sender<bool>,
    notifications: mpsc::Sender<Notification>,
}

/// Read-side handle; cheap to clone, synchronous to query.
#[derive(Debug, Clone)]
pub struct ReachabilityHandle {
    state: watch::Receiver<bool>,
}

impl ReachabilityHandle {
    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }
}

impl ReachabilityMonitor {
    pub fn new(initially_online: bool, notifications: mpsc::Sender<Notification>) -> Self {
        let (state, _) = watch::channel(initially_online);
        ReachabilityMonitor { state, notifications }
    }

    pub fn handle(&self) -> ReachabilityHandle {
        ReachabilityHandle {
            state: self.state.subscribe(),
        }
    }

    /// Transition stream for the scheduler; `changed()` fires once per
    /// actual online/offline flip.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub async fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            *current = online;
            true
        });

        if !changed {
            return;
        }

        let notification = if online {
            info!("🛜 Network connection restored");
            Notification::success("Network connection restored")
        } else {
            warn!("🛜 Network connection lost");
            Notification::error("Network connection lost")
        };
        self.notifications.send(notification).await.unwrap_or_default();
    }
}
