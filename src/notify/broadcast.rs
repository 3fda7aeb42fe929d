//! Broadcast channel dispatcher
//!
//! Uses tokio broadcast channels for pub/sub; WebSocket connections
//! subscribe and filter by destination address.

use tokio::sync::broadcast;

use super::Notifier;
use crate::types::StatusEvent;

/// Fan-out point for live status events
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusEvent>,
}

impl BroadcastNotifier {
    /// Create a channel holding up to `capacity` undelivered events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, event: &StatusEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event.clone());
    }
}
