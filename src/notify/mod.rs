//! Status Notification Dispatchers
//!
//! Status events are published best-effort and never block a lifecycle
//! transition. Dispatchers:
//! - `broadcast`: tokio broadcast channel feeding the WebSocket endpoints
//! - `webhook`: JSON push to an external endpoint
//! - `memory`: records push messages for the debug endpoint and tests

pub mod broadcast;
pub mod memory;
pub mod webhook;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::common::generate_correlation_id;
use crate::types::{to_hex, StatusEvent};

pub use broadcast::BroadcastNotifier;
pub use memory::MemoryNotifier;
pub use webhook::WebhookNotifier;

/// Business code attached to every transfer status push
pub const BIZ_CODE_BRIDGE_ORDER: &str = "bridge_order";

/// Sink for status transitions
///
/// Implementations must return promptly and swallow their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &StatusEvent);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Message pushed to wallets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushMessage {
    pub biz_code: String,
    pub wallet_address: String,
    pub request_id: String,
    /// JSON array of status events
    pub push_content: String,
    /// Unix milliseconds
    pub time: i64,
}

impl PushMessage {
    pub fn from_event(event: &StatusEvent) -> Self {
        Self {
            biz_code: BIZ_CODE_BRIDGE_ORDER.to_string(),
            wallet_address: to_hex(event.deposit_key.dest_addr.as_slice()),
            request_id: generate_correlation_id(),
            push_content: serde_json::to_string(&[event]).unwrap_or_else(|_| "[]".to_string()),
            time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _event: &StatusEvent) {}
}

/// Forwards each event to every inner notifier
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    sinks: Vec<SharedNotifier>,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: SharedNotifier) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Notifier for FanoutNotifier {
    fn notify(&self, event: &StatusEvent) {
        for sink in &self.sinks {
            sink.notify(event);
        }
    }
}

/// Publish an event only if the projected status changed, logging it
pub fn publish_transition(notifier: &dyn Notifier, event: StatusEvent) {
    if !event.is_change() {
        return;
    }
    crate::common::log_status_transition(
        &event.deposit_key.to_string(),
        &event.old_status.to_string(),
        &event.new_status.to_string(),
    );
    notifier.notify(&event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositKey, TransactionStatus};
    use alloy_primitives::{Address, B256};

    fn event(old: TransactionStatus, new: TransactionStatus) -> StatusEvent {
        StatusEvent::new(
            DepositKey {
                dest_addr: Address::repeat_byte(0xab),
                network_id: 0,
                tx_hash: B256::repeat_byte(1),
            },
            old,
            new,
            1_700_000_000,
        )
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let a = Arc::new(MemoryNotifier::new());
        let b = Arc::new(MemoryNotifier::new());
        let fanout = FanoutNotifier::new().with(a.clone()).with(b.clone());

        fanout.notify(&event(TransactionStatus::Created, TransactionStatus::PendingUserClaim));
        assert_eq!(a.messages().len(), 1);
        assert_eq!(b.messages().len(), 1);
    }

    #[test]
    fn test_unchanged_status_is_not_published() {
        let sink = MemoryNotifier::new();
        publish_transition(
            &sink,
            event(TransactionStatus::Created, TransactionStatus::Created),
        );
        assert!(sink.messages().is_empty());

        publish_transition(
            &sink,
            event(TransactionStatus::Created, TransactionStatus::Claimed),
        );
        assert_eq!(sink.messages().len(), 1);
    }

    #[test]
    fn test_push_message_shape() {
        let msg = PushMessage::from_event(&event(
            TransactionStatus::PendingAutoClaim,
            TransactionStatus::Claimed,
        ));
        assert_eq!(msg.biz_code, BIZ_CODE_BRIDGE_ORDER);
        assert_eq!(msg.wallet_address, format!("0x{}", "ab".repeat(20)));
        let content: Vec<StatusEvent> = serde_json::from_str(&msg.push_content).unwrap();
        assert_eq!(content[0].new_status, TransactionStatus::Claimed);
    }
}
