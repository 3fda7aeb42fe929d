//! Recording dispatcher
//!
//! Stands in for the external push producer: every event becomes a
//! [`PushMessage`] kept in memory and served by the debug endpoint.

use std::sync::{Mutex, PoisonError};

use super::{Notifier, PushMessage};
use crate::types::StatusEvent;

/// Oldest messages are dropped past this many
const MAX_RECORDED: usize = 1_000;

#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<PushMessage>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded messages, oldest first
    pub fn messages(&self) -> Vec<PushMessage> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, event: &StatusEvent) {
        let mut messages = self.messages.lock().unwrap_or_else(PoisonError::into_inner);
        if messages.len() >= MAX_RECORDED {
            messages.remove(0);
        }
        messages.push(PushMessage::from_event(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositKey, TransactionStatus};
    use alloy_primitives::{Address, B256};

    #[test]
    fn test_records_and_caps() {
        let sink = MemoryNotifier::new();
        let event = StatusEvent::new(
            DepositKey {
                dest_addr: Address::repeat_byte(2),
                network_id: 1,
                tx_hash: B256::repeat_byte(3),
            },
            TransactionStatus::Created,
            TransactionStatus::PendingVerification,
            5,
        );
        for _ in 0..(MAX_RECORDED + 5) {
            sink.notify(&event);
        }
        assert_eq!(sink.messages().len(), MAX_RECORDED);

        sink.clear();
        assert!(sink.messages().is_empty());
    }
}
