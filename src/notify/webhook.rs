//! Webhook dispatcher
//!
//! Each event is POSTed as a [`PushMessage`] from a spawned task, so a slow
//! or dead endpoint never holds up the caller.

use reqwest::Client;
use std::time::Duration;

use super::{Notifier, PushMessage};
use crate::common::{EventCategory, LogEvent, LogLevel};
use crate::types::StatusEvent;

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            url: url.to_string(),
        })
    }

    async fn push(client: Client, url: String, message: PushMessage) {
        let request_id = message.request_id.clone();
        let result = client.post(&url).json(&message).send().await;

        let error = match result {
            Ok(resp) if resp.status().is_success() => None,
            Ok(resp) => Some(format!("webhook returned {}", resp.status())),
            Err(e) => Some(e.to_string()),
        };

        if let Some(err) = error {
            LogEvent::new(LogLevel::Warn, EventCategory::Notify, "push_failed")
                .with_correlation_id(request_id)
                .with_error("PUSH_FAILED", err)
                .emit(LogLevel::Warn);
        }
    }
}

impl Notifier for WebhookNotifier {
    fn notify(&self, event: &StatusEvent) {
        let message = PushMessage::from_event(event);

        // Outside a runtime there is nowhere to send from; drop the event
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::push(self.client.clone(), self.url.clone(), message));
            }
            Err(_) => {
                tracing::debug!(target: "xbridge::notify", "no runtime, push dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepositKey, TransactionStatus};
    use alloy_primitives::{Address, B256};

    #[tokio::test]
    async fn test_unreachable_endpoint_does_not_block() {
        let notifier =
            WebhookNotifier::new("http://127.0.0.1:9/push", Duration::from_millis(200)).unwrap();
        let event = StatusEvent::new(
            DepositKey {
                dest_addr: Address::repeat_byte(1),
                network_id: 0,
                tx_hash: B256::repeat_byte(1),
            },
            TransactionStatus::Created,
            TransactionStatus::Claimed,
            1,
        );

        let start = std::time::Instant::now();
        notifier.notify(&event);
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
