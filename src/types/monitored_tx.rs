//! Monitored claim transactions
//!
//! One row per deposit, owned by the claim transaction manager:
//! created → sent → confirmed, or → failed.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::deposit::DepositId;

/// Lifecycle state of a monitored claim transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoredTxStatus {
    /// Built and persisted, not yet broadcast
    Created,
    /// At least one broadcast succeeded
    Sent,
    /// Receipt reached the required depth
    Confirmed,
    /// Reverted or out of budget; left for manual claim
    Failed,
}

impl MonitoredTxStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }
}

impl std::fmt::Display for MonitoredTxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Sent => "sent",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for MonitoredTxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "sent" => Ok(Self::Sent),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown monitored tx status: {}", s)),
        }
    }
}

/// A claim submission tracked across broadcasts and gas bumps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredTx {
    pub deposit_id: DepositId,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub value: U256,
    pub data: Vec<u8>,
    pub gas: u64,
    pub gas_price: U256,
    pub status: MonitoredTxStatus,
    /// Every hash ever broadcast for this deposit
    pub history: BTreeSet<B256>,
    /// Hashes from attempts before the last re-arm; only a successful
    /// receipt for one of these still counts
    #[serde(default)]
    pub retired: BTreeSet<B256>,
    /// Hash of the most recent successful broadcast
    pub current_hash: Option<B256>,
    /// Broadcast attempts since `started_at`, failed ones included
    pub attempts: u32,
    /// Anchor for the elapsed-time budget; reset when an operator re-arms the row
    pub started_at: u64,
    /// Earliest time the next broadcast may be tried
    pub next_attempt_at: u64,
    pub last_broadcast_at: Option<u64>,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl MonitoredTx {
    /// Create a new row in `created`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        deposit_id: DepositId,
        from: Address,
        to: Address,
        nonce: u64,
        data: Vec<u8>,
        gas: u64,
        gas_price: U256,
        now: u64,
    ) -> Self {
        Self {
            deposit_id,
            from,
            to,
            nonce,
            value: U256::ZERO,
            data,
            gas,
            gas_price,
            status: MonitoredTxStatus::Created,
            history: BTreeSet::new(),
            retired: BTreeSet::new(),
            current_hash: None,
            attempts: 0,
            started_at: now,
            next_attempt_at: now,
            last_broadcast_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a successful broadcast
    pub fn mark_sent(&mut self, hash: B256, now: u64) {
        self.history.insert(hash);
        self.current_hash = Some(hash);
        self.status = MonitoredTxStatus::Sent;
        self.attempts += 1;
        self.last_broadcast_at = Some(now);
        self.last_error = None;
        self.touch(now);
    }

    /// Record a failed broadcast and schedule the next try
    pub fn record_broadcast_error(&mut self, error: String, retry_at: u64, now: u64) {
        self.attempts += 1;
        self.next_attempt_at = retry_at;
        self.last_error = Some(error);
        self.touch(now);
    }

    /// The receipt for `hash` reached the required depth
    pub fn mark_confirmed(&mut self, hash: B256, now: u64) {
        self.history.insert(hash);
        self.current_hash = Some(hash);
        self.status = MonitoredTxStatus::Confirmed;
        self.touch(now);
    }

    pub fn mark_failed(&mut self, error: String, now: u64) {
        self.status = MonitoredTxStatus::Failed;
        self.last_error = Some(error);
        self.touch(now);
    }

    /// Put a failed row back in `created` with a fresh nonce and budget
    ///
    /// History is kept so an old hash that still lands is recognized, but
    /// every hash so far is retired from the new attempt.
    pub fn rearm(&mut self, nonce: u64, data: Vec<u8>, gas: u64, gas_price: U256, now: u64) {
        self.retired.extend(self.history.iter().copied());
        self.nonce = nonce;
        self.data = data;
        self.gas = gas;
        self.gas_price = gas_price;
        self.status = MonitoredTxStatus::Created;
        self.current_hash = None;
        self.attempts = 0;
        self.started_at = now;
        self.next_attempt_at = now;
        self.touch(now);
    }

    /// Whether `hash` was broadcast by an attempt before the last re-arm
    pub fn is_retired(&self, hash: &B256) -> bool {
        self.retired.contains(hash)
    }

    /// Whether the retry budget is spent
    pub fn budget_exhausted(&self, max_attempts: u32, max_elapsed_secs: u64, now: u64) -> bool {
        self.attempts >= max_attempts || now.saturating_sub(self.started_at) >= max_elapsed_secs
    }

    fn touch(&mut self, now: u64) {
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MonitoredTx {
        MonitoredTx::new(
            DepositId::new(0, 1),
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            7,
            vec![0xde, 0xad],
            200_000,
            U256::from(1_000_000_000u64),
            100,
        )
    }

    #[test]
    fn test_lifecycle() {
        let mut tx = sample();
        assert_eq!(tx.status, MonitoredTxStatus::Created);

        tx.mark_sent(B256::repeat_byte(1), 110);
        tx.mark_sent(B256::repeat_byte(2), 250);
        assert_eq!(tx.status, MonitoredTxStatus::Sent);
        assert_eq!(tx.history.len(), 2);
        assert_eq!(tx.current_hash, Some(B256::repeat_byte(2)));
        assert_eq!(tx.attempts, 2);

        // The first broadcast landing still confirms the row
        tx.mark_confirmed(B256::repeat_byte(1), 300);
        assert_eq!(tx.status, MonitoredTxStatus::Confirmed);
        assert_eq!(tx.history.len(), 2);
        assert!(tx.status.is_terminal());
    }

    #[test]
    fn test_rearm_keeps_history() {
        let mut tx = sample();
        tx.mark_sent(B256::repeat_byte(9), 110);
        tx.mark_failed("reverted".to_string(), 120);

        tx.rearm(8, vec![1], 210_000, U256::from(2u64), 500);
        assert_eq!(tx.status, MonitoredTxStatus::Created);
        assert_eq!(tx.attempts, 0);
        assert_eq!(tx.started_at, 500);
        assert!(tx.history.contains(&B256::repeat_byte(9)));
        assert!(tx.is_retired(&B256::repeat_byte(9)));

        tx.mark_sent(B256::repeat_byte(10), 510);
        assert!(!tx.is_retired(&B256::repeat_byte(10)));
        assert_eq!(tx.history.len(), 2);
    }

    #[test]
    fn test_budget() {
        let mut tx = sample();
        assert!(!tx.budget_exhausted(3, 1000, 150));

        tx.record_broadcast_error("timeout".into(), 160, 150);
        tx.record_broadcast_error("timeout".into(), 170, 160);
        tx.record_broadcast_error("timeout".into(), 180, 170);
        assert!(tx.budget_exhausted(3, 1000, 170));

        let fresh = sample();
        assert!(fresh.budget_exhausted(10, 60, 160));
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            MonitoredTxStatus::Created,
            MonitoredTxStatus::Sent,
            MonitoredTxStatus::Confirmed,
            MonitoredTxStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<MonitoredTxStatus>(), Ok(status));
        }
        assert!("pending".parse::<MonitoredTxStatus>().is_err());
    }
}
