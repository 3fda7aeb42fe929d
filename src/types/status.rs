//! Consumer-facing transfer status and the events published on transitions

use serde::{Deserialize, Serialize};

use super::deposit::DepositKey;

/// Status reported to users for a bridge transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Observed, not yet provable on the destination chain
    Created,
    /// Ready and the user may claim it
    PendingUserClaim,
    /// The backend is claiming it, no user action needed
    PendingAutoClaim,
    /// Consumed on the destination chain
    Claimed,
    /// L2 deposit committed, waiting for the batch to be verified
    PendingVerification,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "CREATED",
            Self::PendingUserClaim => "PENDING_USER_CLAIM",
            Self::PendingAutoClaim => "PENDING_AUTO_CLAIM",
            Self::Claimed => "CLAIMED",
            Self::PendingVerification => "PENDING_VERIFICATION",
        };
        write!(f, "{}", s)
    }
}

/// A projected status transition, published best-effort
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub deposit_key: DepositKey,
    pub old_status: TransactionStatus,
    pub new_status: TransactionStatus,
    /// Unix seconds
    pub timestamp: u64,
}

impl StatusEvent {
    pub fn new(
        deposit_key: DepositKey,
        old_status: TransactionStatus,
        new_status: TransactionStatus,
        timestamp: u64,
    ) -> Self {
        Self {
            deposit_key,
            old_status,
            new_status,
            timestamp,
        }
    }

    pub fn is_change(&self) -> bool {
        self.old_status != self.new_status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_screaming() {
        let json = serde_json::to_string(&TransactionStatus::PendingAutoClaim).unwrap();
        assert_eq!(json, "\"PENDING_AUTO_CLAIM\"");
        assert_eq!(TransactionStatus::PendingAutoClaim.to_string(), "PENDING_AUTO_CLAIM");
    }
}
