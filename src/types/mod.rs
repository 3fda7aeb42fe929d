//! Shared Types Module
//!
//! Ledger records and the status values derived from them.

pub mod claim;
pub mod deposit;
pub mod monitored_tx;
pub mod status;

// Re-exports for convenience
pub use claim::Claim;
pub use deposit::{Block, Deposit, DepositId, DepositKey, ExitRoot, LeafType, NetworkId};
pub use monitored_tx::{MonitoredTx, MonitoredTxStatus};
pub use status::{StatusEvent, TransactionStatus};

/// `0x`-prefixed lowercase hex, the canonical text form for stored hashes and addresses
pub fn to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
