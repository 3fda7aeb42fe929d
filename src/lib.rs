//! xbridge - Bridge Claim Backend
//!
//! Server-side services for an L1 <-> L2 asset bridge:
//!
//! 1. **Readiness Tracker** - Flips deposits to claimable as exit roots arrive
//! 2. **Claim Tx Manager** - Auto-claims ready L1 deposits on L2, with gas
//!    bumping, same-nonce resubmission and a retry budget
//! 3. **Status Projector** - Derives the status and ETA wallets see
//! 4. **API** - REST listings, manual claims and live WebSocket events
//!
//! Chain sync and exit-root ingestion run elsewhere and write into the
//! shared ledger.

pub mod api;
pub mod claimtx;
pub mod clock;
pub mod common;
pub mod notify;
pub mod readiness;
pub mod status;
pub mod storage;
pub mod types;

#[cfg(test)]
pub mod testing;

// Re-exports: common infrastructure
pub use common::{BridgeConfig, BridgeError, Precondition, Result};

// Re-exports: components
pub use claimtx::{ClaimTxManager, TickResult};
pub use readiness::ReadinessTracker;
pub use status::{ChainProgress, ProgressPoller, StatusProjector};

// Re-exports: ledger
pub use storage::{LedgerStore, MemoryLedger, SharedLedger, SqliteLedger};
pub use types::{
    Claim, Deposit, DepositId, DepositKey, MonitoredTx, MonitoredTxStatus, StatusEvent,
    TransactionStatus,
};
