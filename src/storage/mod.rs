//! Storage Layer Module
//!
//! Provides the ledger: deposits, claims, exit roots and monitored claim
//! transactions.
//!
//! This module contains:
//! - Ledger trait definitions for abstraction
//! - SQLite implementation for production
//! - In-memory implementation for testing
//! - A deadline wrapper applied to every store in the service

pub mod memory;
pub mod sqlite;
pub mod timed;
pub mod traits;

use std::sync::Arc;

// Re-exports for convenience
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;
pub use timed::Timed;
pub use traits::{LedgerOps, LedgerStore, LedgerTx, StorageError, StorageResult};

/// Shared handle to the ledger used by every component
pub type SharedLedger = Arc<dyn LedgerStore>;

/// Wrap a ledger with the store deadline
pub fn with_deadline(inner: SharedLedger, timeout: std::time::Duration) -> SharedLedger {
    Arc::new(Timed::new(inner, timeout))
}
