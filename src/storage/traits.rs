//! Ledger Store Trait Definitions
//!
//! The ledger is the single source of truth for deposits, claims, exit roots
//! and monitored claim transactions. Implementations:
//! - `SqliteLedger` - Production storage with SQLite
//! - `MemoryLedger` - In-memory fake for tests and local runs
//!
//! Multi-step updates run on a [`LedgerTx`] obtained from
//! [`LedgerStore::begin`]. A transaction exposes the same operations as the
//! store; dropping it without `commit` rolls it back.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    Block, Claim, Deposit, DepositId, DepositKey, ExitRoot, LeafType, MonitoredTx,
    MonitoredTxStatus, NetworkId,
};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Deadline exceeded: {0}")]
    Timeout(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Operations available on the store and inside a transaction
#[async_trait]
pub trait LedgerOps: Send + Sync {
    /// Record a block, returning its assigned id
    async fn add_block(&self, block: &Block) -> StorageResult<u64>;

    /// Record a deposit; `(network_id, deposit_count)` must be new
    async fn add_deposit(&self, deposit: &Deposit) -> StorageResult<()>;

    /// Record a claim; `(index, network_id)` must be new
    async fn add_claim(&self, claim: &Claim) -> StorageResult<()>;

    /// Record an exit root
    async fn add_exit_root(&self, root: &ExitRoot) -> StorageResult<()>;

    /// Exit root with the highest deposit count for a network
    async fn get_latest_exit_root(&self, network: NetworkId) -> StorageResult<Option<ExitRoot>>;

    async fn get_deposit(&self, id: DepositId) -> StorageResult<Option<Deposit>>;

    async fn get_deposit_by_key(&self, key: &DepositKey) -> StorageResult<Option<Deposit>>;

    /// All deposits to an address, newest first
    async fn get_deposits(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>>;

    /// Deposits to an address that have no claim yet, newest first
    async fn get_pending_deposits(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>>;

    /// Deposits not yet ready for claim, oldest first
    async fn get_not_ready_deposits(&self, limit: u32, offset: u32) -> StorageResult<Vec<Deposit>>;

    /// Ready deposits of `network` with `ready_time <= ready_before` and no claim,
    /// ordered by block id then deposit count, both descending
    async fn get_claimable_deposits(
        &self,
        network: NetworkId,
        leaf_type: LeafType,
        limit: u32,
        offset: u32,
        ready_before: u64,
    ) -> StorageResult<Vec<Deposit>>;

    /// Not-ready deposits of `network` mined in `[min_block, max_block]`,
    /// newest first
    async fn get_not_ready_deposits_in_block_range(
        &self,
        network: NetworkId,
        min_block: u64,
        max_block: u64,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>>;

    /// Most recently counted ready deposits of `network`, highest deposit count first
    async fn get_latest_ready_deposits(
        &self,
        network: NetworkId,
        limit: u32,
    ) -> StorageResult<Vec<Deposit>>;

    async fn get_claim(&self, deposit_count: u32, network: NetworkId)
        -> StorageResult<Option<Claim>>;

    /// Atomically flip every not-ready deposit of `network` covered by `root`
    ///
    /// Returns the rows that changed; an unknown or already applied root
    /// changes nothing.
    async fn mark_deposits_ready(
        &self,
        network: NetworkId,
        root: B256,
        ready_time: u64,
    ) -> StorageResult<Vec<Deposit>>;

    /// Insert or update a monitored tx; history entries are only ever added
    async fn upsert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()>;

    async fn get_monitored_tx(&self, id: DepositId) -> StorageResult<Option<MonitoredTx>>;

    /// Highest nonce among `created` or `sent` rows sent from `from`
    async fn get_max_live_nonce(&self, from: &Address) -> StorageResult<Option<u64>>;

    /// Monitored txs in any of `statuses`, oldest first
    async fn get_monitored_txs_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<MonitoredTx>>;
}

/// A ledger that can open transactions
#[async_trait]
pub trait LedgerStore: LedgerOps {
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>>;
}

/// An open ledger transaction
#[async_trait]
pub trait LedgerTx: LedgerOps {
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}
