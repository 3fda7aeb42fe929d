//! Deadline wrapper for ledger calls
//!
//! Every call through [`Timed`] is bounded by the configured store timeout
//! and logs a debug line before and after with the elapsed time.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::future::Future;
use std::ops::Deref;
use std::time::{Duration, Instant};

use super::traits::{LedgerOps, LedgerStore, LedgerTx, StorageError, StorageResult};
use crate::types::{
    Block, Claim, Deposit, DepositId, DepositKey, ExitRoot, LeafType, MonitoredTx,
    MonitoredTxStatus, NetworkId,
};

/// Ledger (or ledger transaction) whose calls carry a deadline
pub struct Timed<T> {
    inner: T,
    timeout: Duration,
}

impl<T> Timed<T> {
    pub fn new(inner: T, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn call<R, F>(&self, op: &'static str, fut: F) -> StorageResult<R>
    where
        F: Future<Output = StorageResult<R>> + Send,
    {
        tracing::debug!(target: "xbridge::storage", op, "store call");
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(format!(
                "{} exceeded {:?}",
                op, self.timeout
            ))),
        };
        tracing::debug!(
            target: "xbridge::storage",
            op,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "store call done"
        );
        result
    }
}

#[async_trait]
impl<T> LedgerOps for Timed<T>
where
    T: Deref + Send + Sync,
    T::Target: LedgerOps,
{
    async fn add_block(&self, block: &Block) -> StorageResult<u64> {
        self.call("add_block", self.inner.add_block(block)).await
    }

    async fn add_deposit(&self, deposit: &Deposit) -> StorageResult<()> {
        self.call("add_deposit", self.inner.add_deposit(deposit)).await
    }

    async fn add_claim(&self, claim: &Claim) -> StorageResult<()> {
        self.call("add_claim", self.inner.add_claim(claim)).await
    }

    async fn add_exit_root(&self, root: &ExitRoot) -> StorageResult<()> {
        self.call("add_exit_root", self.inner.add_exit_root(root)).await
    }

    async fn get_latest_exit_root(&self, network: NetworkId) -> StorageResult<Option<ExitRoot>> {
        self.call(
            "get_latest_exit_root",
            self.inner.get_latest_exit_root(network),
        )
        .await
    }

    async fn get_deposit(&self, id: DepositId) -> StorageResult<Option<Deposit>> {
        self.call("get_deposit", self.inner.get_deposit(id)).await
    }

    async fn get_deposit_by_key(&self, key: &DepositKey) -> StorageResult<Option<Deposit>> {
        self.call("get_deposit_by_key", self.inner.get_deposit_by_key(key))
            .await
    }

    async fn get_deposits(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_deposits",
            self.inner.get_deposits(dest_addr, limit, offset),
        )
        .await
    }

    async fn get_pending_deposits(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_pending_deposits",
            self.inner.get_pending_deposits(dest_addr, limit, offset),
        )
        .await
    }

    async fn get_not_ready_deposits(&self, limit: u32, offset: u32) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_not_ready_deposits",
            self.inner.get_not_ready_deposits(limit, offset),
        )
        .await
    }

    async fn get_claimable_deposits(
        &self,
        network: NetworkId,
        leaf_type: LeafType,
        limit: u32,
        offset: u32,
        ready_before: u64,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_claimable_deposits",
            self.inner
                .get_claimable_deposits(network, leaf_type, limit, offset, ready_before),
        )
        .await
    }

    async fn get_not_ready_deposits_in_block_range(
        &self,
        network: NetworkId,
        min_block: u64,
        max_block: u64,
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_not_ready_deposits_in_block_range",
            self.inner
                .get_not_ready_deposits_in_block_range(network, min_block, max_block, limit, offset),
        )
        .await
    }

    async fn get_latest_ready_deposits(
        &self,
        network: NetworkId,
        limit: u32,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "get_latest_ready_deposits",
            self.inner.get_latest_ready_deposits(network, limit),
        )
        .await
    }

    async fn get_claim(
        &self,
        deposit_count: u32,
        network: NetworkId,
    ) -> StorageResult<Option<Claim>> {
        self.call("get_claim", self.inner.get_claim(deposit_count, network))
            .await
    }

    async fn mark_deposits_ready(
        &self,
        network: NetworkId,
        root: B256,
        ready_time: u64,
    ) -> StorageResult<Vec<Deposit>> {
        self.call(
            "mark_deposits_ready",
            self.inner.mark_deposits_ready(network, root, ready_time),
        )
        .await
    }

    async fn upsert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()> {
        self.call("upsert_monitored_tx", self.inner.upsert_monitored_tx(tx))
            .await
    }

    async fn get_monitored_tx(&self, id: DepositId) -> StorageResult<Option<MonitoredTx>> {
        self.call("get_monitored_tx", self.inner.get_monitored_tx(id))
            .await
    }

    async fn get_max_live_nonce(&self, from: &Address) -> StorageResult<Option<u64>> {
        self.call("get_max_live_nonce", self.inner.get_max_live_nonce(from))
            .await
    }

    async fn get_monitored_txs_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
        limit: u32,
        offset: u32,
    ) -> StorageResult<Vec<MonitoredTx>> {
        self.call(
            "get_monitored_txs_by_status",
            self.inner.get_monitored_txs_by_status(statuses, limit, offset),
        )
        .await
    }
}

#[async_trait]
impl<T> LedgerStore for Timed<T>
where
    T: Deref + Send + Sync,
    T::Target: LedgerStore,
{
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>> {
        let tx = self.call("begin", self.inner.begin()).await?;
        Ok(Box::new(Timed::new(tx, self.timeout)))
    }
}

#[async_trait]
impl LedgerTx for Timed<Box<dyn LedgerTx>> {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let Timed { inner, timeout } = *self;
        let wrapper = Timed::new((), timeout);
        wrapper.call("commit", inner.commit()).await
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        let Timed { inner, timeout } = *self;
        let wrapper = Timed::new((), timeout);
        wrapper.call("rollback", inner.rollback()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryLedger;
    use crate::testing::deposit;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_passes_calls_through() {
        let inner: Arc<dyn LedgerStore> = Arc::new(MemoryLedger::new());
        let store = Timed::new(inner, Duration::from_secs(5));

        let tx = store.begin().await.unwrap();
        tx.add_deposit(&deposit(0, 1)).await.unwrap();
        tx.commit().await.unwrap();

        assert!(store.get_deposit(DepositId::new(0, 1)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_deadline_exceeded() {
        let ledger = MemoryLedger::new();
        let held = ledger.begin().await.unwrap();

        let inner: Arc<dyn LedgerStore> = Arc::new(ledger);
        let store = Timed::new(inner, Duration::from_millis(20));
        let result = store.get_deposit(DepositId::new(0, 1)).await;
        assert!(matches!(result, Err(StorageError::Timeout(_))));

        drop(held);
    }
}
