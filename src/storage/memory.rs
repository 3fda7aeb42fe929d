//! In-Memory Ledger
//!
//! Hand-written fake of the ledger used by tests and local runs.
//! Data is lost when the service restarts.
//!
//! Transactions take the ledger lock for their whole lifetime and work on
//! a copy of the state, so concurrent transactions are serialized and a
//! dropped transaction leaves no trace.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::traits::{LedgerOps, LedgerStore, LedgerTx, StorageError, StorageResult};
use crate::types::{
    Block, Claim, Deposit, DepositId, DepositKey, ExitRoot, LeafType, MonitoredTx,
    MonitoredTxStatus, NetworkId,
};

#[derive(Debug, Clone, Default)]
struct LedgerState {
    blocks: BTreeMap<u64, Block>,
    deposits: BTreeMap<DepositId, Deposit>,
    /// Keyed by (deposit_count, destination network)
    claims: HashMap<(u32, NetworkId), Claim>,
    exit_roots: HashMap<(B256, NetworkId), ExitRoot>,
    monitored: BTreeMap<DepositId, MonitoredTx>,
    next_block_id: u64,
}

/// Newest first, the order every address listing uses
fn newest_first(a: &Deposit, b: &Deposit) -> std::cmp::Ordering {
    b.block_id
        .cmp(&a.block_id)
        .then(b.deposit_count.cmp(&a.deposit_count))
}

fn page<T>(items: Vec<T>, limit: u32, offset: u32) -> Vec<T> {
    items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect()
}

impl LedgerState {
    fn add_block(&mut self, block: &Block) -> u64 {
        self.next_block_id += 1;
        let id = self.next_block_id;
        let mut block = block.clone();
        block.id = id;
        self.blocks.insert(id, block);
        id
    }

    fn add_deposit(&mut self, deposit: &Deposit) -> StorageResult<()> {
        let id = deposit.id();
        if self.deposits.contains_key(&id) {
            return Err(StorageError::Duplicate(format!("deposit {}", id)));
        }
        self.deposits.insert(id, deposit.clone());
        Ok(())
    }

    fn add_claim(&mut self, claim: &Claim) -> StorageResult<()> {
        let key = (claim.index, claim.network_id);
        if self.claims.contains_key(&key) {
            return Err(StorageError::Duplicate(format!(
                "claim {}/{}",
                claim.network_id, claim.index
            )));
        }
        self.claims.insert(key, claim.clone());
        Ok(())
    }

    fn add_exit_root(&mut self, root: &ExitRoot) -> StorageResult<()> {
        let key = (root.root, root.network);
        if self.exit_roots.contains_key(&key) {
            return Err(StorageError::Duplicate(format!(
                "exit root {} on {}",
                root.root, root.network
            )));
        }
        self.exit_roots.insert(key, root.clone());
        Ok(())
    }

    fn latest_exit_root(&self, network: NetworkId) -> Option<ExitRoot> {
        self.exit_roots
            .values()
            .filter(|r| r.network == network)
            .max_by_key(|r| (r.deposit_count, r.block_id))
            .cloned()
    }

    fn deposit_by_key(&self, key: &DepositKey) -> Option<Deposit> {
        self.deposits
            .values()
            .find(|d| d.key() == *key)
            .cloned()
    }

    fn is_claimed(&self, deposit: &Deposit) -> bool {
        self.claims
            .contains_key(&(deposit.deposit_count, deposit.dest_net))
    }

    fn select<F>(&self, filter: F, limit: u32, offset: u32) -> Vec<Deposit>
    where
        F: Fn(&Deposit) -> bool,
    {
        let mut rows: Vec<Deposit> = self
            .deposits
            .values()
            .filter(|d| filter(d))
            .cloned()
            .collect();
        rows.sort_by(newest_first);
        page(rows, limit, offset)
    }

    fn mark_ready(&mut self, network: NetworkId, root: B256, ready_time: u64) -> Vec<Deposit> {
        let covered = match self.exit_roots.get(&(root, network)) {
            Some(r) => r.deposit_count,
            None => return Vec::new(),
        };

        let mut updated = Vec::new();
        for deposit in self.deposits.values_mut() {
            if deposit.network_id == network
                && deposit.deposit_count <= covered
                && deposit.mark_ready(ready_time)
            {
                updated.push(deposit.clone());
            }
        }
        updated
    }

    fn latest_ready(&self, network: NetworkId, limit: u32) -> Vec<Deposit> {
        let mut rows: Vec<Deposit> = self
            .deposits
            .values()
            .filter(|d| d.network_id == network && d.ready_for_claim && d.ready_time.is_some())
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.deposit_count.cmp(&a.deposit_count));
        page(rows, limit, 0)
    }

    fn upsert_monitored(&mut self, tx: &MonitoredTx) {
        let mut row = tx.clone();
        if let Some(existing) = self.monitored.get(&tx.deposit_id) {
            row.history.extend(existing.history.iter().copied());
            row.retired.extend(existing.retired.iter().copied());
        }
        self.monitored.insert(tx.deposit_id, row);
    }

    fn max_live_nonce(&self, from: &Address) -> Option<u64> {
        self.monitored
            .values()
            .filter(|tx| tx.from == *from && !tx.status.is_terminal())
            .map(|tx| tx.nonce)
            .max()
    }

    fn monitored_by_status(
        &self,
        statuses: &[MonitoredTxStatus],
        limit: u32,
        offset: u32,
    ) -> Vec<MonitoredTx> {
        let mut rows: Vec<MonitoredTx> = self
            .monitored
            .values()
            .filter(|tx| statuses.contains(&tx.status))
            .cloned()
            .collect();
        rows.sort_by_key(|tx| (tx.created_at, tx.deposit_id));
        page(rows, limit, offset)
    }
}

/// Implements [`LedgerOps`] for a type that can lend out `&mut LedgerState`
macro_rules! impl_ledger_ops {
    ($ty:ty) => {
        #[async_trait]
        impl LedgerOps for $ty {
            async fn add_block(&self, block: &Block) -> StorageResult<u64> {
                self.with_state(|s| Ok(s.add_block(block))).await
            }

            async fn add_deposit(&self, deposit: &Deposit) -> StorageResult<()> {
                self.with_state(|s| s.add_deposit(deposit)).await
            }

            async fn add_claim(&self, claim: &Claim) -> StorageResult<()> {
                self.with_state(|s| s.add_claim(claim)).await
            }

            async fn add_exit_root(&self, root: &ExitRoot) -> StorageResult<()> {
                self.with_state(|s| s.add_exit_root(root)).await
            }

            async fn get_latest_exit_root(
                &self,
                network: NetworkId,
            ) -> StorageResult<Option<ExitRoot>> {
                self.with_state(|s| Ok(s.latest_exit_root(network))).await
            }

            async fn get_deposit(&self, id: DepositId) -> StorageResult<Option<Deposit>> {
                self.with_state(|s| Ok(s.deposits.get(&id).cloned())).await
            }

            async fn get_deposit_by_key(&self, key: &DepositKey) -> StorageResult<Option<Deposit>> {
                self.with_state(|s| Ok(s.deposit_by_key(key))).await
            }

            async fn get_deposits(
                &self,
                dest_addr: &Address,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_state(|s| Ok(s.select(|d| d.dest_addr == *dest_addr, limit, offset)))
                    .await
            }

            async fn get_pending_deposits(
                &self,
                dest_addr: &Address,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_state(|s| {
                    Ok(s.select(
                        |d| d.dest_addr == *dest_addr && !s.is_claimed(d),
                        limit,
                        offset,
                    ))
                })
                .await
            }

            async fn get_not_ready_deposits(
                &self,
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_state(|s| Ok(s.select(|d| !d.ready_for_claim, limit, offset)))
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
                self.with_state(|s| {
                    Ok(s.select(
                        |d| {
                            d.network_id == network
                                && d.leaf_type == leaf_type
                                && d.ready_for_claim
                                && d.ready_time.map_or(false, |t| t <= ready_before)
                                && !s.is_claimed(d)
                        },
                        limit,
                        offset,
                    ))
                })
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
                self.with_state(|s| {
                    Ok(s.select(
                        |d| {
                            d.network_id == network
                                && !d.ready_for_claim
                                && (min_block..=max_block).contains(&d.block_number)
                        },
                        limit,
                        offset,
                    ))
                })
                .await
            }

            async fn get_latest_ready_deposits(
                &self,
                network: NetworkId,
                limit: u32,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_state(|s| Ok(s.latest_ready(network, limit))).await
            }

            async fn get_claim(
                &self,
                deposit_count: u32,
                network: NetworkId,
            ) -> StorageResult<Option<Claim>> {
                self.with_state(|s| Ok(s.claims.get(&(deposit_count, network)).cloned()))
                    .await
            }

            async fn mark_deposits_ready(
                &self,
                network: NetworkId,
                root: B256,
                ready_time: u64,
            ) -> StorageResult<Vec<Deposit>> {
                self.with_state(|s| Ok(s.mark_ready(network, root, ready_time)))
                    .await
            }

            async fn upsert_monitored_tx(&self, tx: &MonitoredTx) -> StorageResult<()> {
                self.with_state(|s| {
                    s.upsert_monitored(tx);
                    Ok(())
                })
                .await
            }

            async fn get_monitored_tx(&self, id: DepositId) -> StorageResult<Option<MonitoredTx>> {
                self.with_state(|s| Ok(s.monitored.get(&id).cloned())).await
            }

            async fn get_max_live_nonce(&self, from: &Address) -> StorageResult<Option<u64>> {
                self.with_state(|s| Ok(s.max_live_nonce(from))).await
            }

            async fn get_monitored_txs_by_status(
                &self,
                statuses: &[MonitoredTxStatus],
                limit: u32,
                offset: u32,
            ) -> StorageResult<Vec<MonitoredTx>> {
                self.with_state(|s| Ok(s.monitored_by_status(statuses, limit, offset)))
                    .await
            }
        }
    };
}

/// In-memory ledger
///
/// Cloning shares the same underlying state.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<AsyncMutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    async fn with_state<R>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> StorageResult<R> + Send,
    ) -> StorageResult<R> {
        let mut state = self.state.lock().await;
        f(&mut state)
    }
}

impl_ledger_ops!(MemoryLedger);

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> StorageResult<Box<dyn LedgerTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            working: Mutex::new(working),
        }))
    }
}

/// Open transaction on a [`MemoryLedger`]
pub struct MemoryTx {
    guard: OwnedMutexGuard<LedgerState>,
    working: Mutex<LedgerState>,
}

impl MemoryTx {
    async fn with_state<R>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> StorageResult<R> + Send,
    ) -> StorageResult<R> {
        let mut state = self.working.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }
}

impl_ledger_ops!(MemoryTx);

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working.into_inner().unwrap_or_else(PoisonError::into_inner);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
