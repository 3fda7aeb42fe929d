//! Bridge query service
//!
//! Everything the HTTP handlers need, independent of axum: paginated
//! listings with projected status, ETA defaults and manual claims.

use alloy_primitives::{Address, B256};
use serde::Serialize;
use std::sync::Arc;

use crate::claimtx::ClaimTxManager;
use crate::clock::Clock;
use crate::common::{ApiConfig, BridgeError, Result};
use crate::readiness::ReadinessTracker;
use crate::status::{ChainProgress, DurationEstimates, StatusProjector};
use crate::storage::SharedLedger;
use crate::types::{
    to_hex, Deposit, DepositKey, LeafType, MonitoredTx, MonitoredTxStatus, NetworkId,
    TransactionStatus,
};

/// One page of results; `has_next` is set when more rows exist past it
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_next: bool,
}

impl<T> Page<T> {
    /// Build a page from `limit + 1` fetched rows
    fn from_overfetch(mut rows: Vec<T>, limit: u32) -> Self {
        let has_next = rows.len() > limit as usize;
        rows.truncate(limit as usize);
        Self {
            items: rows,
            has_next,
        }
    }
}

/// A deposit as shown to wallets
#[derive(Debug, Clone, Serialize)]
pub struct TransactionView {
    pub leaf_type: LeafType,
    pub orig_net: NetworkId,
    pub orig_addr: Address,
    /// Decimal string
    pub amount: String,
    pub network_id: NetworkId,
    pub dest_net: NetworkId,
    pub dest_addr: Address,
    pub deposit_count: u32,
    pub block_number: u64,
    pub tx_hash: B256,
    /// Decimal string
    pub global_index: String,
    pub metadata: String,
    pub ready_for_claim: bool,
    pub ready_time: Option<u64>,
    pub claim_tx_hash: Option<B256>,
    pub status: TransactionStatus,
    pub estimate_time: u64,
    pub time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoredTxView {
    pub network_id: NetworkId,
    pub deposit_count: u32,
    pub from: Address,
    pub to: Address,
    pub nonce: u64,
    pub gas: u64,
    pub gas_price: String,
    pub status: MonitoredTxStatus,
    pub current_hash: Option<B256>,
    pub history: Vec<B256>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<MonitoredTx> for MonitoredTxView {
    fn from(tx: MonitoredTx) -> Self {
        Self {
            network_id: tx.deposit_id.network_id,
            deposit_count: tx.deposit_id.deposit_count,
            from: tx.from,
            to: tx.to,
            nonce: tx.nonce,
            gas: tx.gas,
            gas_price: tx.gas_price.to_string(),
            status: tx.status,
            current_hash: tx.current_hash,
            history: tx.history.into_iter().collect(),
            attempts: tx.attempts,
            last_error: tx.last_error,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateView {
    pub l1_eta_secs: u64,
    pub l2_eta_secs: u64,
    pub durations: DurationEstimates,
}

pub struct BridgeService {
    config: ApiConfig,
    ledger: SharedLedger,
    projector: StatusProjector,
    progress: Arc<ChainProgress>,
    readiness: Arc<ReadinessTracker>,
    claimer: Option<Arc<ClaimTxManager>>,
    clock: Arc<dyn Clock>,
}

impl BridgeService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ApiConfig,
        ledger: SharedLedger,
        projector: StatusProjector,
        progress: Arc<ChainProgress>,
        readiness: Arc<ReadinessTracker>,
        claimer: Option<Arc<ClaimTxManager>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            projector,
            progress,
            readiness,
            claimer,
            clock,
        }
    }

    /// Zero means the default page size; anything larger is capped
    pub fn page_limit(&self, requested: u32) -> u32 {
        let limit = if requested == 0 {
            self.config.default_page_limit
        } else {
            requested
        };
        limit.clamp(1, self.config.max_page_limit.max(1))
    }

    async fn views(&self, deposits: Vec<Deposit>) -> Result<Vec<TransactionView>> {
        let snapshot = self.progress.snapshot().await;
        let now = self.clock.now();
        let l1 = self.projector.l1_network();

        let mut views = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            let claim = self
                .ledger
                .get_claim(deposit.deposit_count, deposit.dest_net)
                .await?;
            let monitored_tx = self.ledger.get_monitored_tx(deposit.id()).await?;
            let projection = self.projector.project_with(
                &deposit,
                claim.as_ref(),
                monitored_tx.as_ref(),
                &snapshot,
                now,
            );

            views.push(TransactionView {
                leaf_type: deposit.leaf_type,
                orig_net: deposit.orig_net,
                orig_addr: deposit.orig_addr,
                amount: deposit.amount.to_string(),
                network_id: deposit.network_id,
                dest_net: deposit.dest_net,
                dest_addr: deposit.dest_addr,
                deposit_count: deposit.deposit_count,
                block_number: deposit.block_number,
                tx_hash: deposit.tx_hash,
                global_index: deposit.global_index(l1, self.config.rollup_index).to_string(),
                metadata: to_hex(&deposit.metadata),
                ready_for_claim: deposit.ready_for_claim,
                ready_time: deposit.ready_time,
                claim_tx_hash: claim.map(|c| c.tx_hash),
                status: projection.status,
                estimate_time: projection.eta_secs,
                time: deposit.time,
            });
        }
        Ok(views)
    }

    /// All deposits to `dest_addr`, newest first
    pub async fn transactions(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> Result<Page<TransactionView>> {
        let limit = self.page_limit(limit);
        let rows = self.ledger.get_deposits(dest_addr, limit + 1, offset).await?;
        let page = Page::from_overfetch(rows, limit);
        Ok(Page {
            items: self.views(page.items).await?,
            has_next: page.has_next,
        })
    }

    /// Deposits to `dest_addr` without a claim
    pub async fn pending(
        &self,
        dest_addr: &Address,
        limit: u32,
        offset: u32,
    ) -> Result<Page<TransactionView>> {
        let limit = self.page_limit(limit);
        let rows = self
            .ledger
            .get_pending_deposits(dest_addr, limit + 1, offset)
            .await?;
        let page = Page::from_overfetch(rows, limit);
        Ok(Page {
            items: self.views(page.items).await?,
            has_next: page.has_next,
        })
    }

    pub async fn not_ready(&self, limit: u32, offset: u32) -> Result<Page<TransactionView>> {
        let limit = self.page_limit(limit);
        let rows = self.ledger.get_not_ready_deposits(limit + 1, offset).await?;
        let page = Page::from_overfetch(rows, limit);
        Ok(Page {
            items: self.views(page.items).await?,
            has_next: page.has_next,
        })
    }

    /// Claimable deposits that have been ready for at least the minimum age
    pub async fn ready_pending(
        &self,
        network: NetworkId,
        leaf_type: LeafType,
        limit: u32,
        offset: u32,
    ) -> Result<Page<TransactionView>> {
        let limit = self.page_limit(limit);
        let rows = self
            .readiness
            .list_claimable(network, leaf_type, limit + 1, offset)
            .await?;
        let page = Page::from_overfetch(rows, limit);
        Ok(Page {
            items: self.views(page.items).await?,
            has_next: page.has_next,
        })
    }

    pub async fn monitored_txs(
        &self,
        statuses: &[MonitoredTxStatus],
        limit: u32,
        offset: u32,
    ) -> Result<Page<MonitoredTxView>> {
        let limit = self.page_limit(limit);
        let rows = self
            .ledger
            .get_monitored_txs_by_status(statuses, limit + 1, offset)
            .await?;
        let page = Page::from_overfetch(rows, limit);
        Ok(Page {
            items: page.items.into_iter().map(MonitoredTxView::from).collect(),
            has_next: page.has_next,
        })
    }

    pub async fn estimate_time(&self) -> EstimateView {
        let snapshot = self.progress.snapshot().await;
        let l1 = self.projector.l1_network();
        // Any id other than L1 yields the L2 default
        let l2 = l1.wrapping_add(1);
        EstimateView {
            l1_eta_secs: self.projector.default_eta(l1),
            l2_eta_secs: self.projector.default_eta(l2),
            durations: snapshot.durations,
        }
    }

    /// Claim an L1 deposit on the user's behalf
    pub async fn manual_claim(&self, key: &DepositKey) -> Result<B256> {
        match &self.claimer {
            Some(claimer) => claimer.submit_manual_claim(key).await,
            None => Err(BridgeError::transient("claimer is not running in this process")),
        }
    }
}
