//! Monitored Claim Transaction Manager
//!
//! Owns the on-chain claim for each ready deposit:
//!
//! ```text
//! created ──broadcast──▶ sent ──receipt ≥ depth──▶ confirmed
//!    │                    │ ▲
//!    │                    │ └─ no receipt: bump gas, same nonce, rebroadcast
//!    └──budget spent──▶ failed ◀── reverted / gas cap / budget spent
//! ```
//!
//! Rows are created check-then-insert inside one ledger transaction, so a
//! deposit gets at most one row no matter how many callers race. Every
//! change is persisted before its status event is published.

use alloy_primitives::{Address, B256, U256};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::calldata::claim_calldata;
use super::chain::{ChainClient, TxRequest};
use super::proof::ProofProvider;
use crate::clock::Clock;
use crate::common::{log_claim_event, BridgeError, ClaimTxConfig, Precondition, Result};
use crate::notify::{publish_transition, SharedNotifier};
use crate::status::{ChainProgress, StatusProjector};
use crate::storage::{LedgerOps, SharedLedger};
use crate::types::{
    Deposit, DepositId, DepositKey, LeafType, MonitoredTx, MonitoredTxStatus, StatusEvent,
    TransactionStatus,
};

/// Claim call ready to be stored and broadcast
struct BuiltClaim {
    data: Vec<u8>,
    gas: u64,
    gas_price: U256,
}

/// Counters for one pass of the manager loop
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    pub created: usize,
    pub broadcast: usize,
    pub bumped: usize,
    pub confirmed: usize,
    pub failed: usize,
}

impl TickResult {
    pub fn has_activity(&self) -> bool {
        self.created > 0
            || self.broadcast > 0
            || self.bumped > 0
            || self.confirmed > 0
            || self.failed > 0
    }
}

impl std::fmt::Display for TickResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "created: {}, broadcast: {}, bumped: {}, confirmed: {}, failed: {}",
            self.created, self.broadcast, self.bumped, self.confirmed, self.failed
        )
    }
}

/// Outcome of checking one sent row
enum PollOutcome {
    Waiting,
    Bumped,
    Confirmed,
    Failed,
}

/// Load a deposit and check it can still be claimed
async fn claimable_deposit<L: LedgerOps + ?Sized>(ledger: &L, id: DepositId) -> Result<Deposit> {
    let deposit = ledger
        .get_deposit(id)
        .await?
        .ok_or_else(|| BridgeError::not_found(format!("deposit {}", id)))?;
    if !deposit.ready_for_claim {
        return Err(Precondition::NotReady.into());
    }
    if ledger
        .get_claim(deposit.deposit_count, deposit.dest_net)
        .await?
        .is_some()
    {
        return Err(Precondition::AlreadyClaimed.into());
    }
    Ok(deposit)
}

/// Nonce for a new attempt: at least the chain's pending nonce, the local
/// counter, and one past every live row from `from` in the ledger
///
/// Rows that were created but never broadcast are invisible to the chain,
/// so the ledger read must happen inside the creating transaction.
async fn assign_nonce<L: LedgerOps + ?Sized>(
    ledger: &L,
    from: Address,
    pending: u64,
    local: Option<u64>,
) -> Result<u64> {
    let live = ledger.get_max_live_nonce(&from).await?;
    Ok(pending
        .max(local.unwrap_or(0))
        .max(live.map_or(0, |n| n + 1)))
}

/// Broadcast retry delay: exponential in the attempt count, capped, plus up to 25% jitter
fn backoff_secs(config: &ClaimTxConfig, attempts: u32) -> u64 {
    let exp = config
        .backoff_base_secs
        .saturating_mul(1u64.checked_shl(attempts.min(32)).unwrap_or(u64::MAX));
    let delay = exp.min(config.backoff_max_secs).max(1);
    let jitter = rand::thread_rng().gen_range(0..=delay / 4);
    delay + jitter
}

/// Next gas price for a resubmission, `None` once the cap is already reached
fn bumped_gas_price(current: U256, percent: u64, cap: Option<U256>) -> Option<U256> {
    let bump = (current * U256::from(percent) / U256::from(100u8)).max(U256::from(1u8));
    let next = current.saturating_add(bump);
    match cap {
        Some(cap) if current >= cap => None,
        Some(cap) => Some(next.min(cap)),
        None => Some(next),
    }
}

pub struct ClaimTxManager {
    config: ClaimTxConfig,
    ledger: SharedLedger,
    chain: Arc<dyn ChainClient>,
    proofs: Arc<dyn ProofProvider>,
    projector: StatusProjector,
    progress: Arc<ChainProgress>,
    notifier: SharedNotifier,
    clock: Arc<dyn Clock>,
    /// Next nonce handed out by this process; held across row creation
    nonce: Mutex<Option<u64>>,
}

impl ClaimTxManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ClaimTxConfig,
        ledger: SharedLedger,
        chain: Arc<dyn ChainClient>,
        proofs: Arc<dyn ProofProvider>,
        projector: StatusProjector,
        progress: Arc<ChainProgress>,
        notifier: SharedNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            chain,
            proofs,
            projector,
            progress,
            notifier,
            clock,
            nonce: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClaimTxConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    async fn build_claim(&self, deposit: &Deposit) -> Result<BuiltClaim> {
        let proof = self
            .proofs
            .claim_proof(deposit.deposit_count, deposit.network_id)
            .await?;
        let data = claim_calldata(
            deposit,
            &proof,
            self.projector.l1_network(),
            self.config.rollup_index,
        );

        let mut gas_price = self.chain.gas_price().await?;
        if let Some(cap) = self.config.max_gas_price {
            gas_price = gas_price.min(cap);
        }
        let gas = self
            .chain
            .estimate_gas(&TxRequest {
                from: self.config.claimer_address,
                to: self.config.bridge_address,
                value: U256::ZERO,
                data: data.clone(),
                nonce: None,
                gas: None,
                gas_price: None,
            })
            .await?;

        Ok(BuiltClaim {
            data,
            gas,
            gas_price,
        })
    }

    /// Create the monitored tx for a ready deposit
    ///
    /// Fails with `PreconditionFailed` when the deposit is not ready, already
    /// claimed, or already has a row.
    pub async fn create(&self, id: DepositId) -> Result<MonitoredTx> {
        // Cheap check first so proof and gas calls are skipped for obvious misses
        let deposit = claimable_deposit(self.ledger.as_ref(), id).await?;
        if self.ledger.get_monitored_tx(id).await?.is_some() {
            return Err(Precondition::ClaimInFlight.into());
        }
        let old_status = self.status_of(&deposit, None).await?;

        let built = self.build_claim(&deposit).await?;

        let mut next_nonce = self.nonce.lock().await;
        let pending = self
            .chain
            .pending_nonce(self.config.claimer_address)
            .await?;

        let tx = self.ledger.begin().await?;
        claimable_deposit(&*tx, id).await?;
        if tx.get_monitored_tx(id).await?.is_some() {
            return Err(Precondition::ClaimInFlight.into());
        }
        let nonce = assign_nonce(&*tx, self.config.claimer_address, pending, *next_nonce).await?;
        let row = MonitoredTx::new(
            id,
            self.config.claimer_address,
            self.config.bridge_address,
            nonce,
            built.data,
            built.gas,
            built.gas_price,
            self.clock.now(),
        );
        tx.upsert_monitored_tx(&row).await?;
        tx.commit().await?;
        *next_nonce = Some(nonce + 1);
        drop(next_nonce);

        log_claim_event("claim_created", &id.to_string(), None, true, None);
        self.publish(&deposit, old_status, Some(&row)).await;
        Ok(row)
    }

    /// Put a failed row back in `created` with a fresh nonce and gas
    async fn rearm(&self, deposit: &Deposit, failed: &MonitoredTx) -> Result<MonitoredTx> {
        let id = deposit.id();
        let old_status = self.status_of(deposit, Some(failed)).await?;
        let built = self.build_claim(deposit).await?;

        let mut next_nonce = self.nonce.lock().await;
        let pending = self
            .chain
            .pending_nonce(self.config.claimer_address)
            .await?;

        let tx = self.ledger.begin().await?;
        claimable_deposit(&*tx, id).await?;
        let mut row = match tx.get_monitored_tx(id).await? {
            Some(row) if row.status == MonitoredTxStatus::Failed => row,
            Some(_) => return Err(Precondition::ClaimInFlight.into()),
            None => return Err(BridgeError::internal(format!("monitored tx {} vanished", id))),
        };
        let nonce = assign_nonce(&*tx, self.config.claimer_address, pending, *next_nonce).await?;
        row.rearm(nonce, built.data, built.gas, built.gas_price, self.clock.now());
        tx.upsert_monitored_tx(&row).await?;
        tx.commit().await?;
        *next_nonce = Some(nonce + 1);
        drop(next_nonce);

        log_claim_event("claim_rearmed", &id.to_string(), None, true, None);
        self.publish(deposit, old_status, Some(&row)).await;
        Ok(row)
    }

    /// Claim an L1 deposit on behalf of the user, returning the broadcast hash
    pub async fn submit_manual_claim(&self, key: &DepositKey) -> Result<B256> {
        if key.network_id != self.config.origin_network {
            return Err(Precondition::UnsupportedDirection.into());
        }
        let deposit = self
            .ledger
            .get_deposit_by_key(key)
            .await?
            .ok_or_else(|| BridgeError::not_found(format!("deposit {}", key)))?;
        if deposit.dest_net != self.config.dest_network {
            return Err(Precondition::UnsupportedDirection.into());
        }
        let deposit = claimable_deposit(self.ledger.as_ref(), deposit.id()).await?;

        let row = match self.ledger.get_monitored_tx(deposit.id()).await? {
            None => self.create(deposit.id()).await?,
            Some(row) if row.status == MonitoredTxStatus::Failed => {
                self.rearm(&deposit, &row).await?
            }
            Some(_) => return Err(Precondition::ClaimInFlight.into()),
        };

        let sent = self.broadcast(row).await?;
        if sent.status == MonitoredTxStatus::Failed
            && self
                .ledger
                .get_claim(deposit.deposit_count, deposit.dest_net)
                .await?
                .is_some()
        {
            return Err(Precondition::AlreadyClaimed.into());
        }
        match (sent.status, sent.current_hash) {
            (MonitoredTxStatus::Sent, Some(hash)) => Ok(hash),
            _ => Err(BridgeError::transient(
                sent.last_error
                    .unwrap_or_else(|| "claim broadcast failed".to_string()),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Broadcast and polling
    // ------------------------------------------------------------------

    /// Persist a row and publish its status change
    async fn persist(&self, before: &MonitoredTx, after: &MonitoredTx) -> Result<()> {
        self.ledger.upsert_monitored_tx(after).await?;
        if before.status == after.status {
            return Ok(());
        }
        if let Ok(Some(deposit)) = self.ledger.get_deposit(after.deposit_id).await {
            if let Ok(old_status) = self.status_of(&deposit, Some(before)).await {
                self.publish(&deposit, old_status, Some(after)).await;
            }
        }
        Ok(())
    }

    /// Broadcast a `created` row once; failures are recorded with backoff
    async fn broadcast(&self, row: MonitoredTx) -> Result<MonitoredTx> {
        let id = row.deposit_id;
        let now = self.clock.now();
        let mut next = row.clone();

        let claimed = match self.ledger.get_deposit(id).await? {
            Some(d) => self
                .ledger
                .get_claim(d.deposit_count, d.dest_net)
                .await?
                .is_some(),
            None => false,
        };
        if claimed {
            next.mark_failed("deposit already claimed".to_string(), now);
            self.persist(&row, &next).await?;
            return Ok(next);
        }

        let request = TxRequest {
            from: row.from,
            to: row.to,
            value: row.value,
            data: row.data.clone(),
            nonce: Some(row.nonce),
            gas: Some(row.gas),
            gas_price: Some(row.gas_price),
        };
        match self.chain.broadcast(&request).await {
            Ok(hash) => {
                next.mark_sent(hash, now);
                log_claim_event(
                    "claim_broadcast",
                    &id.to_string(),
                    Some(&hash.to_string()),
                    true,
                    None,
                );
            }
            Err(e) => {
                let err = e.to_string();
                let retry_at = now + backoff_secs(&self.config, row.attempts);
                next.record_broadcast_error(err.clone(), retry_at, now);
                if next.budget_exhausted(self.config.max_attempts, self.config.max_elapsed_secs, now) {
                    next.mark_failed(format!("retry budget exhausted: {}", err), now);
                }
                log_claim_event("claim_broadcast", &id.to_string(), None, false, Some(&err));
            }
        }
        self.persist(&row, &next).await?;
        Ok(next)
    }

    async fn process_created(&self, row: MonitoredTx) -> Result<MonitoredTxStatus> {
        let now = self.clock.now();
        if now < row.next_attempt_at {
            return Ok(row.status);
        }
        if row.budget_exhausted(self.config.max_attempts, self.config.max_elapsed_secs, now) {
            let mut next = row.clone();
            next.mark_failed("retry budget exhausted".to_string(), now);
            self.persist(&row, &next).await?;
            return Ok(next.status);
        }
        Ok(self.broadcast(row).await?.status)
    }

    async fn poll_sent(&self, row: MonitoredTx) -> Result<PollOutcome> {
        let id = row.deposit_id;
        let now = self.clock.now();

        for hash in &row.history {
            let receipt = match self.chain.receipt(*hash).await {
                Ok(Some(receipt)) => receipt,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(target: "xbridge::claimtx", deposit = %id, tx = %hash, error = %e, "receipt lookup failed");
                    continue;
                }
            };

            if receipt.reverted && row.is_retired(hash) {
                // Already accounted for when the row was re-armed
                continue;
            }
            let mut next = row.clone();
            if receipt.reverted {
                next.mark_failed(format!("transaction {} reverted", hash), now);
                self.persist(&row, &next).await?;
                log_claim_event("claim_reverted", &id.to_string(), Some(&hash.to_string()), false, Some("reverted"));
                return Ok(PollOutcome::Failed);
            }
            if receipt.confirmations >= self.config.required_confirmations {
                next.mark_confirmed(*hash, now);
                self.persist(&row, &next).await?;
                log_claim_event("claim_confirmed", &id.to_string(), Some(&hash.to_string()), true, None);
                return Ok(PollOutcome::Confirmed);
            }
            // Mined but shallow
            return Ok(PollOutcome::Waiting);
        }

        let last = row.last_broadcast_at.unwrap_or(row.started_at);
        if now.saturating_sub(last) < self.config.resubmit_after_secs || now < row.next_attempt_at {
            return Ok(PollOutcome::Waiting);
        }

        let mut next = row.clone();
        if row.budget_exhausted(self.config.max_attempts, self.config.max_elapsed_secs, now) {
            next.mark_failed("retry budget exhausted".to_string(), now);
            self.persist(&row, &next).await?;
            log_claim_event("claim_failed", &id.to_string(), None, false, Some("retry budget exhausted"));
            return Ok(PollOutcome::Failed);
        }

        let gas_price = match bumped_gas_price(
            row.gas_price,
            self.config.gas_bump_percent,
            self.config.max_gas_price,
        ) {
            Some(price) => price,
            None => {
                next.mark_failed("gas price cap reached".to_string(), now);
                self.persist(&row, &next).await?;
                log_claim_event("claim_failed", &id.to_string(), None, false, Some("gas price cap reached"));
                return Ok(PollOutcome::Failed);
            }
        };

        let request = TxRequest {
            from: row.from,
            to: row.to,
            value: row.value,
            data: row.data.clone(),
            nonce: Some(row.nonce),
            gas: Some(row.gas),
            gas_price: Some(gas_price),
        };
        match self.chain.broadcast(&request).await {
            Ok(hash) => {
                next.gas_price = gas_price;
                next.mark_sent(hash, now);
                log_claim_event("claim_resubmitted", &id.to_string(), Some(&hash.to_string()), true, None);
            }
            Err(e) => {
                let err = e.to_string();
                let retry_at = now + backoff_secs(&self.config, row.attempts);
                next.record_broadcast_error(err.clone(), retry_at, now);
                log_claim_event("claim_resubmitted", &id.to_string(), None, false, Some(&err));
            }
        }
        self.persist(&row, &next).await?;
        Ok(PollOutcome::Bumped)
    }

    /// Create rows for ready, unclaimed deposits that have none yet
    async fn discover(&self, cancel: &CancellationToken) -> Result<usize> {
        const MAX_PAGES: u32 = 10;
        let batch = self.config.batch_size.max(1);
        let now = self.clock.now();
        let mut created = 0;

        for leaf_type in [LeafType::Asset, LeafType::Message] {
            for page in 0..MAX_PAGES {
                if cancel.is_cancelled() || created >= batch as usize {
                    return Ok(created);
                }
                let deposits = self
                    .ledger
                    .get_claimable_deposits(
                        self.config.origin_network,
                        leaf_type,
                        batch,
                        page * batch,
                        now,
                    )
                    .await?;
                let exhausted = deposits.len() < batch as usize;

                for deposit in deposits {
                    if deposit.dest_net != self.config.dest_network
                        || self.ledger.get_monitored_tx(deposit.id()).await?.is_some()
                    {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Ok(created);
                    }
                    match self.create(deposit.id()).await {
                        Ok(_) => created += 1,
                        Err(BridgeError::PreconditionFailed(p)) => {
                            tracing::debug!(target: "xbridge::claimtx", deposit = %deposit.id(), reason = %p, "skipped");
                        }
                        Err(e) => {
                            log_claim_event("claim_create", &deposit.id().to_string(), None, false, Some(&e.to_string()));
                        }
                    }
                }
                if exhausted {
                    break;
                }
            }
        }
        Ok(created)
    }

    /// Run one pass: discover, broadcast created rows, poll sent rows
    pub async fn tick(&self, cancel: &CancellationToken) -> Result<TickResult> {
        let mut result = TickResult {
            created: self.discover(cancel).await?,
            ..TickResult::default()
        };
        let batch = self.config.batch_size.max(1);

        let created = self
            .ledger
            .get_monitored_txs_by_status(&[MonitoredTxStatus::Created], batch, 0)
            .await?;
        for row in created {
            if cancel.is_cancelled() {
                return Ok(result);
            }
            let id = row.deposit_id;
            match self.process_created(row).await {
                Ok(MonitoredTxStatus::Sent) => result.broadcast += 1,
                Ok(MonitoredTxStatus::Failed) => result.failed += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(target: "xbridge::claimtx", deposit = %id, error = %e, "broadcast step failed"),
            }
        }

        let sent = self
            .ledger
            .get_monitored_txs_by_status(&[MonitoredTxStatus::Sent], batch, 0)
            .await?;
        for row in sent {
            if cancel.is_cancelled() {
                return Ok(result);
            }
            let id = row.deposit_id;
            match self.poll_sent(row).await {
                Ok(PollOutcome::Waiting) => {}
                Ok(PollOutcome::Bumped) => result.bumped += 1,
                Ok(PollOutcome::Confirmed) => result.confirmed += 1,
                Ok(PollOutcome::Failed) => result.failed += 1,
                Err(e) => tracing::warn!(target: "xbridge::claimtx", deposit = %id, error = %e, "poll step failed"),
            }
        }

        Ok(result)
    }

    /// Run the manager loop until cancelled
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            target: "xbridge::claimtx",
            dest_network = self.config.dest_network,
            interval_secs = self.config.poll_interval_secs,
            "claim tx manager started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            // A started tick runs to completion so no persist is cut short
            match self.tick(&cancel).await {
                Ok(result) if result.has_activity() => {
                    tracing::info!(target: "xbridge::claimtx", "tick: {}", result);
                }
                Ok(_) => {}
                Err(e) => tracing::error!(target: "xbridge::claimtx", error = %e, "tick failed"),
            }
        }

        tracing::info!(target: "xbridge::claimtx", "claim tx manager stopped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Status events
    // ------------------------------------------------------------------

    async fn status_of(
        &self,
        deposit: &Deposit,
        monitored_tx: Option<&MonitoredTx>,
    ) -> Result<TransactionStatus> {
        let claim = self
            .ledger
            .get_claim(deposit.deposit_count, deposit.dest_net)
            .await?;
        let snapshot = self.progress.snapshot().await;
        Ok(self
            .projector
            .project_with(deposit, claim.as_ref(), monitored_tx, &snapshot, self.clock.now())
            .status)
    }

    async fn publish(
        &self,
        deposit: &Deposit,
        old_status: TransactionStatus,
        monitored_tx: Option<&MonitoredTx>,
    ) {
        match self.status_of(deposit, monitored_tx).await {
            Ok(new_status) => publish_transition(
                self.notifier.as_ref(),
                StatusEvent::new(deposit.key(), old_status, new_status, self.clock.now()),
            ),
            Err(e) => {
                tracing::warn!(target: "xbridge::claimtx", deposit = %deposit.id(), error = %e, "status event skipped")
            }
        }
    }
}
