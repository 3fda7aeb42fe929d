//! Readiness Tracker
//!
//! Flips deposits to ready when an exit root covering them arrives, and
//! serves the claimable listing. Applying a root is a single store
//! statement, so replays and catch-up passes are harmless.

use alloy_primitives::B256;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::common::{log_readiness_event, ReadinessConfig, Result};
use crate::notify::{publish_transition, SharedNotifier};
use crate::status::{ChainProgress, StatusProjector};
use crate::storage::SharedLedger;
use crate::types::{Deposit, ExitRoot, LeafType, NetworkId, StatusEvent};

pub struct ReadinessTracker {
    config: ReadinessConfig,
    ledger: SharedLedger,
    projector: StatusProjector,
    progress: Arc<ChainProgress>,
    notifier: SharedNotifier,
    clock: Arc<dyn Clock>,
}

impl ReadinessTracker {
    pub fn new(
        config: ReadinessConfig,
        ledger: SharedLedger,
        projector: StatusProjector,
        progress: Arc<ChainProgress>,
        notifier: SharedNotifier,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            ledger,
            projector,
            progress,
            notifier,
            clock,
        }
    }

    /// Apply an exit root of `network`, returning the deposits it made ready
    pub async fn on_exit_root(&self, network: NetworkId, root: B256) -> Result<Vec<Deposit>> {
        let now = self.clock.now();
        let updated = match self.ledger.mark_deposits_ready(network, root, now).await {
            Ok(updated) => updated,
            Err(e) => {
                log_readiness_event(network, &root.to_string(), 0, Some(&e.to_string()));
                return Err(e.into());
            }
        };
        log_readiness_event(network, &root.to_string(), updated.len(), None);

        for deposit in &updated {
            self.publish_ready(deposit, now).await;
        }
        Ok(updated)
    }

    async fn publish_ready(&self, deposit: &Deposit, now: u64) {
        let lookups = async {
            let claim = self
                .ledger
                .get_claim(deposit.deposit_count, deposit.dest_net)
                .await?;
            let monitored_tx = self.ledger.get_monitored_tx(deposit.id()).await?;
            Ok::<_, crate::storage::StorageError>((claim, monitored_tx))
        };
        let (claim, monitored_tx) = match lookups.await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(target: "xbridge::readiness", deposit = %deposit.id(), error = %e, "status event skipped");
                return;
            }
        };

        let snapshot = self.progress.snapshot().await;
        let mut before = deposit.clone();
        before.ready_for_claim = false;
        before.ready_time = None;

        let old = self
            .projector
            .project_with(&before, claim.as_ref(), monitored_tx.as_ref(), &snapshot, now);
        let new = self
            .projector
            .project_with(deposit, claim.as_ref(), monitored_tx.as_ref(), &snapshot, now);
        publish_transition(
            self.notifier.as_ref(),
            StatusEvent::new(deposit.key(), old.status, new.status, now),
        );
    }

    /// Ready, unclaimed deposits that have been ready for at least the minimum age
    pub async fn list_claimable(
        &self,
        network: NetworkId,
        leaf_type: LeafType,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Deposit>> {
        let ready_before = self
            .clock
            .now()
            .saturating_sub(self.config.min_ready_age_secs);
        Ok(self
            .ledger
            .get_claimable_deposits(network, leaf_type, limit, offset, ready_before)
            .await?)
    }

    /// Re-apply the latest stored root of every configured network
    pub async fn tick(&self) -> Result<usize> {
        let mut total = 0;
        for &network in &self.config.networks {
            if let Some(root) = self.ledger.get_latest_exit_root(network).await? {
                total += self.on_exit_root(network, root.root).await?.len();
            }
        }
        Ok(total)
    }

    /// Consume exit root events and run catch-up passes until cancelled
    pub async fn run(
        &self,
        mut roots: mpsc::Receiver<ExitRoot>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            target: "xbridge::readiness",
            networks = ?self.config.networks,
            interval_secs = self.config.poll_interval_secs,
            "readiness tracker started"
        );
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        let mut channel_open = true;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                root = roots.recv(), if channel_open => match root {
                    Some(root) => {
                        if let Err(e) = self.on_exit_root(root.network, root.root).await {
                            tracing::warn!(target: "xbridge::readiness", error = %e, "exit root not applied");
                        }
                    }
                    None => channel_open = false,
                },
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(0) => {}
                        Ok(n) => tracing::info!(target: "xbridge::readiness", updated = n, "catch-up pass"),
                        Err(e) => tracing::error!(target: "xbridge::readiness", error = %e, "catch-up failed"),
                    }
                }
            }
        }

        tracing::info!(target: "xbridge::readiness", "readiness tracker stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::common::StatusConfig;
    use crate::notify::MemoryNotifier;
    use crate::storage::{LedgerOps, MemoryLedger};
    use crate::testing::{claim_for, deposit, exit_root};
    use crate::types::{DepositId, TransactionStatus};

    fn tracker(ledger: &MemoryLedger, pushes: Arc<MemoryNotifier>, clock: Arc<ManualClock>) -> ReadinessTracker {
        ReadinessTracker::new(
            ReadinessConfig {
                networks: vec![0, 1],
                poll_interval_secs: 1,
                min_ready_age_secs: 300,
            },
            Arc::new(ledger.clone()),
            StatusProjector::new(StatusConfig::default()),
            Arc::new(ChainProgress::new(0.2)),
            pushes,
            clock,
        )
    }

    #[tokio::test]
    async fn test_root_marks_covered_deposits_once() {
        let ledger = MemoryLedger::new();
        for count in 0..3 {
            ledger.add_deposit(&deposit(0, count)).await.unwrap();
        }
        let root = exit_root(0, 1, 0x10);
        ledger.add_exit_root(&root).await.unwrap();
        let pushes = Arc::new(MemoryNotifier::new());
        let tracker = tracker(&ledger, pushes.clone(), Arc::new(ManualClock::new(5_000)));

        let updated = tracker.on_exit_root(0, root.root).await.unwrap();
        assert_eq!(updated.len(), 2);
        assert_eq!(pushes.messages().len(), 2);
        assert!(pushes.messages()[0].push_content.contains("PENDING_USER_CLAIM"));

        let again = tracker.on_exit_root(0, root.root).await.unwrap();
        assert!(again.is_empty());
        assert_eq!(pushes.messages().len(), 2);

        let untouched = ledger.get_deposit(DepositId::new(0, 2)).await.unwrap().unwrap();
        assert!(!untouched.ready_for_claim);
    }

    #[tokio::test]
    async fn test_claimed_deposit_publishes_nothing() {
        let ledger = MemoryLedger::new();
        let d = deposit(1, 0);
        ledger.add_deposit(&d).await.unwrap();
        ledger.add_claim(&claim_for(&d)).await.unwrap();
        let root = exit_root(1, 0, 0x20);
        ledger.add_exit_root(&root).await.unwrap();
        let pushes = Arc::new(MemoryNotifier::new());
        let tracker = tracker(&ledger, pushes.clone(), Arc::new(ManualClock::new(5_000)));

        let updated = tracker.on_exit_root(1, root.root).await.unwrap();
        assert_eq!(updated.len(), 1);
        // CLAIMED before and after
        assert!(pushes.messages().is_empty());
    }

    #[tokio::test]
    async fn test_list_claimable_respects_min_age() {
        let ledger = MemoryLedger::new();
        ledger.add_deposit(&deposit(0, 0)).await.unwrap();
        let root = exit_root(0, 0, 0x30);
        ledger.add_exit_root(&root).await.unwrap();
        let clock = Arc::new(ManualClock::new(10_000));
        let tracker = tracker(&ledger, Arc::new(MemoryNotifier::new()), clock.clone());
        tracker.on_exit_root(0, root.root).await.unwrap();

        let fresh = tracker.list_claimable(0, LeafType::Asset, 10, 0).await.unwrap();
        assert!(fresh.is_empty());

        clock.advance(300);
        let aged = tracker.list_claimable(0, LeafType::Asset, 10, 0).await.unwrap();
        assert_eq!(aged.len(), 1);
        assert_eq!(aged[0].ready_time, Some(10_000));
    }

    #[tokio::test]
    async fn test_tick_catches_up_from_latest_root() {
        let ledger = MemoryLedger::new();
        ledger.add_deposit(&deposit(0, 0)).await.unwrap();
        ledger.add_deposit(&deposit(1, 0)).await.unwrap();
        ledger.add_exit_root(&exit_root(0, 0, 0x41)).await.unwrap();
        ledger.add_exit_root(&exit_root(1, 0, 0x42)).await.unwrap();
        let tracker = tracker(&ledger, Arc::new(MemoryNotifier::new()), Arc::new(ManualClock::new(1)));

        assert_eq!(tracker.tick().await.unwrap(), 2);
        assert_eq!(tracker.tick().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_applies_channel_roots_and_stops() {
        let ledger = MemoryLedger::new();
        ledger.add_deposit(&deposit(0, 0)).await.unwrap();
        let root = exit_root(0, 0, 0x50);
        ledger.add_exit_root(&root).await.unwrap();
        let pushes = Arc::new(MemoryNotifier::new());
        let tracker = Arc::new(tracker(&ledger, pushes.clone(), Arc::new(ManualClock::new(1))));

        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = {
            let tracker = tracker.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { tracker.run(rx, cancel).await })
        };

        tx.send(root).await.unwrap();
        for _ in 0..50 {
            if !pushes.messages().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let d = ledger.get_deposit(DepositId::new(0, 0)).await.unwrap().unwrap();
        assert!(d.ready_for_claim);
        assert_eq!(pushes.messages().len(), 1);
        let event: Vec<StatusEvent> = serde_json::from_str(&pushes.messages()[0].push_content).unwrap();
        assert_eq!(event[0].old_status, TransactionStatus::Created);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
