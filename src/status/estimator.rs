//! Chain progress and smoothed latency estimates
//!
//! The poller samples the L1 head and the L2 safe/finalized heads. Each time
//! an L2 head advances, the age of the new head block is fed into an
//! exponential moving average.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use super::projector::DurationEstimates;
use crate::claimtx::chain::{BlockTag, ChainClient};
use crate::clock::Clock;
use crate::common::{BridgeError, Result};
use crate::types::Deposit;

/// Exponential moving average of a duration in seconds
#[derive(Debug, Clone, Copy)]
pub struct DurationEstimator {
    alpha: f64,
    value: Option<f64>,
}

impl DurationEstimator {
    pub fn new(alpha: f64) -> Self {
        Self { alpha, value: None }
    }

    pub fn record(&mut self, sample_secs: u64) {
        let sample = sample_secs.max(1) as f64;
        self.value = Some(match self.value {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        });
    }

    /// Current estimate, 0 until the first sample
    pub fn current(&self) -> u64 {
        self.value.map_or(0, |v| (v.round() as u64).max(1))
    }
}

/// Point-in-time view used by projections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub l1_head: u64,
    pub l2_commit_height: u64,
    pub l2_verify_height: u64,
    pub durations: DurationEstimates,
}

impl ChainSnapshot {
    /// L1 blocks mined on top of the deposit's block
    pub fn l1_confirmations(&self, deposit: &Deposit) -> u64 {
        self.l1_head.saturating_sub(deposit.block_number)
    }
}

#[derive(Debug)]
struct ProgressState {
    l1_head: u64,
    commit_height: u64,
    verify_height: u64,
    commit: DurationEstimator,
    verify: DurationEstimator,
}

/// Shared chain progress, written by the poller and read by the API
#[derive(Debug)]
pub struct ChainProgress {
    state: RwLock<ProgressState>,
}

impl ChainProgress {
    pub fn new(alpha: f64) -> Self {
        Self {
            state: RwLock::new(ProgressState {
                l1_head: 0,
                commit_height: 0,
                verify_height: 0,
                commit: DurationEstimator::new(alpha),
                verify: DurationEstimator::new(alpha),
            }),
        }
    }

    pub async fn snapshot(&self) -> ChainSnapshot {
        let state = self.state.read().await;
        ChainSnapshot {
            l1_head: state.l1_head,
            l2_commit_height: state.commit_height,
            l2_verify_height: state.verify_height,
            durations: DurationEstimates {
                avg_commit_secs: state.commit.current(),
                avg_verify_secs: state.verify.current(),
            },
        }
    }

    pub async fn record_l1_head(&self, head: u64) {
        let mut state = self.state.write().await;
        state.l1_head = state.l1_head.max(head);
    }

    /// Returns whether the committed height advanced
    pub async fn record_commit(&self, height: u64, block_time: u64, now: u64) -> bool {
        let mut state = self.state.write().await;
        if height <= state.commit_height {
            return false;
        }
        state.commit_height = height;
        state.commit.record(now.saturating_sub(block_time));
        true
    }

    /// Returns whether the verified height advanced
    pub async fn record_verify(&self, height: u64, block_time: u64, now: u64) -> bool {
        let mut state = self.state.write().await;
        if height <= state.verify_height {
            return false;
        }
        state.verify_height = height;
        state.verify.record(now.saturating_sub(block_time));
        true
    }
}

/// Polls both chains and feeds [`ChainProgress`]
pub struct ProgressPoller {
    l1: Arc<dyn ChainClient>,
    l2: Arc<dyn ChainClient>,
    progress: Arc<ChainProgress>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ProgressPoller {
    pub fn new(
        l1: Arc<dyn ChainClient>,
        l2: Arc<dyn ChainClient>,
        progress: Arc<ChainProgress>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            l1,
            l2,
            progress,
            clock,
            interval,
        }
    }

    pub async fn tick(&self) -> Result<()> {
        let head = self.l1.block_number().await?;
        self.progress.record_l1_head(head).await;

        let now = self.clock.now();
        if let Some(safe) = self.l2.block_header(BlockTag::Safe).await? {
            self.progress
                .record_commit(safe.number, safe.timestamp, now)
                .await;
        }
        if let Some(finalized) = self.l2.block_header(BlockTag::Finalized).await? {
            self.progress
                .record_verify(finalized.number, finalized.timestamp, now)
                .await;
        }
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(target: "xbridge::status", interval_secs = self.interval.as_secs(), "progress poller started");
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.tick().await {
                log_tick_error(&e);
            }
        }
        tracing::info!(target: "xbridge::status", "progress poller stopped");
        Ok(())
    }
}

fn log_tick_error(e: &BridgeError) {
    if e.is_retryable() {
        tracing::warn!(target: "xbridge::status", error = %e, "progress poll failed");
    } else {
        tracing::error!(target: "xbridge::status", error = %e, "progress poll failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::FakeChain;

    #[test]
    fn test_ema_smoothing() {
        let mut ema = DurationEstimator::new(0.5);
        assert_eq!(ema.current(), 0);
        ema.record(100);
        assert_eq!(ema.current(), 100);
        ema.record(200);
        assert_eq!(ema.current(), 150);
        ema.record(0);
        assert_eq!(ema.current(), 76);
    }

    #[tokio::test]
    async fn test_heights_only_move_forward() {
        let progress = ChainProgress::new(0.5);
        assert!(progress.record_commit(10, 1_000, 1_100).await);
        assert!(!progress.record_commit(9, 1_000, 1_200).await);
        assert!(progress.record_commit(12, 1_150, 1_350).await);

        let snap = progress.snapshot().await;
        assert_eq!(snap.l2_commit_height, 12);
        assert_eq!(snap.durations.avg_commit_secs, 150);
        assert_eq!(snap.durations.avg_verify_secs, 0);
    }

    #[tokio::test]
    async fn test_poller_tick() {
        let l1 = Arc::new(FakeChain::new());
        l1.set_block_number(500);
        let l2 = Arc::new(FakeChain::new());
        l2.set_header(BlockTag::Safe, 40, 9_900);
        l2.set_header(BlockTag::Finalized, 30, 9_000);

        let progress = Arc::new(ChainProgress::new(0.2));
        let clock = Arc::new(ManualClock::new(10_000));
        let poller = ProgressPoller::new(
            l1,
            l2,
            progress.clone(),
            clock,
            Duration::from_secs(15),
        );
        poller.tick().await.unwrap();

        let snap = progress.snapshot().await;
        assert_eq!(snap.l1_head, 500);
        assert_eq!(snap.l2_commit_height, 40);
        assert_eq!(snap.l2_verify_height, 30);
        assert_eq!(snap.durations.avg_commit_secs, 100);
        assert_eq!(snap.durations.avg_verify_secs, 1_000);
    }
}
