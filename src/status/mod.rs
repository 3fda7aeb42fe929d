//! Status Projection Module
//!
//! - `projector`: ordered status rules and ETA computation
//! - `estimator`: chain progress snapshots and smoothed latencies

pub mod estimator;
pub mod projector;

pub use estimator::{ChainProgress, ChainSnapshot, DurationEstimator, ProgressPoller};
pub use projector::{DurationEstimates, Projection, ProjectionInput, StatusProjector};

use crate::types::{Claim, Deposit, MonitoredTx};

impl StatusProjector {
    /// Project against a chain snapshot
    pub fn project_with(
        &self,
        deposit: &Deposit,
        claim: Option<&Claim>,
        monitored_tx: Option<&MonitoredTx>,
        snapshot: &ChainSnapshot,
        now: u64,
    ) -> Projection {
        self.project(&ProjectionInput {
            deposit,
            claim,
            monitored_tx,
            l1_confirmations: snapshot.l1_confirmations(deposit),
            l2_commit_height: snapshot.l2_commit_height,
            l2_verify_height: snapshot.l2_verify_height,
            durations: snapshot.durations,
            now,
        })
    }
}
