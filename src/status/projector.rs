//! Status projection
//!
//! Combines ledger state and chain progress into the status and ETA a user
//! sees. Pure: no I/O, never fails. Rules are evaluated in order and the
//! first match wins.

use serde::Serialize;

use crate::common::StatusConfig;
use crate::types::{Claim, Deposit, MonitoredTx, MonitoredTxStatus, NetworkId, TransactionStatus};

/// Smoothed chain latencies, measured from a block's timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DurationEstimates {
    /// Block to committed (safe) on L2
    pub avg_commit_secs: u64,
    /// Block to verified (finalized) on L2
    pub avg_verify_secs: u64,
}

/// Everything a projection looks at
#[derive(Debug, Clone)]
pub struct ProjectionInput<'a> {
    pub deposit: &'a Deposit,
    pub claim: Option<&'a Claim>,
    pub monitored_tx: Option<&'a MonitoredTx>,
    pub l1_confirmations: u64,
    pub l2_commit_height: u64,
    pub l2_verify_height: u64,
    pub durations: DurationEstimates,
    /// Unix seconds
    pub now: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Projection {
    pub status: TransactionStatus,
    /// Always at least 1
    pub eta_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EtaSource {
    Default,
    Commit,
    Verify,
}

/// Facts the rules test, derived once per projection
struct Facts {
    claimed: bool,
    ready: bool,
    origin_l1: bool,
    l1_confirmed: bool,
    l2_committed: bool,
    auto_claim_active: bool,
}

struct Rule {
    applies: fn(&Facts) -> bool,
    status: TransactionStatus,
    eta: EtaSource,
}

const RULES: &[Rule] = &[
    Rule {
        applies: |f| f.claimed,
        status: TransactionStatus::Claimed,
        eta: EtaSource::Default,
    },
    Rule {
        applies: |f| !f.ready && f.origin_l1 && f.l1_confirmed,
        status: TransactionStatus::PendingAutoClaim,
        eta: EtaSource::Default,
    },
    Rule {
        applies: |f| !f.ready && f.origin_l1,
        status: TransactionStatus::Created,
        eta: EtaSource::Default,
    },
    Rule {
        applies: |f| !f.ready && f.l2_committed,
        status: TransactionStatus::PendingVerification,
        eta: EtaSource::Verify,
    },
    Rule {
        applies: |f| !f.ready,
        status: TransactionStatus::Created,
        eta: EtaSource::Commit,
    },
    Rule {
        applies: |f| f.origin_l1 && f.auto_claim_active,
        status: TransactionStatus::PendingAutoClaim,
        eta: EtaSource::Default,
    },
    Rule {
        applies: |_| true,
        status: TransactionStatus::PendingUserClaim,
        eta: EtaSource::Default,
    },
];

/// Applies the status rules with the configured thresholds
#[derive(Debug, Clone)]
pub struct StatusProjector {
    config: StatusConfig,
}

impl StatusProjector {
    pub fn new(config: StatusConfig) -> Self {
        Self { config }
    }

    pub fn l1_network(&self) -> NetworkId {
        self.config.l1_network_id
    }

    /// Default ETA for deposits originating on `network`
    pub fn default_eta(&self, network: NetworkId) -> u64 {
        let secs = if network == self.config.l1_network_id {
            self.config.l1_default_eta_secs
        } else {
            self.config.l2_default_eta_secs
        };
        secs.max(1)
    }

    pub fn project(&self, input: &ProjectionInput<'_>) -> Projection {
        let deposit = input.deposit;
        let facts = Facts {
            claimed: input.claim.is_some(),
            ready: deposit.ready_for_claim,
            origin_l1: deposit.network_id == self.config.l1_network_id,
            l1_confirmed: input.l1_confirmations >= self.config.l1_required_confirmations,
            l2_committed: input.l2_commit_height >= deposit.block_number,
            auto_claim_active: input
                .monitored_tx
                .map_or(false, |tx| tx.status != MonitoredTxStatus::Failed),
        };

        // The last rule always matches
        let rule = RULES
            .iter()
            .find(|r| (r.applies)(&facts))
            .unwrap_or(&RULES[RULES.len() - 1]);

        Projection {
            status: rule.status,
            eta_secs: self.eta(rule.eta, input),
        }
    }

    fn eta(&self, source: EtaSource, input: &ProjectionInput<'_>) -> u64 {
        let deposit = input.deposit;
        let elapsed = input.now.saturating_sub(deposit.time);
        let remaining = |avg: u64| {
            if avg == 0 {
                self.default_eta(deposit.network_id)
            } else {
                avg.saturating_sub(elapsed)
            }
        };

        let secs = match source {
            EtaSource::Default => self.default_eta(deposit.network_id),
            EtaSource::Commit => remaining(input.durations.avg_commit_secs),
            EtaSource::Verify if input.l2_verify_height >= deposit.block_number => 1,
            EtaSource::Verify => remaining(input.durations.avg_verify_secs),
        };
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{claim_for, deposit, monitored_tx};

    fn projector() -> StatusProjector {
        StatusProjector::new(StatusConfig {
            l1_network_id: 0,
            l1_required_confirmations: 10,
            l1_default_eta_secs: 900,
            l2_default_eta_secs: 3600,
            ..StatusConfig::default()
        })
    }

    fn input(deposit: &Deposit) -> ProjectionInput<'_> {
        ProjectionInput {
            deposit,
            claim: None,
            monitored_tx: None,
            l1_confirmations: 0,
            l2_commit_height: 0,
            l2_verify_height: 0,
            durations: DurationEstimates::default(),
            now: deposit.time,
        }
    }

    #[test]
    fn test_l1_deposit_without_confirmations_is_created() {
        let d = deposit(0, 1);
        let p = projector().project(&input(&d));
        assert_eq!(p.status, TransactionStatus::Created);
        assert_eq!(p.eta_secs, 900);
    }

    #[test]
    fn test_confirmed_l1_deposit_is_auto_claimed() {
        let d = deposit(0, 1);
        let p = projector().project(&ProjectionInput {
            l1_confirmations: 10,
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::PendingAutoClaim);
    }

    #[test]
    fn test_failed_claim_tx_falls_back_to_user_claim() {
        let mut d = deposit(0, 1);
        d.mark_ready(d.time + 10);
        let mut tx = monitored_tx(d.id(), d.time);
        tx.mark_failed("reverted".into(), d.time + 20);

        let p = projector().project(&ProjectionInput {
            monitored_tx: Some(&tx),
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::PendingUserClaim);
    }

    #[test]
    fn test_active_claim_tx_is_auto_claim() {
        let mut d = deposit(0, 1);
        d.mark_ready(d.time + 10);
        let tx = monitored_tx(d.id(), d.time);

        let p = projector().project(&ProjectionInput {
            monitored_tx: Some(&tx),
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::PendingAutoClaim);
    }

    #[test]
    fn test_claim_wins_over_everything() {
        let mut d = deposit(0, 1);
        d.mark_ready(d.time);
        let claim = claim_for(&d);
        let tx = monitored_tx(d.id(), d.time);

        let p = projector().project(&ProjectionInput {
            claim: Some(&claim),
            monitored_tx: Some(&tx),
            l1_confirmations: 100,
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::Claimed);
    }

    #[test]
    fn test_l2_deposit_below_commit_height_uses_commit_eta() {
        let d = deposit(1, 1);
        let p = projector().project(&ProjectionInput {
            l2_commit_height: d.block_number - 1,
            durations: DurationEstimates {
                avg_commit_secs: 600,
                avg_verify_secs: 1800,
            },
            now: d.time + 100,
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::Created);
        assert_eq!(p.eta_secs, 500);
    }

    #[test]
    fn test_committed_l2_deposit_is_pending_verification() {
        let d = deposit(1, 1);
        let base = ProjectionInput {
            l2_commit_height: d.block_number,
            durations: DurationEstimates {
                avg_commit_secs: 600,
                avg_verify_secs: 1800,
            },
            now: d.time + 800,
            ..input(&d)
        };
        let p = projector().project(&base);
        assert_eq!(p.status, TransactionStatus::PendingVerification);
        assert_eq!(p.eta_secs, 1000);

        let verified = projector().project(&ProjectionInput {
            l2_verify_height: d.block_number,
            ..base
        });
        assert_eq!(verified.eta_secs, 1);
    }

    #[test]
    fn test_eta_never_below_one() {
        let d = deposit(1, 1);
        let p = projector().project(&ProjectionInput {
            durations: DurationEstimates {
                avg_commit_secs: 60,
                avg_verify_secs: 120,
            },
            now: d.time + 10_000,
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::Created);
        assert_eq!(p.eta_secs, 1);
    }

    #[test]
    fn test_ready_l2_deposit_is_user_claim() {
        let mut d = deposit(1, 1);
        d.mark_ready(d.time);
        let tx = monitored_tx(d.id(), d.time);
        let p = projector().project(&ProjectionInput {
            monitored_tx: Some(&tx),
            ..input(&d)
        });
        assert_eq!(p.status, TransactionStatus::PendingUserClaim);
    }
}
