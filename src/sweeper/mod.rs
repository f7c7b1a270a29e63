//! Cancellation Sweeper
//!
//! Reverses a bounded batch of applied records per run, one atomic unit per
//! record. Candidates already locked by another worker are skipped rather than
//! waited on, so several sweepers can run against the same store.

mod policy;

pub use policy::{LatestAppliedPolicy, OddIdPolicy, SelectionPolicy};

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;

use crate::domain::LedgerRecord;
use crate::store::{Store, StoreError};

/// Sweep interval and batch size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    /// Time between runs (default: 3 minutes)
    pub interval: Duration,
    /// Maximum candidates per run (default: 10)
    pub batch_size: usize,
}

impl SweepSettings {
    pub fn new(interval: Duration, batch_size: usize) -> Self {
        Self {
            interval,
            batch_size,
        }
    }
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(180),
            batch_size: 10,
        }
    }
}

/// Counts from one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Candidates returned by the selection policy
    pub selected: usize,
    /// Candidates for which a unit was started
    pub attempted: usize,
    pub reversed: usize,
    /// Claimed elsewhere, no longer applied, or refused to avoid a negative balance
    pub skipped: usize,
    pub failed: usize,
    /// The run stopped early on shutdown
    pub interrupted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CandidateOutcome {
    Reversed,
    Skipped,
}

/// Background reversal of applied records
pub struct CancellationSweeper<S: Store> {
    store: Arc<S>,
    policy: Arc<dyn SelectionPolicy>,
    settings: SweepSettings,
}

impl<S: Store> CancellationSweeper<S> {
    /// Create a sweeper selecting odd-id records
    pub fn new(store: Arc<S>, settings: SweepSettings) -> Self {
        let policy: Arc<dyn SelectionPolicy> = Arc::new(OddIdPolicy::new(store.clone()));
        Self {
            store,
            policy,
            settings,
        }
    }

    /// Replace the selection policy
    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    /// Run one sweep.
    ///
    /// Only a failed selection is returned as an error. Per-candidate failures
    /// are logged and counted; `shutdown` is checked before every candidate.
    pub async fn run_once(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<SweepReport, StoreError> {
        let candidates = self.policy.select(self.settings.batch_size).await?;

        let mut report = SweepReport {
            selected: candidates.len(),
            ..SweepReport::default()
        };

        if candidates.is_empty() {
            tracing::debug!(policy = self.policy.name(), "No records to sweep");
            return Ok(report);
        }

        for candidate in &candidates {
            if *shutdown.borrow() {
                report.interrupted = true;
                tracing::info!(
                    remaining = candidates.len() - report.attempted,
                    "Sweep interrupted by shutdown"
                );
                break;
            }

            report.attempted += 1;
            match self.reverse_one(candidate).await {
                Ok(CandidateOutcome::Reversed) => report.reversed += 1,
                Ok(CandidateOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        record_id = candidate.id,
                        user_id = candidate.owner_id,
                        error = %e,
                        "Failed to reverse record"
                    );
                }
            }
        }

        tracing::info!(
            policy = self.policy.name(),
            selected = report.selected,
            attempted = report.attempted,
            reversed = report.reversed,
            skipped = report.skipped,
            failed = report.failed,
            interrupted = report.interrupted,
            "Sweep completed"
        );

        Ok(report)
    }

    async fn reverse_one(&self, record: &LedgerRecord) -> Result<CandidateOutcome, StoreError> {
        let mut unit = self.store.begin().await?;

        match self.reverse_steps(&mut unit, record).await {
            Ok(CandidateOutcome::Reversed) => {
                self.store.commit(unit).await?;
                Ok(CandidateOutcome::Reversed)
            }
            Ok(CandidateOutcome::Skipped) => {
                self.store.rollback(unit).await?;
                Ok(CandidateOutcome::Skipped)
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback(unit).await {
                    tracing::warn!(
                        record_id = record.id,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn reverse_steps(
        &self,
        unit: &mut S::Unit,
        record: &LedgerRecord,
    ) -> Result<CandidateOutcome, StoreError> {
        if !self.store.claim_for_reversal(unit, record.id).await? {
            tracing::debug!(record_id = record.id, "Record claimed elsewhere or no longer applied");
            return Ok(CandidateOutcome::Skipped);
        }

        let account = self.store.lock_account(unit, record.owner_id).await?;
        let new_balance = account.balance + record.reversal_effect();

        if new_balance < Decimal::ZERO {
            tracing::warn!(
                record_id = record.id,
                user_id = record.owner_id,
                balance = %account.balance,
                amount = %record.amount,
                state = %record.direction,
                "Reversal refused: balance would become negative"
            );
            return Ok(CandidateOutcome::Skipped);
        }

        self.store
            .write_balance(unit, record.owner_id, new_balance)
            .await?;

        if !self.store.mark_reversed(unit, record.id).await? {
            tracing::warn!(
                record_id = record.id,
                "Record left applied state after it was claimed"
            );
            return Ok(CandidateOutcome::Skipped);
        }

        tracing::debug!(
            record_id = record.id,
            user_id = record.owner_id,
            balance = %new_balance,
            "Record reversed"
        );

        Ok(CandidateOutcome::Reversed)
    }
}
