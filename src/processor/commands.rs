//! Command definitions
//!
//! Inputs and results of the transaction processor.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{OwnerId, Source};

// =========================================================================
// ApplyCommand
// =========================================================================

/// Command to apply one win/lost event to an account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyCommand {
    /// Caller-supplied key identifying the logical event
    pub idempotency_key: Uuid,
    pub owner_id: OwnerId,
    /// Direction as received ("win" / "lost")
    pub direction: String,
    /// Amount to apply (as string for precise decimal)
    pub amount: String,
    pub source: Source,
}

impl ApplyCommand {
    pub fn new(
        idempotency_key: Uuid,
        owner_id: OwnerId,
        direction: impl Into<String>,
        amount: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key,
            owner_id,
            direction: direction.into(),
            amount: amount.into(),
            source: Source::Game,
        }
    }

    pub fn with_source(mut self, source: Source) -> Self {
        self.source = source;
        self
    }
}

// =========================================================================
// ApplyOutcome
// =========================================================================

/// How an apply request was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// This call mutated the balance and inserted the record
    Success,
    /// The key was already recorded for this owner; nothing changed
    AlreadyApplied,
}

impl ApplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyStatus::Success => "success",
            ApplyStatus::AlreadyApplied => "already_applied",
        }
    }
}

/// Result of a successful apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub status: ApplyStatus,
    /// Balance after this call (for replays, the current committed balance)
    pub balance: Decimal,
}

impl ApplyOutcome {
    pub fn success(balance: Decimal) -> Self {
        Self {
            status: ApplyStatus::Success,
            balance,
        }
    }

    pub fn already_applied(balance: Decimal) -> Self {
        Self {
            status: ApplyStatus::AlreadyApplied,
            balance,
        }
    }

    pub fn is_replay(&self) -> bool {
        self.status == ApplyStatus::AlreadyApplied
    }
}
