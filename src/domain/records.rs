//! Account and ledger record types
//!
//! Plain snapshots of committed store rows. No component keeps these across
//! calls; every decision re-reads inside its own atomic unit.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, Direction, OwnerId, RecordStatus, Source};

/// Per-user balance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: OwnerId,
    pub balance: Decimal,
    /// Incremented on every successful balance write
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable record of one applied event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: i64,
    #[serde(rename = "transaction_id")]
    pub idempotency_key: Uuid,
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    #[serde(rename = "source_type")]
    pub source: Source,
    #[serde(rename = "state")]
    pub direction: Direction,
    pub amount: Decimal,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none", rename = "cancelled_at")]
    pub reversed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn is_applied(&self) -> bool {
        self.status == RecordStatus::Applied
    }

    /// Net effect this record currently has on its owner's balance.
    ///
    /// A reversed record contributes its amount once and the reversal once
    /// with the opposite sign, so it nets to zero.
    pub fn net_effect(&self) -> Decimal {
        match self.status {
            RecordStatus::Applied => self.direction.signed(self.amount),
            RecordStatus::Reversed => Decimal::ZERO,
        }
    }

    /// Balance change that undoes this record.
    pub fn reversal_effect(&self) -> Decimal {
        self.direction.reversed().signed(self.amount)
    }
}

/// Values supplied by the processor when inserting a record.
/// The store assigns `id`, status `applied` and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerRecord {
    pub idempotency_key: Uuid,
    pub owner_id: OwnerId,
    pub source: Source,
    pub direction: Direction,
    pub amount: Amount,
}
