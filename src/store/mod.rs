//! Store module
//!
//! Contracts for the account store, the ledger store and the atomic unit
//! provider they share, with a PostgreSQL implementation and an in-process
//! implementation used by tests and local demos.
//!
//! Every method that takes `&mut Self::Unit` runs inside that atomic unit and
//! sees its uncommitted writes. Methods without a unit read committed state.

mod error;
mod memory;
mod postgres;

pub use error::StoreError;
pub use memory::{MemoryStore, MemoryUnit};
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::{Account, LedgerRecord, NewLedgerRecord, OwnerId};

/// Runs a sequence of store operations as one all-or-nothing unit.
///
/// Dropping a unit without committing rolls it back.
#[async_trait]
pub trait UnitProvider: Send + Sync {
    type Unit: Send;

    async fn begin(&self) -> Result<Self::Unit, StoreError>;

    /// Commit the unit. Uniqueness constraints are enforced no later than here.
    async fn commit(&self, unit: Self::Unit) -> Result<(), StoreError>;

    /// Roll back the unit. When this returns, every lock it held is released.
    async fn rollback(&self, unit: Self::Unit) -> Result<(), StoreError>;
}

/// Per-user balances
#[async_trait]
pub trait AccountStore: UnitProvider {
    /// Read the account and hold an exclusive row lock on it until the unit ends.
    async fn lock_account(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Account, StoreError>;

    /// Read the balance inside a unit without locking.
    async fn balance_in(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Decimal, StoreError>;

    /// Read the committed balance.
    async fn balance(&self, owner_id: OwnerId) -> Result<Decimal, StoreError>;

    /// Overwrite the balance and bump the version.
    ///
    /// A negative balance is rejected with `StoreError::CheckViolation`.
    async fn write_balance(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
        balance: Decimal,
    ) -> Result<(), StoreError>;
}

/// Immutable transaction records keyed by idempotency key
#[async_trait]
pub trait LedgerStore: UnitProvider {
    async fn find_by_key_in(
        &self,
        unit: &mut Self::Unit,
        key: Uuid,
    ) -> Result<Option<LedgerRecord>, StoreError>;

    async fn find_by_key(&self, key: Uuid) -> Result<Option<LedgerRecord>, StoreError>;

    /// Insert a record in status `applied`.
    ///
    /// A duplicate idempotency key yields `StoreError::UniqueViolation`, either
    /// here or from `commit`.
    async fn insert_record(
        &self,
        unit: &mut Self::Unit,
        record: &NewLedgerRecord,
    ) -> Result<LedgerRecord, StoreError>;

    /// Records of one owner, newest first.
    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Applied records with an odd id, highest id first.
    async fn latest_odd_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Applied records, highest id first.
    async fn latest_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Lock the record for reversal if it is still `applied`, skipping it when
    /// another unit already holds it. Returns `false` when nothing was acquired.
    async fn claim_for_reversal(
        &self,
        unit: &mut Self::Unit,
        record_id: i64,
    ) -> Result<bool, StoreError>;

    /// Move the record from `applied` to `reversed`. Returns `false` when it
    /// was no longer `applied`.
    async fn mark_reversed(&self, unit: &mut Self::Unit, record_id: i64)
        -> Result<bool, StoreError>;
}

/// A store that provides both accounts and the ledger over one unit type.
pub trait Store: AccountStore + LedgerStore + 'static {}

impl<T> Store for T where T: AccountStore + LedgerStore + 'static {}
