//! Transaction Processor
//!
//! Applies win/lost events to account balances exactly once per idempotency
//! key. Each apply runs in a single atomic unit that holds the account row
//! lock from the balance read through the record insert.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::{
    Amount, AmountError, Balance, Direction, DomainError, LedgerRecord, NewLedgerRecord,
    OperationContext, OwnerId,
};
use crate::store::{Store, StoreError};

use super::{ApplyCommand, ApplyOutcome};

/// Why an apply unit did not commit
#[derive(Debug)]
enum UnitFailure {
    /// Another unit committed the same idempotency key first
    InsertRace,
    Failed(DomainError),
}

impl From<DomainError> for UnitFailure {
    fn from(err: DomainError) -> Self {
        UnitFailure::Failed(err)
    }
}

impl From<StoreError> for UnitFailure {
    fn from(err: StoreError) -> Self {
        UnitFailure::Failed(DomainError::Store(err))
    }
}

fn account_error(owner_id: OwnerId) -> impl Fn(StoreError) -> DomainError {
    move |err| match err {
        StoreError::NotFound(_) => DomainError::AccountNotFound(owner_id),
        other => DomainError::Store(other),
    }
}

fn ensure_owner(existing: &LedgerRecord, owner_id: OwnerId) -> Result<(), DomainError> {
    if existing.owner_id != owner_id {
        return Err(DomainError::DuplicateKeyOwnerMismatch {
            key: existing.idempotency_key,
            existing_owner: existing.owner_id,
            requested_owner: owner_id,
        });
    }
    Ok(())
}

/// Idempotent apply, balance queries and history listing
pub struct TransactionProcessor<S: Store> {
    store: Arc<S>,
}

impl<S: Store> Clone for TransactionProcessor<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> TransactionProcessor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Apply one event.
    ///
    /// Input is validated before any store access. A duplicate key for the
    /// same owner returns `AlreadyApplied` with the current balance and
    /// changes nothing.
    pub async fn apply(
        &self,
        command: ApplyCommand,
        context: &OperationContext,
    ) -> Result<ApplyOutcome, DomainError> {
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e: AmountError| DomainError::InvalidAmount(e.to_string()))?;
        let direction: Direction = command.direction.parse()?;

        let record = NewLedgerRecord {
            idempotency_key: command.idempotency_key,
            owner_id: command.owner_id,
            source: command.source,
            direction,
            amount,
        };

        match self.apply_in_unit(&record, context).await {
            Ok(outcome) => Ok(outcome),
            Err(UnitFailure::InsertRace) => self.resolve_insert_race(&record, context).await,
            Err(UnitFailure::Failed(err)) => Err(err),
        }
    }

    /// Committed balance of an account
    pub async fn get_balance(&self, owner_id: OwnerId) -> Result<Decimal, DomainError> {
        self.store
            .balance(owner_id)
            .await
            .map_err(account_error(owner_id))
    }

    /// Records of one owner, newest first
    pub async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, DomainError> {
        Ok(self.store.list_by_owner(owner_id, limit, offset).await?)
    }

    // =========================================================================
    // Atomic unit
    // =========================================================================

    async fn apply_in_unit(
        &self,
        record: &NewLedgerRecord,
        context: &OperationContext,
    ) -> Result<ApplyOutcome, UnitFailure> {
        let mut unit = self.store.begin().await?;

        let outcome = match self.apply_steps(&mut unit, record, context).await {
            Ok(outcome) => outcome,
            Err(UnitFailure::InsertRace) => {
                // the race is only resolved once this unit's locks are gone
                self.store.rollback(unit).await?;
                return Err(UnitFailure::InsertRace);
            }
            Err(failure) => {
                if let Err(e) = self.store.rollback(unit).await {
                    tracing::warn!(
                        request_id = %context.request_id_or_dash(),
                        error = %e,
                        "Rollback failed"
                    );
                }
                return Err(failure);
            }
        };

        self.store.commit(unit).await.map_err(|e| {
            if e.is_unique_violation() {
                UnitFailure::InsertRace
            } else {
                UnitFailure::from(e)
            }
        })?;

        if !outcome.is_replay() {
            tracing::info!(
                request_id = %context.request_id_or_dash(),
                transaction_id = %record.idempotency_key,
                user_id = record.owner_id,
                state = %record.direction,
                amount = %record.amount,
                balance = %outcome.balance,
                "Transaction applied"
            );
        }

        Ok(outcome)
    }

    async fn apply_steps(
        &self,
        unit: &mut S::Unit,
        record: &NewLedgerRecord,
        context: &OperationContext,
    ) -> Result<ApplyOutcome, UnitFailure> {
        let owner_id = record.owner_id;

        if let Some(existing) = self
            .store
            .find_by_key_in(unit, record.idempotency_key)
            .await?
        {
            ensure_owner(&existing, owner_id)?;

            let balance = self
                .store
                .balance_in(unit, owner_id)
                .await
                .map_err(account_error(owner_id))?;

            tracing::info!(
                request_id = %context.request_id_or_dash(),
                transaction_id = %record.idempotency_key,
                user_id = owner_id,
                "Transaction already applied"
            );
            return Ok(ApplyOutcome::already_applied(balance));
        }

        let account = self
            .store
            .lock_account(unit, owner_id)
            .await
            .map_err(account_error(owner_id))?;

        let current = Balance::new(account.balance).map_err(|e| {
            StoreError::Internal(format!("account {} holds invalid balance: {}", owner_id, e))
        })?;
        let insufficient =
            || DomainError::insufficient_balance(record.amount.value(), account.balance);

        let new_balance = current
            .apply(record.direction, &record.amount)
            .map_err(|_| insufficient())?;

        self.store
            .write_balance(unit, owner_id, new_balance.value())
            .await
            .map_err(|e| match e {
                StoreError::CheckViolation(_) => insufficient(),
                other => account_error(owner_id)(other),
            })?;

        self.store
            .insert_record(unit, record)
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    UnitFailure::InsertRace
                } else {
                    UnitFailure::from(e)
                }
            })?;

        Ok(ApplyOutcome::success(new_balance.value()))
    }

    /// A concurrent apply committed our key first. Decide the winner from a
    /// fresh read now that our unit is rolled back.
    async fn resolve_insert_race(
        &self,
        record: &NewLedgerRecord,
        context: &OperationContext,
    ) -> Result<ApplyOutcome, DomainError> {
        let existing = self
            .store
            .find_by_key(record.idempotency_key)
            .await?
            .ok_or(DomainError::RecordNotFound(record.idempotency_key))?;

        ensure_owner(&existing, record.owner_id)?;

        let balance = self.get_balance(record.owner_id).await?;

        tracing::info!(
            request_id = %context.request_id_or_dash(),
            transaction_id = %record.idempotency_key,
            user_id = record.owner_id,
            "Duplicate insert race resolved as already applied"
        );

        Ok(ApplyOutcome::already_applied(balance))
    }
}
