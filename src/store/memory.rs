//! In-memory Store
//!
//! Same contract as the PostgreSQL store, kept in process memory. Each account
//! and each record has its own async mutex standing in for a row lock; a unit
//! buffers its writes and publishes them atomically on commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    Account, Amount, Direction, LedgerRecord, NewLedgerRecord, OwnerId, RecordStatus, Source,
};

use super::{AccountStore, LedgerStore, StoreError, UnitProvider};

struct AccountSlot {
    account: Account,
    lock: Arc<RowLock<()>>,
}

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<OwnerId, AccountSlot>,
    records: BTreeMap<i64, LedgerRecord>,
    record_locks: HashMap<i64, Arc<RowLock<()>>>,
    keys: HashMap<Uuid, i64>,
    next_record_id: i64,
}

/// Store kept in process memory
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

/// Pending writes and held row locks of one atomic unit
#[derive(Default)]
pub struct MemoryUnit {
    account_guards: HashMap<OwnerId, OwnedMutexGuard<()>>,
    record_guards: HashMap<i64, OwnedMutexGuard<()>>,
    balances: HashMap<OwnerId, Decimal>,
    inserts: Vec<LedgerRecord>,
    reversals: HashMap<i64, DateTime<Utc>>,
}

impl MemoryUnit {
    fn overlay(&self, mut record: LedgerRecord) -> LedgerRecord {
        if let Some(at) = self.reversals.get(&record.id) {
            record.status = RecordStatus::Reversed;
            record.reversed_at = Some(*at);
            record.updated_at = *at;
        }
        record
    }
}

fn account_not_found(owner_id: OwnerId) -> StoreError {
    StoreError::NotFound(format!("account {}", owner_id))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // Seeding and inspection
    // =========================================================================

    /// Create (or replace) an account with the given balance.
    pub fn create_account(&self, id: OwnerId, balance: Decimal) -> Account {
        let now = Utc::now();
        let account = Account {
            id,
            balance,
            version: 0,
            created_at: now,
            updated_at: now,
        };

        self.state().accounts.insert(
            id,
            AccountSlot {
                account: account.clone(),
                lock: Arc::new(RowLock::new(())),
            },
        );
        account
    }

    /// Committed account snapshot
    pub fn account(&self, id: OwnerId) -> Option<Account> {
        self.state().accounts.get(&id).map(|slot| slot.account.clone())
    }

    /// All committed records, lowest id first
    pub fn records(&self) -> Vec<LedgerRecord> {
        self.state().records.values().cloned().collect()
    }

    pub fn record(&self, id: i64) -> Option<LedgerRecord> {
        self.state().records.get(&id).cloned()
    }

    /// Insert an applied record directly, without touching any balance and
    /// without checking that the owner exists.
    pub fn seed_record(
        &self,
        owner_id: OwnerId,
        direction: Direction,
        amount: Amount,
    ) -> LedgerRecord {
        let mut state = self.state();
        state.next_record_id += 1;
        let now = Utc::now();
        let record = LedgerRecord {
            id: state.next_record_id,
            idempotency_key: Uuid::new_v4(),
            owner_id,
            source: Source::Game,
            direction,
            amount: amount.value(),
            status: RecordStatus::Applied,
            reversed_at: None,
            created_at: now,
            updated_at: now,
        };
        state.keys.insert(record.idempotency_key, record.id);
        state.records.insert(record.id, record.clone());
        record
    }

    // =========================================================================
    // Locked sections
    // =========================================================================

    fn account_lock(&self, owner_id: OwnerId) -> Result<Arc<RowLock<()>>, StoreError> {
        self.state()
            .accounts
            .get(&owner_id)
            .map(|slot| slot.lock.clone())
            .ok_or_else(|| account_not_found(owner_id))
    }

    fn record_lock(&self, record_id: i64) -> Arc<RowLock<()>> {
        self.state()
            .record_locks
            .entry(record_id)
            .or_insert_with(|| Arc::new(RowLock::new(())))
            .clone()
    }

    fn committed_account(&self, owner_id: OwnerId) -> Result<Account, StoreError> {
        self.account(owner_id)
            .ok_or_else(|| account_not_found(owner_id))
    }

    fn committed_by_key(&self, key: Uuid) -> Option<LedgerRecord> {
        let state = self.state();
        state
            .keys
            .get(&key)
            .and_then(|id| state.records.get(id))
            .cloned()
    }

    fn can_reverse(&self, record_id: i64) -> bool {
        self.state()
            .records
            .get(&record_id)
            .map(|r| r.status.can_transition_to(RecordStatus::Reversed))
            .unwrap_or(false)
    }

    fn stage_insert(
        &self,
        unit: &mut MemoryUnit,
        new: &NewLedgerRecord,
    ) -> Result<LedgerRecord, StoreError> {
        let mut state = self.state();

        let pending = unit
            .inserts
            .iter()
            .any(|r| r.idempotency_key == new.idempotency_key);
        if pending || state.keys.contains_key(&new.idempotency_key) {
            return Err(StoreError::UniqueViolation(format!(
                "idempotency_key {}",
                new.idempotency_key
            )));
        }
        if !state.accounts.contains_key(&new.owner_id) {
            return Err(account_not_found(new.owner_id));
        }

        // ids consumed by rolled-back units leave gaps, as sequences do
        state.next_record_id += 1;
        let now = Utc::now();
        let record = LedgerRecord {
            id: state.next_record_id,
            idempotency_key: new.idempotency_key,
            owner_id: new.owner_id,
            source: new.source,
            direction: new.direction,
            amount: new.amount.value(),
            status: RecordStatus::Applied,
            reversed_at: None,
            created_at: now,
            updated_at: now,
        };
        unit.inserts.push(record.clone());
        Ok(record)
    }

    fn publish(&self, unit: &MemoryUnit) -> Result<(), StoreError> {
        let mut state = self.state();

        if let Some(dup) = unit
            .inserts
            .iter()
            .find(|r| state.keys.contains_key(&r.idempotency_key))
        {
            return Err(StoreError::UniqueViolation(format!(
                "idempotency_key {}",
                dup.idempotency_key
            )));
        }

        let now = Utc::now();
        for (owner_id, balance) in &unit.balances {
            let slot = state
                .accounts
                .get_mut(owner_id)
                .ok_or_else(|| account_not_found(*owner_id))?;
            slot.account.balance = *balance;
            slot.account.version += 1;
            slot.account.updated_at = now;
        }

        for record in &unit.inserts {
            state.keys.insert(record.idempotency_key, record.id);
            state.records.insert(record.id, record.clone());
        }

        for (record_id, at) in &unit.reversals {
            if let Some(record) = state.records.get_mut(record_id) {
                record.status = RecordStatus::Reversed;
                record.reversed_at = Some(*at);
                record.updated_at = *at;
            }
        }

        Ok(())
    }

    fn newest_applied<F>(&self, limit: i64, filter: F) -> Vec<LedgerRecord>
    where
        F: Fn(&LedgerRecord) -> bool,
    {
        self.state()
            .records
            .values()
            .rev()
            .filter(|r| r.is_applied() && filter(r))
            .take(limit.max(0) as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl UnitProvider for MemoryStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        Ok(MemoryUnit::default())
    }

    async fn commit(&self, unit: Self::Unit) -> Result<(), StoreError> {
        self.publish(&unit)
    }

    async fn rollback(&self, unit: Self::Unit) -> Result<(), StoreError> {
        drop(unit);
        Ok(())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn lock_account(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Account, StoreError> {
        if !unit.account_guards.contains_key(&owner_id) {
            let lock = self.account_lock(owner_id)?;
            let guard = lock.lock_owned().await;
            unit.account_guards.insert(owner_id, guard);
        }

        let mut account = self.committed_account(owner_id)?;
        if let Some(balance) = unit.balances.get(&owner_id) {
            account.balance = *balance;
        }
        Ok(account)
    }

    async fn balance_in(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Decimal, StoreError> {
        match unit.balances.get(&owner_id) {
            Some(balance) => Ok(*balance),
            None => self.balance(owner_id).await,
        }
    }

    async fn balance(&self, owner_id: OwnerId) -> Result<Decimal, StoreError> {
        Ok(self.committed_account(owner_id)?.balance)
    }

    async fn write_balance(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        if balance < Decimal::ZERO {
            return Err(StoreError::CheckViolation(format!(
                "balance_non_negative: account {} would be {}",
                owner_id, balance
            )));
        }

        // an UPDATE takes the row lock when the unit does not hold it yet
        self.lock_account(unit, owner_id).await?;
        unit.balances.insert(owner_id, balance);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn find_by_key_in(
        &self,
        unit: &mut Self::Unit,
        key: Uuid,
    ) -> Result<Option<LedgerRecord>, StoreError> {
        if let Some(pending) = unit.inserts.iter().find(|r| r.idempotency_key == key) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.committed_by_key(key).map(|r| unit.overlay(r)))
    }

    async fn find_by_key(&self, key: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
        Ok(self.committed_by_key(key))
    }

    async fn insert_record(
        &self,
        unit: &mut Self::Unit,
        record: &NewLedgerRecord,
    ) -> Result<LedgerRecord, StoreError> {
        self.stage_insert(unit, record)
    }

    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self
            .state()
            .records
            .values()
            .rev()
            .filter(|r| r.owner_id == owner_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn latest_odd_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self.newest_applied(limit, |r| r.id % 2 == 1))
    }

    async fn latest_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self.newest_applied(limit, |_| true))
    }

    async fn claim_for_reversal(
        &self,
        unit: &mut Self::Unit,
        record_id: i64,
    ) -> Result<bool, StoreError> {
        if !unit.record_guards.contains_key(&record_id) {
            match self.record_lock(record_id).try_lock_owned() {
                Ok(guard) => {
                    unit.record_guards.insert(record_id, guard);
                }
                Err(_) => return Ok(false),
            }
        }

        Ok(self.can_reverse(record_id) && !unit.reversals.contains_key(&record_id))
    }

    async fn mark_reversed(
        &self,
        unit: &mut Self::Unit,
        record_id: i64,
    ) -> Result<bool, StoreError> {
        if !unit.record_guards.contains_key(&record_id) {
            let guard = self.record_lock(record_id).lock_owned().await;
            unit.record_guards.insert(record_id, guard);
        }

        if !self.can_reverse(record_id) || unit.reversals.contains_key(&record_id) {
            return Ok(false);
        }

        unit.reversals.insert(record_id, Utc::now());
        Ok(true)
    }
}
