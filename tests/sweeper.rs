//! Cancellation sweeper and scheduler tests (in-memory store)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::watch;
use uuid::Uuid;

use transaction_processor::domain::{
    Account, Direction, LedgerRecord, NewLedgerRecord, OwnerId, RecordStatus,
};
use transaction_processor::jobs::SweepScheduler;
use transaction_processor::store::{
    AccountStore, LedgerStore, MemoryStore, MemoryUnit, StoreError, UnitProvider,
};
use transaction_processor::sweeper::SelectionPolicy;
use transaction_processor::{CancellationSweeper, SweepSettings};

mod common;

fn sweeper(store: &Arc<MemoryStore>) -> CancellationSweeper<MemoryStore> {
    CancellationSweeper::new(store.clone(), SweepSettings::default())
}

fn running() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[tokio::test]
async fn test_reverses_win() {
    let store = common::memory_store(&[(1, dec!(200.00))]);
    let record = store.seed_record(1, Direction::Increase, "50.00".parse().unwrap());
    let (_tx, rx) = running();

    let report = sweeper(&store).run_once(&rx).await.unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.reversed, 1);
    assert_eq!(store.account(1).unwrap().balance, dec!(150.00));

    let reversed = store.record(record.id).unwrap();
    assert_eq!(reversed.status, RecordStatus::Reversed);
    assert!(reversed.reversed_at.is_some());
}

#[tokio::test]
async fn test_reverses_lost() {
    let store = common::memory_store(&[(1, dec!(70.00))]);
    store.seed_record(1, Direction::Decrease, "30.00".parse().unwrap());
    let (_tx, rx) = running();

    let report = sweeper(&store).run_once(&rx).await.unwrap();

    assert_eq!(report.reversed, 1);
    assert_eq!(store.account(1).unwrap().balance, dec!(100.00));
}

#[tokio::test]
async fn test_refuses_reversal_below_zero() {
    let store = common::memory_store(&[(1, dec!(50.00))]);
    let record = store.seed_record(1, Direction::Increase, "80.00".parse().unwrap());
    let (_tx, rx) = running();

    let report = sweeper(&store).run_once(&rx).await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.reversed, 0);
    assert_eq!(store.account(1).unwrap().balance, dec!(50.00));
    assert_eq!(store.account(1).unwrap().version, 0);
    assert_eq!(store.record(record.id).unwrap().status, RecordStatus::Applied);
}

#[tokio::test]
async fn test_only_odd_ids_selected_and_never_twice() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let amount = "1.00".parse().unwrap();
    for _ in 0..4 {
        store.seed_record(1, Direction::Increase, amount);
    }
    let (_tx, rx) = running();

    let first = sweeper(&store).run_once(&rx).await.unwrap();
    assert_eq!(first.reversed, 2);
    assert_eq!(store.account(1).unwrap().balance, dec!(98.00));
    assert_eq!(store.record(2).unwrap().status, RecordStatus::Applied);
    assert_eq!(store.record(4).unwrap().status, RecordStatus::Applied);

    let second = sweeper(&store).run_once(&rx).await.unwrap();
    assert_eq!(second.selected, 0);
    assert_eq!(store.account(1).unwrap().balance, dec!(98.00));
}

#[tokio::test]
async fn test_skips_record_claimed_elsewhere() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let record = store.seed_record(1, Direction::Increase, "10.00".parse().unwrap());
    let (_tx, rx) = running();

    let mut other = store.begin().await.unwrap();
    assert!(store.claim_for_reversal(&mut other, record.id).await.unwrap());

    let report = sweeper(&store).run_once(&rx).await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.reversed, 0);
    assert_eq!(store.account(1).unwrap().balance, dec!(100.00));

    store.rollback(other).await.unwrap();

    let report = sweeper(&store).run_once(&rx).await.unwrap();
    assert_eq!(report.reversed, 1);
}

#[tokio::test]
async fn test_candidate_failure_does_not_stop_batch() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let amount = "5.00".parse().unwrap();
    // record 1 is fine, record 3 points at an account that does not exist
    store.seed_record(1, Direction::Increase, amount);
    store.seed_record(1, Direction::Increase, amount);
    store.seed_record(99, Direction::Increase, amount);
    let (_tx, rx) = running();

    let report = sweeper(&store).run_once(&rx).await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.reversed, 1);
    assert_eq!(store.account(1).unwrap().balance, dec!(95.00));
    assert_eq!(store.record(3).unwrap().status, RecordStatus::Applied);
}

#[tokio::test]
async fn test_shutdown_stops_before_next_candidate() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    store.seed_record(1, Direction::Increase, "5.00".parse().unwrap());
    let (tx, rx) = running();
    tx.send(true).unwrap();

    let report = sweeper(&store).run_once(&rx).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.selected, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(store.account(1).unwrap().balance, dec!(100.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_mid_run_finishes_current_candidate() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let amount = "1.00".parse().unwrap();
    for _ in 0..6 {
        store.seed_record(1, Direction::Increase, amount);
    }

    // park the sweep on account 1's row lock while it works on record 5
    let mut holder = store.begin().await.unwrap();
    store.lock_account(&mut holder, 1).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let sweeper = sweeper(&store);
    let run = tokio::spawn(async move { sweeper.run_once(&rx).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(true).unwrap();
    store.rollback(holder).await.unwrap();

    let report = run.await.unwrap().unwrap();

    assert_eq!(report.selected, 3);
    assert_eq!(report.attempted, 1);
    assert_eq!(report.reversed, 1);
    assert_eq!(report.failed, 0);
    assert!(report.interrupted);
    assert_eq!(store.account(1).unwrap().balance, dec!(99.00));
    assert_eq!(store.record(5).unwrap().status, RecordStatus::Reversed);
    assert_eq!(store.record(3).unwrap().status, RecordStatus::Applied);
    assert_eq!(store.record(1).unwrap().status, RecordStatus::Applied);
}

/// Memory store whose conditional status update never matches a row
struct StaleStatusStore(MemoryStore);

#[async_trait]
impl UnitProvider for StaleStatusStore {
    type Unit = MemoryUnit;

    async fn begin(&self) -> Result<MemoryUnit, StoreError> {
        self.0.begin().await
    }

    async fn commit(&self, unit: MemoryUnit) -> Result<(), StoreError> {
        self.0.commit(unit).await
    }

    async fn rollback(&self, unit: MemoryUnit) -> Result<(), StoreError> {
        self.0.rollback(unit).await
    }
}

#[async_trait]
impl AccountStore for StaleStatusStore {
    async fn lock_account(
        &self,
        unit: &mut MemoryUnit,
        owner_id: OwnerId,
    ) -> Result<Account, StoreError> {
        self.0.lock_account(unit, owner_id).await
    }

    async fn balance_in(
        &self,
        unit: &mut MemoryUnit,
        owner_id: OwnerId,
    ) -> Result<Decimal, StoreError> {
        self.0.balance_in(unit, owner_id).await
    }

    async fn balance(&self, owner_id: OwnerId) -> Result<Decimal, StoreError> {
        self.0.balance(owner_id).await
    }

    async fn write_balance(
        &self,
        unit: &mut MemoryUnit,
        owner_id: OwnerId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        self.0.write_balance(unit, owner_id, balance).await
    }
}

#[async_trait]
impl LedgerStore for StaleStatusStore {
    async fn find_by_key_in(
        &self,
        unit: &mut MemoryUnit,
        key: Uuid,
    ) -> Result<Option<LedgerRecord>, StoreError> {
        self.0.find_by_key_in(unit, key).await
    }

    async fn find_by_key(&self, key: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
        self.0.find_by_key(key).await
    }

    async fn insert_record(
        &self,
        unit: &mut MemoryUnit,
        record: &NewLedgerRecord,
    ) -> Result<LedgerRecord, StoreError> {
        self.0.insert_record(unit, record).await
    }

    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        self.0.list_by_owner(owner_id, limit, offset).await
    }

    async fn latest_odd_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        self.0.latest_odd_applied(limit).await
    }

    async fn latest_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        self.0.latest_applied(limit).await
    }

    async fn claim_for_reversal(
        &self,
        unit: &mut MemoryUnit,
        record_id: i64,
    ) -> Result<bool, StoreError> {
        self.0.claim_for_reversal(unit, record_id).await
    }

    async fn mark_reversed(
        &self,
        _unit: &mut MemoryUnit,
        _record_id: i64,
    ) -> Result<bool, StoreError> {
        Ok(false)
    }
}

#[tokio::test]
async fn test_status_update_matching_no_row_is_skipped() {
    let inner = MemoryStore::new();
    inner.create_account(1, dec!(100.00));
    let record = inner.seed_record(1, Direction::Increase, "10.00".parse().unwrap());
    let store = Arc::new(StaleStatusStore(inner));
    let (_tx, rx) = running();

    let report = CancellationSweeper::new(store.clone(), SweepSettings::default())
        .run_once(&rx)
        .await
        .unwrap();

    assert_eq!(report.attempted, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.reversed, 0);

    // the buffered balance write was rolled back with the unit
    assert_eq!(store.0.account(1).unwrap().balance, dec!(100.00));
    assert_eq!(store.0.account(1).unwrap().version, 0);
    assert_eq!(store.0.record(record.id).unwrap().status, RecordStatus::Applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_sweepers_reverse_each_record_once() {
    let store = common::memory_store(&[(1, dec!(1000.00)), (2, dec!(1000.00))]);
    let amount = "10.00".parse().unwrap();
    for i in 0..20 {
        let owner = if i % 3 == 0 { 2 } else { 1 };
        store.seed_record(owner, Direction::Increase, amount);
    }

    let settings = SweepSettings::new(Duration::from_secs(60), 20);
    let mut tasks = Vec::new();
    for _ in 0..4 {
        let sweeper = CancellationSweeper::new(store.clone(), settings);
        tasks.push(tokio::spawn(async move {
            let (_tx, rx) = watch::channel(false);
            sweeper.run_once(&rx).await.unwrap()
        }));
    }

    let mut reversed = 0;
    for task in tasks {
        let report = task.await.unwrap();
        assert_eq!(report.failed, 0);
        reversed += report.reversed;
    }

    let reversed_records: Vec<LedgerRecord> = store
        .records()
        .into_iter()
        .filter(|r| r.status == RecordStatus::Reversed)
        .collect();
    assert_eq!(reversed, 10);
    assert_eq!(reversed_records.len(), 10);

    let total = store.account(1).unwrap().balance + store.account(2).unwrap().balance;
    assert_eq!(total, dec!(1900.00));
}

/// Selects a fixed list of records
struct FixedPolicy(Vec<LedgerRecord>);

#[async_trait]
impl SelectionPolicy for FixedPolicy {
    async fn select(&self, batch_size: usize) -> Result<Vec<LedgerRecord>, StoreError> {
        Ok(self.0.iter().take(batch_size).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[tokio::test]
async fn test_custom_selection_policy() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let amount = "10.00".parse().unwrap();
    store.seed_record(1, Direction::Increase, amount);
    let even = store.seed_record(1, Direction::Decrease, amount);
    let (_tx, rx) = running();

    let report = sweeper(&store)
        .with_policy(Arc::new(FixedPolicy(vec![even.clone()])))
        .run_once(&rx)
        .await
        .unwrap();

    assert_eq!(report.reversed, 1);
    assert_eq!(store.account(1).unwrap().balance, dec!(110.00));
    assert_eq!(store.record(even.id).unwrap().status, RecordStatus::Reversed);
    assert_eq!(store.record(1).unwrap().status, RecordStatus::Applied);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduler_sweeps_until_stopped() {
    let store = common::memory_store(&[(1, dec!(100.00))]);
    let record = store.seed_record(1, Direction::Increase, "10.00".parse().unwrap());

    let sweeper = CancellationSweeper::new(
        store.clone(),
        SweepSettings::new(Duration::from_millis(50), 10),
    );
    let handle = SweepScheduler::new(sweeper).start();

    let mut reversed = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if store.record(record.id).unwrap().status == RecordStatus::Reversed {
            reversed = true;
            break;
        }
    }

    assert!(handle.shutdown_within(Duration::from_secs(5)).await);

    assert!(reversed);
    assert_eq!(store.account(1).unwrap().balance, dec!(90.00));
    assert!(store.find_by_key(record.idempotency_key).await.unwrap().is_some());
}
