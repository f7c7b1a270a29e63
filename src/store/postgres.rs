//! PostgreSQL Store
//!
//! Accounts and ledger records on PostgreSQL. An atomic unit is a database
//! transaction at the default READ COMMITTED level; row locks come from
//! `FOR UPDATE` and sweep claims from `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::domain::{Account, LedgerRecord, NewLedgerRecord, OwnerId};

use super::{AccountStore, LedgerStore, StoreError, UnitProvider};

type AccountRow = (i64, Decimal, i64, DateTime<Utc>, DateTime<Utc>);

type RecordRow = (
    i64,
    Uuid,
    i64,
    String,
    String,
    Decimal,
    String,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
    DateTime<Utc>,
);

/// Store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new PgStore
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn account_from_row(row: AccountRow) -> Account {
    let (id, balance, version, created_at, updated_at) = row;
    Account {
        id,
        balance,
        version,
        created_at,
        updated_at,
    }
}

fn record_from_row(row: RecordRow) -> Result<LedgerRecord, StoreError> {
    let (
        id,
        idempotency_key,
        owner_id,
        source,
        direction,
        amount,
        status,
        reversed_at,
        created_at,
        updated_at,
    ) = row;

    Ok(LedgerRecord {
        id,
        idempotency_key,
        owner_id,
        source: source
            .parse()
            .map_err(|e| StoreError::Internal(format!("record {}: {}", id, e)))?,
        direction: direction
            .parse()
            .map_err(|e| StoreError::Internal(format!("record {}: {}", id, e)))?,
        amount,
        status: status
            .parse()
            .map_err(|e| StoreError::Internal(format!("record {}: {}", id, e)))?,
        reversed_at,
        created_at,
        updated_at,
    })
}

fn records_from_rows(rows: Vec<RecordRow>) -> Result<Vec<LedgerRecord>, StoreError> {
    rows.into_iter().map(record_from_row).collect()
}

#[async_trait]
impl UnitProvider for PgStore {
    type Unit = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Unit, StoreError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, unit: Self::Unit) -> Result<(), StoreError> {
        unit.commit().await?;
        Ok(())
    }

    async fn rollback(&self, unit: Self::Unit) -> Result<(), StoreError> {
        unit.rollback().await?;
        Ok(())
    }
}

// =========================================================================
// Accounts
// =========================================================================

#[async_trait]
impl AccountStore for PgStore {
    async fn lock_account(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Account, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, balance, version, created_at, updated_at
            FROM accounts
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&mut **unit)
        .await?;

        row.map(account_from_row)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", owner_id)))
    }

    async fn balance_in(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
    ) -> Result<Decimal, StoreError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1")
                .bind(owner_id)
                .fetch_optional(&mut **unit)
                .await?;

        balance.ok_or_else(|| StoreError::NotFound(format!("account {}", owner_id)))
    }

    async fn balance(&self, owner_id: OwnerId) -> Result<Decimal, StoreError> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        balance.ok_or_else(|| StoreError::NotFound(format!("account {}", owner_id)))
    }

    async fn write_balance(
        &self,
        unit: &mut Self::Unit,
        owner_id: OwnerId,
        balance: Decimal,
    ) -> Result<(), StoreError> {
        // balance_non_negative CHECK surfaces as StoreError::CheckViolation
        let rows_affected = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $1, version = version + 1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(balance)
        .bind(owner_id)
        .execute(&mut **unit)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::NotFound(format!("account {}", owner_id)));
        }

        Ok(())
    }
}

// =========================================================================
// Ledger records
// =========================================================================

#[async_trait]
impl LedgerStore for PgStore {
    async fn find_by_key_in(
        &self,
        unit: &mut Self::Unit,
        key: Uuid,
    ) -> Result<Option<LedgerRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, owner_id, source, direction, amount,
                   status, reversed_at, created_at, updated_at
            FROM ledger_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&mut **unit)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn find_by_key(&self, key: Uuid) -> Result<Option<LedgerRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, owner_id, source, direction, amount,
                   status, reversed_at, created_at, updated_at
            FROM ledger_records
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn insert_record(
        &self,
        unit: &mut Self::Unit,
        record: &NewLedgerRecord,
    ) -> Result<LedgerRecord, StoreError> {
        let row: RecordRow = sqlx::query_as(
            r#"
            INSERT INTO ledger_records (idempotency_key, owner_id, source, direction, amount, status)
            VALUES ($1, $2, $3, $4, $5, 'applied')
            RETURNING id, idempotency_key, owner_id, source, direction, amount,
                      status, reversed_at, created_at, updated_at
            "#,
        )
        .bind(record.idempotency_key)
        .bind(record.owner_id)
        .bind(record.source.as_str())
        .bind(record.direction.as_str())
        .bind(record.amount.value())
        .fetch_one(&mut **unit)
        .await?;

        record_from_row(row)
    }

    async fn list_by_owner(
        &self,
        owner_id: OwnerId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, owner_id, source, direction, amount,
                   status, reversed_at, created_at, updated_at
            FROM ledger_records
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        records_from_rows(rows)
    }

    async fn latest_odd_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, owner_id, source, direction, amount,
                   status, reversed_at, created_at, updated_at
            FROM ledger_records
            WHERE id % 2 = 1 AND status = 'applied'
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records_from_rows(rows)
    }

    async fn latest_applied(&self, limit: i64) -> Result<Vec<LedgerRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            r#"
            SELECT id, idempotency_key, owner_id, source, direction, amount,
                   status, reversed_at, created_at, updated_at
            FROM ledger_records
            WHERE status = 'applied'
            ORDER BY id DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        records_from_rows(rows)
    }

    async fn claim_for_reversal(
        &self,
        unit: &mut Self::Unit,
        record_id: i64,
    ) -> Result<bool, StoreError> {
        let claimed: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT id FROM ledger_records
            WHERE id = $1 AND status = 'applied'
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(record_id)
        .fetch_optional(&mut **unit)
        .await?;

        Ok(claimed.is_some())
    }

    async fn mark_reversed(
        &self,
        unit: &mut Self::Unit,
        record_id: i64,
    ) -> Result<bool, StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE ledger_records
            SET status = 'reversed', reversed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'applied'
            "#,
        )
        .bind(record_id)
        .execute(&mut **unit)
        .await?
        .rows_affected();

        Ok(rows_affected == 1)
    }
}
