//! Common test utilities
#![allow(dead_code)]

use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};

use transaction_processor::store::MemoryStore;
use transaction_processor::TransactionProcessor;

/// In-memory store seeded with the given accounts
pub fn memory_store(accounts: &[(i64, Decimal)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (id, balance) in accounts {
        store.create_account(*id, *balance);
    }
    store
}

pub fn memory_processor(
    accounts: &[(i64, Decimal)],
) -> (Arc<MemoryStore>, TransactionProcessor<MemoryStore>) {
    let store = memory_store(accounts);
    (store.clone(), TransactionProcessor::new(store))
}

/// Connect to DATABASE_URL and make sure the schema exists.
/// Returns `None` (and the caller skips) when no database is configured.
pub async fn setup_test_db() -> Option<PgPool> {
    dotenvy::dotenv().ok();
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set, skipping PostgreSQL test");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(30)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    pool.execute(include_str!("../../migrations/0001_init.sql"))
        .await
        .expect("Failed to apply schema");

    Some(pool)
}

/// Create a fresh account with an id no other test uses
pub async fn seed_account(pool: &PgPool, balance: Decimal) -> i64 {
    loop {
        let id = rand::random::<u32>() as i64 + 1_000;
        let inserted = sqlx::query(
            r#"
            INSERT INTO accounts (id, balance) VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(balance)
        .execute(pool)
        .await
        .expect("Failed to seed account")
        .rows_affected();

        if inserted == 1 {
            return id;
        }
    }
}
