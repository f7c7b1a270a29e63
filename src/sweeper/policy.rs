//! Selection policies
//!
//! Decide which applied records a sweep run tries to reverse.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::LedgerRecord;
use crate::store::{LedgerStore, StoreError};

/// Given a batch size, return candidate records for reversal.
#[async_trait]
pub trait SelectionPolicy: Send + Sync {
    async fn select(&self, batch_size: usize) -> Result<Vec<LedgerRecord>, StoreError>;

    /// Short name for logs
    fn name(&self) -> &'static str;
}

fn to_limit(batch_size: usize) -> i64 {
    i64::try_from(batch_size).unwrap_or(i64::MAX)
}

/// Applied records with an odd id, highest id first
pub struct OddIdPolicy<S> {
    store: Arc<S>,
}

impl<S> OddIdPolicy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: LedgerStore> SelectionPolicy for OddIdPolicy<S> {
    async fn select(&self, batch_size: usize) -> Result<Vec<LedgerRecord>, StoreError> {
        self.store.latest_odd_applied(to_limit(batch_size)).await
    }

    fn name(&self) -> &'static str {
        "odd_id"
    }
}

/// The most recently applied records
pub struct LatestAppliedPolicy<S> {
    store: Arc<S>,
}

impl<S> LatestAppliedPolicy<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: LedgerStore> SelectionPolicy for LatestAppliedPolicy<S> {
    async fn select(&self, batch_size: usize) -> Result<Vec<LedgerRecord>, StoreError> {
        self.store.latest_applied(to_limit(batch_size)).await
    }

    fn name(&self) -> &'static str {
        "latest_applied"
    }
}
