//! Store Errors
//!
//! Error types for account and ledger store operations.

/// Errors that can occur in a store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Uniqueness constraint rejected an insert or commit
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// CHECK constraint rejected a write (e.g. negative balance)
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row does not exist
    #[error("Row not found: {0}")]
    NotFound(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    /// Stored data could not be decoded or store state is inconsistent
    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }

    pub fn is_check_violation(&self) -> bool {
        matches!(self, StoreError::CheckViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation(db_err.message().to_string());
            }
            if db_err.is_check_violation() {
                return StoreError::CheckViolation(db_err.message().to_string());
            }
        }
        StoreError::Database(err)
    }
}
