//! Domain Error Types
//!
//! Closed taxonomy of failures the processing core can report.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

use super::OwnerId;

/// Domain-specific errors
///
/// The adapter layer dispatches on these variants to pick a status code;
/// nothing upstream compares error messages.
#[derive(Debug, Error)]
pub enum DomainError {
    /// Amount text is malformed, non-positive or too precise
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Direction is not one of the recognized values
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Source channel is not one of the recognized values
    #[error("invalid source type: {0}")]
    InvalidSource(String),

    /// Applying the event would take the balance below zero
    #[error("insufficient balance: required {required}, available {available}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
    },

    /// Idempotency key already belongs to another owner
    #[error(
        "duplicate transaction: {key} already exists for user {existing_owner}, requested for user {requested_owner}"
    )]
    DuplicateKeyOwnerMismatch {
        key: Uuid,
        existing_owner: OwnerId,
        requested_owner: OwnerId,
    },

    #[error("user not found: {0}")]
    AccountNotFound(OwnerId),

    #[error("transaction not found: {0}")]
    RecordNotFound(Uuid),

    /// Infrastructure failure
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

}
