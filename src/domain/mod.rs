//! Domain module
//!
//! Core domain types: validated money, categorical tags, store row
//! snapshots and the error taxonomy.

pub mod amount;
pub mod context;
pub mod error;
pub mod records;
pub mod types;

pub use amount::{format_money, Amount, AmountError, Balance};
pub use context::OperationContext;
pub use error::DomainError;
pub use records::{Account, LedgerRecord, NewLedgerRecord};
pub use types::{Direction, OwnerId, RecordStatus, Source};
