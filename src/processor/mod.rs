//! Processor module
//!
//! The transaction-processing core: validation, idempotency check, balance
//! mutation and record insertion for one incoming event.

mod commands;
mod transaction_processor;

pub use commands::{ApplyCommand, ApplyOutcome, ApplyStatus};
pub use transaction_processor::TransactionProcessor;
