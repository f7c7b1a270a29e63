//! transaction_processor Library
//!
//! Idempotent win/lost transaction processing with a background cancellation
//! sweep. Re-exports modules for the server binary, tools and integration tests.

pub mod api;
pub mod domain;
pub mod jobs;
pub mod processor;
pub mod store;
pub mod sweeper;

pub mod config;
pub mod db;
mod error;

pub use config::Config;
pub use domain::{Amount, AmountError, Balance, DomainError, OperationContext};
pub use error::{AppError, AppResult};
pub use processor::{ApplyCommand, ApplyOutcome, ApplyStatus, TransactionProcessor};
pub use sweeper::{CancellationSweeper, SweepReport, SweepSettings};
