//! Categorical types
//!
//! Direction, source channel and lifecycle status of ledger records.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DomainError;

/// Account identifier (positive integer)
pub type OwnerId = i64;

/// Direction of a monetary event.
///
/// On the wire `win` increases the balance and `lost` decreases it;
/// `increase` / `decrease` are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "win", alias = "increase")]
    Increase,
    #[serde(rename = "lost", alias = "decrease")]
    Decrease,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Increase => "win",
            Direction::Decrease => "lost",
        }
    }

    /// The direction that undoes this one.
    pub fn reversed(self) -> Direction {
        match self {
            Direction::Increase => Direction::Decrease,
            Direction::Decrease => Direction::Increase,
        }
    }

    /// Signed effect of `amount` moved in this direction.
    pub fn signed(self, amount: Decimal) -> Decimal {
        match self {
            Direction::Increase => amount,
            Direction::Decrease => -amount,
        }
    }
}

impl FromStr for Direction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" | "increase" => Ok(Direction::Increase),
            "lost" | "decrease" => Ok(Direction::Decrease),
            other => Err(DomainError::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Channel that submitted an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Game,
    Server,
    Payment,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Game => "game",
            Source::Server => "server",
            Source::Payment => "payment",
        }
    }
}

impl FromStr for Source {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "game" => Ok(Source::Game),
            "server" => Ok(Source::Server),
            "payment" => Ok(Source::Payment),
            other => Err(DomainError::InvalidSource(other.to_string())),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a ledger record. Only `Applied -> Reversed` is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Applied,
    Reversed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Applied => "applied",
            RecordStatus::Reversed => "reversed",
        }
    }

    pub fn can_transition_to(&self, next: RecordStatus) -> bool {
        matches!((self, next), (RecordStatus::Applied, RecordStatus::Reversed))
    }
}

impl FromStr for RecordStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applied" => Ok(RecordStatus::Applied),
            "reversed" => Ok(RecordStatus::Reversed),
            other => Err(DomainError::InvalidState(other.to_string())),
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
