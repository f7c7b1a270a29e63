//! Configuration module
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::sweeper::SweepSettings;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection URL
    pub database_url: String,

    /// Maximum database connections in pool
    pub database_max_connections: u32,

    /// Minimum idle database connections in pool
    pub database_min_connections: u32,

    /// How long to wait for a pooled connection
    pub database_acquire_timeout: Duration,

    /// Server host
    pub host: String,

    /// Server port
    pub port: u16,

    /// Environment (development, production)
    pub environment: String,

    /// Log output format: "pretty" or "json"
    pub log_format: String,

    /// Time between cancellation sweeps
    pub sweep_interval: Duration,

    /// Records examined per sweep
    pub sweep_batch_size: usize,

    /// Upper bound on graceful shutdown
    pub shutdown_timeout: Duration,
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url =
            env::var("DATABASE_URL").map_err(|_| ConfigError::MissingEnv("DATABASE_URL"))?;

        let database_max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 25)?;
        let database_min_connections = parse_or("DATABASE_MIN_CONNECTIONS", 5)?;
        if database_min_connections > database_max_connections {
            return Err(ConfigError::InvalidValue("DATABASE_MIN_CONNECTIONS"));
        }

        let database_acquire_timeout =
            Duration::from_secs(parse_or("DATABASE_ACQUIRE_TIMEOUT_SECS", 10)?);

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_or("PORT", 8080)?;

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());
        if log_format != "pretty" && log_format != "json" {
            return Err(ConfigError::InvalidValue("LOG_FORMAT"));
        }

        let sweep_interval_secs: u64 = parse_or("SWEEP_INTERVAL_SECS", 180)?;
        if sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue("SWEEP_INTERVAL_SECS"));
        }

        let sweep_batch_size = parse_or("SWEEP_BATCH_SIZE", 10)?;
        if sweep_batch_size == 0 {
            return Err(ConfigError::InvalidValue("SWEEP_BATCH_SIZE"));
        }

        let shutdown_timeout = Duration::from_secs(parse_or("SHUTDOWN_TIMEOUT_SECS", 30)?);

        Ok(Self {
            database_url,
            database_max_connections,
            database_min_connections,
            database_acquire_timeout,
            host,
            port,
            environment,
            log_format,
            sweep_interval: Duration::from_secs(sweep_interval_secs),
            sweep_batch_size,
            shutdown_timeout,
        })
    }

    /// Check if running in production
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    /// Settings handed to the cancellation sweeper
    pub fn sweep_settings(&self) -> SweepSettings {
        SweepSettings::new(self.sweep_interval, self.sweep_batch_size)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnv(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(&'static str),
}
