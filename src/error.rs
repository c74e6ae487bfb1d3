//! Error types for the Bluegate proxy.

use std::io;

use thiserror::Error;

use crate::blacklist::BuildError;

/// Main error type for Bluegate operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("blacklist error: {0}")]
    Blacklist(#[from] BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metrics error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
}

/// Validation errors for configuration values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("pool.queue_capacity must be greater than 0")]
    ZeroQueueCapacity,

    #[error("pool.max_workers must be greater than 0")]
    ZeroMaxWorkers,

    #[error("pool.loggers must be greater than 0")]
    ZeroLoggers,

    #[error("pool.io_timeout_secs must be greater than 0")]
    ZeroIoTimeout,

    #[error("pool.accept_poll_ms must be greater than 0")]
    ZeroAcceptPoll,

    #[error("pool.connection_limit must be greater than 0 when set")]
    ZeroConnectionLimit,

    #[error("blacklist.table_bits must be between 1 and {max}, got {value}")]
    InvalidTableBits { value: u8, max: u8 },

    #[error("blacklist.delimiter must be exactly one byte, got {0:?}")]
    InvalidDelimiter(String),

    #[error("blacklist.path cannot be empty")]
    EmptyBlacklistPath,

    #[error("log_file cannot be empty")]
    EmptyLogFile,
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;
