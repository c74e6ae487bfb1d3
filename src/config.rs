//! Configuration loading and validation.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::blacklist::MAX_TABLE_BITS;
use crate::error::{ConfigError, Result, ValidationError};

/// Main configuration for the Bluegate proxy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Address the proxy listens on.
    #[serde(
        default = "default_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,

    /// Activity log file, truncated at startup.
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,

    /// Domain blacklist settings.
    #[serde(default)]
    pub blacklist: BlacklistSettings,

    /// Worker pool and pipeline settings.
    #[serde(default)]
    pub pool: PoolSettings,

    /// Prometheus exporter settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Domain blacklist settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlacklistSettings {
    /// Rule file, one rule per delimiter-separated record.
    #[serde(default = "default_blacklist_path")]
    pub path: PathBuf,

    /// Record delimiter. Must be a single byte.
    #[serde(default = "default_delimiter")]
    pub delimiter: String,

    /// The rule table holds `2^table_bits` slots.
    #[serde(default = "default_table_bits")]
    pub table_bits: u8,
}

impl BlacklistSettings {
    /// The delimiter as a byte. Only meaningful once validated.
    pub fn delimiter_byte(&self) -> u8 {
        self.delimiter.as_bytes().first().copied().unwrap_or(b'\n')
    }
}

impl Default for BlacklistSettings {
    fn default() -> Self {
        Self {
            path: default_blacklist_path(),
            delimiter: default_delimiter(),
            table_bits: default_table_bits(),
        }
    }
}

/// Worker pool and pipeline settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolSettings {
    /// Capacity of each of the three pipeline queues.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound of the worker pool.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Number of logger threads.
    #[serde(default = "default_loggers")]
    pub loggers: usize,

    /// How long shutdown waits for queued connections to be picked up.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Read/write timeout on client and upstream sockets.
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,

    /// Sleep between accept attempts when no connection is pending.
    #[serde(default = "default_accept_poll_ms")]
    pub accept_poll_ms: u64,

    /// Stop accepting after this many connections.
    #[serde(default)]
    pub connection_limit: Option<usize>,
}

impl PoolSettings {
    #[inline]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[inline]
    pub const fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    #[inline]
    pub const fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_workers: default_max_workers(),
            loggers: default_loggers(),
            drain_timeout_ms: default_drain_timeout_ms(),
            io_timeout_secs: default_io_timeout_secs(),
            accept_poll_ms: default_accept_poll_ms(),
            connection_limit: None,
        }
    }
}

/// Prometheus metrics exporter configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose a `/metrics` endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Address of the metrics endpoint.
    #[serde(
        default = "default_metrics_listen",
        deserialize_with = "deserialize_socket_addr"
    )]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: default_metrics_listen(),
        }
    }
}

/// Port the proxy listens on by default.
pub const DEFAULT_PORT: u16 = 26180;

const fn default_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT)
}

fn default_log_file() -> PathBuf {
    PathBuf::from("proxy.log")
}

fn default_blacklist_path() -> PathBuf {
    PathBuf::from("blacklist.txt")
}

fn default_delimiter() -> String {
    "\n".to_string()
}

const fn default_table_bits() -> u8 {
    20
}

const fn default_queue_capacity() -> usize {
    1024
}

const fn default_max_workers() -> usize {
    100
}

const fn default_loggers() -> usize {
    5
}

const fn default_drain_timeout_ms() -> u64 {
    5_000
}

const fn default_io_timeout_secs() -> u64 {
    30
}

const fn default_accept_poll_ms() -> u64 {
    10
}

const fn default_metrics_listen() -> SocketAddr {
    SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 9100)
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> std::result::Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            log_file: default_log_file(),
            blacklist: BlacklistSettings::default(),
            pool: PoolSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Replace the listen port, keeping the listen address.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen.set_port(port);
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        let pool = &self.pool;

        if pool.queue_capacity == 0 {
            return Err(ValidationError::ZeroQueueCapacity);
        }

        if pool.max_workers == 0 {
            return Err(ValidationError::ZeroMaxWorkers);
        }

        if pool.loggers == 0 {
            return Err(ValidationError::ZeroLoggers);
        }

        if pool.io_timeout_secs == 0 {
            return Err(ValidationError::ZeroIoTimeout);
        }

        if pool.accept_poll_ms == 0 {
            return Err(ValidationError::ZeroAcceptPoll);
        }

        if pool.connection_limit == Some(0) {
            return Err(ValidationError::ZeroConnectionLimit);
        }

        let blacklist = &self.blacklist;

        if blacklist.table_bits == 0 || blacklist.table_bits > MAX_TABLE_BITS {
            return Err(ValidationError::InvalidTableBits {
                value: blacklist.table_bits,
                max: MAX_TABLE_BITS,
            });
        }

        if blacklist.delimiter.len() != 1 {
            return Err(ValidationError::InvalidDelimiter(blacklist.delimiter.clone()));
        }

        if blacklist.path.as_os_str().is_empty() {
            return Err(ValidationError::EmptyBlacklistPath);
        }

        if self.log_file.as_os_str().is_empty() {
            return Err(ValidationError::EmptyLogFile);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    fn validation_error(toml: &str) -> ValidationError {
        match Config::parse(toml) {
            Err(Error::Config(ConfigError::Validation(err))) => err,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn should_parse_full_config() {
        let toml = r#"
            listen = "127.0.0.1:8080"
            log_file = "/var/log/bluegate.log"

            [blacklist]
            path = "/etc/bluegate/rules.txt"
            delimiter = ";"
            table_bits = 16

            [pool]
            queue_capacity = 64
            max_workers = 8
            loggers = 2
            drain_timeout_ms = 250
            io_timeout_secs = 5
            accept_poll_ms = 20
            connection_limit = 1000

            [metrics]
            enabled = true
            listen = "0.0.0.0:9000"
        "#;

        let config = Config::parse(toml).unwrap();
        assert_eq!(config.listen.to_string(), "127.0.0.1:8080");
        assert_eq!(config.log_file, PathBuf::from("/var/log/bluegate.log"));
        assert_eq!(config.blacklist.delimiter_byte(), b';');
        assert_eq!(config.blacklist.table_bits, 16);
        assert_eq!(config.pool.queue_capacity, 64);
        assert_eq!(config.pool.max_workers, 8);
        assert_eq!(config.pool.loggers, 2);
        assert_eq!(config.pool.drain_timeout(), Duration::from_millis(250));
        assert_eq!(config.pool.io_timeout(), Duration::from_secs(5));
        assert_eq!(config.pool.accept_poll(), Duration::from_millis(20));
        assert_eq!(config.pool.connection_limit, Some(1000));
        assert!(config.metrics.enabled);
        assert_eq!(config.metrics.listen.to_string(), "0.0.0.0:9000");
    }

    #[test]
    fn should_apply_defaults_to_empty_config() {
        let config = Config::parse("").unwrap();

        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert_eq!(config.log_file, PathBuf::from("proxy.log"));
        assert_eq!(config.blacklist.path, PathBuf::from("blacklist.txt"));
        assert_eq!(config.blacklist.delimiter_byte(), b'\n');
        assert_eq!(config.blacklist.table_bits, 20);
        assert_eq!(config.pool.queue_capacity, 1024);
        assert_eq!(config.pool.max_workers, 100);
        assert_eq!(config.pool.loggers, 5);
        assert_eq!(config.pool.drain_timeout(), Duration::from_secs(5));
        assert!(config.pool.connection_limit.is_none());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn should_match_default_impl() {
        let parsed = Config::parse("").unwrap();
        let default = Config::default();
        assert_eq!(parsed.listen, default.listen);
        assert_eq!(parsed.pool.queue_capacity, default.pool.queue_capacity);
        assert!(default.validate().is_ok());
    }

    #[test]
    fn should_override_port() {
        let config = Config::default().with_port(8080);
        assert_eq!(config.listen.port(), 8080);
        assert!(config.listen.ip().is_unspecified());
    }

    #[test]
    fn should_reject_zero_sizes() {
        assert_eq!(
            validation_error("[pool]\nqueue_capacity = 0"),
            ValidationError::ZeroQueueCapacity
        );
        assert_eq!(
            validation_error("[pool]\nmax_workers = 0"),
            ValidationError::ZeroMaxWorkers
        );
        assert_eq!(
            validation_error("[pool]\nloggers = 0"),
            ValidationError::ZeroLoggers
        );
        assert_eq!(
            validation_error("[pool]\nio_timeout_secs = 0"),
            ValidationError::ZeroIoTimeout
        );
        assert_eq!(
            validation_error("[pool]\nconnection_limit = 0"),
            ValidationError::ZeroConnectionLimit
        );
    }

    #[test]
    fn should_reject_invalid_blacklist_settings() {
        assert_eq!(
            validation_error("[blacklist]\ntable_bits = 0"),
            ValidationError::InvalidTableBits { value: 0, max: MAX_TABLE_BITS }
        );
        assert_eq!(
            validation_error("[blacklist]\ntable_bits = 31"),
            ValidationError::InvalidTableBits { value: 31, max: MAX_TABLE_BITS }
        );
        assert_eq!(
            validation_error("[blacklist]\ndelimiter = \"\\r\\n\""),
            ValidationError::InvalidDelimiter("\r\n".into())
        );
        assert_eq!(
            validation_error("[blacklist]\ndelimiter = \"\""),
            ValidationError::InvalidDelimiter(String::new())
        );
    }

    #[test]
    fn should_reject_invalid_listen_address() {
        assert!(Config::parse(r#"listen = "not-an-address""#).is_err());
    }

    #[test]
    fn should_reject_unknown_field() {
        assert!(Config::parse(r#"unknown_field = "value""#).is_err());
        assert!(Config::parse("[pool]\nthreads = 4").is_err());
    }
}
