//! Bluegate - A multithreaded forward proxy with a domain blacklist.
//!
//! Bluegate accepts HTTP clients, answers requests for blacklisted domains
//! with a small blocked page and relays every other request upstream. All
//! activity is recorded in a log file by a pool of background loggers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`queue`]: Bounded blocking queue with a multi-phase exit
//! - [`blacklist`]: Domain blacklist with wildcard and whitelist rules
//! - [`pool`]: Worker pool that grows when every worker is busy
//! - [`pipeline`]: Connection, logging and file-writing stages
//! - [`server`]: Accept loop and signal handling
//! - [`http`]: Request parsing and the blocked page
//! - [`record`]: Log records and their persisted format
//! - [`buffer`]: Growable byte accumulator
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust
//! use bluegate::blacklist::DomainBlacklist;
//!
//! let rules = b"ads.example.com\n*.tracker.net\n!ok.tracker.net\n";
//! let blacklist = DomainBlacklist::from_bytes(rules, b'\n', 8).unwrap();
//!
//! assert!(blacklist.is_blocked("ads.example.com"));
//! assert!(blacklist.is_blocked("cdn.tracker.net"));
//! assert!(!blacklist.is_blocked("ok.tracker.net"));
//! ```

pub mod blacklist;
pub mod buffer;
pub mod config;
pub mod error;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod pool;
pub mod queue;
pub mod record;
pub mod server;

pub use config::Config;
pub use error::{Error, Result};
