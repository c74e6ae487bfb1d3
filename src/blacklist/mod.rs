//! Domain blacklist backed by a memory-mapped rule file.
//!
//! The rule file is mapped read-only and scanned once into an
//! open-addressing table of `2^table_bits` slots. Slots reference rules by
//! byte range, so the mapped file stays the only copy of the rule text.
//! After the build the blacklist is immutable and can be shared across
//! threads behind an `Arc` without locking.
//!
//! # Matching
//!
//! A lookup first searches for the full query verbatim. Failing that, it walks
//! the partial-match candidates of the query (see [`MAX_WINDOW_LABELS`]) from
//! the narrowest trailing window to the widest, probing each candidate's
//! chain and testing every rule on it with [`wildcard_match`]. The first rule
//! that matches decides: a whitelist rule (`!` prefix) means "not blocked".
//!
//! # Example
//!
//! ```
//! use bluegate::blacklist::DomainBlacklist;
//!
//! let blacklist = DomainBlacklist::from_bytes(b"sex.com\n!news.sex.com\n", b'\n', 8).unwrap();
//!
//! assert!(blacklist.is_blocked("sex.com"));
//! assert!(blacklist.is_blocked("www.sex.com"));
//! assert!(!blacklist.is_blocked("news.sex.com"));
//! assert!(!blacklist.is_blocked("example.com"));
//! ```

mod candidates;
mod glob;
mod hash;
mod rules;

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, info};

pub use candidates::MAX_WINDOW_LABELS;
pub use glob::{compress_key, wildcard_match};

use candidates::find_candidate;
use hash::{digest_key, mutate};
use rules::{Rule, WHITELIST_MARKER};

use crate::config::BlacklistSettings;

/// Largest accepted `table_bits`.
pub const MAX_TABLE_BITS: u8 = 30;

/// Rules shown by [`DomainBlacklist::log_rules`] by default.
pub const RULE_DUMP_LIMIT: usize = 15;

/// Errors raised while building a [`DomainBlacklist`].
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The rule file could not be opened or mapped.
    #[error("failed to load rule file {path:?}")]
    Io {
        /// Path of the rule file.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `table_bits` is outside `1..=MAX_TABLE_BITS`.
    #[error("table_bits must be between 1 and {MAX_TABLE_BITS}, got {0}")]
    InvalidTableBits(u8),

    /// A slot sequence came back to its starting slot.
    #[error("too many collisions: {rules} rules do not fit a table of {capacity} slots")]
    TooManyCollisions {
        /// Number of rules inserted before the failure.
        rules: usize,
        /// Table capacity.
        capacity: usize,
    },
}

enum RuleSource {
    Mapped(Mmap),
    Owned(Box<[u8]>),
}

impl Deref for RuleSource {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => mmap,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// A rule that matched a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    pattern: &'a [u8],
    whitelist: bool,
}

impl<'a> RuleMatch<'a> {
    /// The rule text without the whitelist marker.
    pub fn pattern(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.pattern)
    }

    /// Whether the rule is a whitelist override.
    pub const fn is_whitelisted(&self) -> bool {
        self.whitelist
    }
}

impl fmt::Display for RuleMatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.whitelist {
            write!(f, "{}", char::from(WHITELIST_MARKER))?;
        }
        f.write_str(&self.pattern())
    }
}

/// Immutable set of domain rules with wildcard and whitelist support.
pub struct DomainBlacklist {
    source: RuleSource,
    table: Box<[Option<Rule>]>,
    mask: u32,
    len: usize,
}

impl DomainBlacklist {
    /// Map the rule file at `path` and build a table of `2^table_bits` slots.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be mapped, when `table_bits` is out of
    /// range, or when the rules do not fit the table.
    pub fn open(path: impl AsRef<Path>, delimiter: u8, table_bits: u8) -> Result<Self, BuildError> {
        let path = path.as_ref();
        check_table_bits(table_bits)?;

        let file = File::open(path).map_err(|source| BuildError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let size = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|source| BuildError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        // Zero-length files cannot be mapped on every platform.
        let source = if size == 0 {
            RuleSource::Owned(Box::default())
        } else {
            // SAFETY: the mapping is read-only and the rule file is not
            // expected to be modified while the proxy runs.
            let mmap = unsafe {
                Mmap::map(&file).map_err(|source| BuildError::Io {
                    path: path.to_path_buf(),
                    source,
                })?
            };
            RuleSource::Mapped(mmap)
        };

        let blacklist = Self::build(source, delimiter, table_bits)?;
        info!(
            path = %path.display(),
            rules = blacklist.len(),
            capacity = blacklist.capacity(),
            "blacklist loaded"
        );
        Ok(blacklist)
    }

    /// Open the rule file described by the `[blacklist]` settings.
    pub fn from_settings(settings: &BlacklistSettings) -> crate::Result<Self> {
        Ok(Self::open(
            &settings.path,
            settings.delimiter_byte(),
            settings.table_bits,
        )?)
    }

    /// Build a blacklist from in-memory rule text.
    ///
    /// # Errors
    ///
    /// Fails when `table_bits` is out of range or the rules do not fit.
    pub fn from_bytes(
        rules: impl AsRef<[u8]>,
        delimiter: u8,
        table_bits: u8,
    ) -> Result<Self, BuildError> {
        check_table_bits(table_bits)?;
        let source = RuleSource::Owned(Box::from(rules.as_ref()));
        Self::build(source, delimiter, table_bits)
    }

    fn build(source: RuleSource, delimiter: u8, table_bits: u8) -> Result<Self, BuildError> {
        let capacity = 1usize << table_bits;
        let mut blacklist = Self {
            source,
            table: vec![None; capacity].into_boxed_slice(),
            mask: (capacity - 1) as u32,
            len: 0,
        };

        let found: Vec<Rule> = rules::scan(&blacklist.source, delimiter).collect();
        for rule in found {
            blacklist.insert(rule)?;
        }

        Ok(blacklist)
    }

    fn insert(&mut self, rule: Rule) -> Result<(), BuildError> {
        let text = rule.text(&self.source);
        let mut hash = digest_key(text);
        let start = (hash & self.mask) as usize;
        let mut idx = start;

        loop {
            match self.table[idx] {
                None => {
                    self.table[idx] = Some(rule);
                    self.len += 1;
                    return Ok(());
                }
                Some(existing) if existing.text(&self.source).eq_ignore_ascii_case(text) => {
                    debug!(rule = %String::from_utf8_lossy(text), "duplicate rule replaced");
                    self.table[idx] = Some(rule);
                    return Ok(());
                }
                Some(_) => {}
            }

            hash = mutate(hash);
            idx = (hash & self.mask) as usize;
            if idx == start {
                return Err(BuildError::TooManyCollisions {
                    rules: self.len,
                    capacity: self.table.len(),
                });
            }
        }
    }

    /// Walk the slot chain of `key`, returning the first rule accepted by
    /// `accept`. The walk ends at an empty slot, after a full cycle, or once
    /// every slot has been visited.
    fn find_slot(&self, key: &[u8], mut accept: impl FnMut(&[u8]) -> bool) -> Option<Rule> {
        let mut hash = digest_key(key);
        let start = (hash & self.mask) as usize;
        let mut idx = start;

        for _ in 0..self.table.len() {
            let rule = self.table[idx]?;
            if accept(rule.text(&self.source)) {
                return Some(rule);
            }

            hash = mutate(hash);
            idx = (hash & self.mask) as usize;
            if idx == start {
                break;
            }
        }

        None
    }

    fn to_match(&self, rule: Rule) -> RuleMatch<'_> {
        RuleMatch {
            pattern: rule.text(&self.source),
            whitelist: rule.whitelist,
        }
    }

    /// Find the rule deciding `domain`, whitelist rules included.
    ///
    /// Matching ignores ASCII case and a trailing dot.
    pub fn lookup(&self, domain: &str) -> Option<RuleMatch<'_>> {
        let domain = domain.trim_end_matches('.').as_bytes();
        if domain.is_empty() || self.len == 0 {
            return None;
        }

        if let Some(rule) = self.find_slot(domain, |text| text.eq_ignore_ascii_case(domain)) {
            return Some(self.to_match(rule));
        }

        find_candidate(domain, |window, pattern| {
            self.find_slot(pattern, |text| wildcard_match(window, text))
        })
        .map(|rule| self.to_match(rule))
    }

    /// The rule blocking `domain`, or `None` when it is allowed.
    #[inline]
    pub fn blocked_by(&self, domain: &str) -> Option<RuleMatch<'_>> {
        self.lookup(domain).filter(|rule| !rule.is_whitelisted())
    }

    /// Whether `domain` is blocked.
    #[inline]
    pub fn is_blocked(&self, domain: &str) -> bool {
        self.blocked_by(domain).is_some()
    }

    /// Number of distinct rules stored.
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no rule is stored.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of table slots.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Iterate stored rules as `(slot, rule)` in table order.
    pub fn rules(&self) -> impl Iterator<Item = (usize, RuleMatch<'_>)> + '_ {
        self.table
            .iter()
            .enumerate()
            .filter_map(|(slot, rule)| rule.map(|rule| (slot, self.to_match(rule))))
    }

    /// Log at most `limit` stored rules at debug level and return how many
    /// were logged.
    pub fn log_rules(&self, limit: usize) -> usize {
        let mut logged = 0;
        for (slot, rule) in self.rules().take(limit) {
            debug!(slot, %rule, "blacklist rule");
            logged += 1;
        }
        if self.len > logged {
            debug!(omitted = self.len - logged, "more blacklist rules not shown");
        }
        logged
    }

    /// Release the table and unmap the rule file.
    pub fn close(self) {
        debug!(rules = self.len, "blacklist closed");
    }
}

impl fmt::Debug for DomainBlacklist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomainBlacklist")
            .field("len", &self.len)
            .field("capacity", &self.table.len())
            .field("mapped", &matches!(self.source, RuleSource::Mapped(_)))
            .finish()
    }
}

fn check_table_bits(table_bits: u8) -> Result<(), BuildError> {
    if table_bits == 0 || table_bits > MAX_TABLE_BITS {
        return Err(BuildError::InvalidTableBits(table_bits));
    }
    Ok(())
}
