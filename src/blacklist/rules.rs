//! Rule file record scanning.
//!
//! # Format
//!
//! Records are separated by a single delimiter byte (newline by default):
//!
//! ```text
//! # comment
//! example.com
//! 0.0.0.0 tracker.example.net
//! *ads*.example.org
//! !shop.example.org
//! ```
//!
//! - surrounding whitespace is trimmed, empty records are skipped
//! - records starting with `#` are comments
//! - a leading IP address followed by whitespace is dropped (hosts files)
//! - a leading `!` marks a whitelist rule
//! - only the first whitespace-separated token is kept as the rule

use std::net::IpAddr;

/// Marker prefix of a whitelist rule.
pub(crate) const WHITELIST_MARKER: u8 = b'!';
const COMMENT_MARKER: u8 = b'#';

/// A rule located inside the rule source. `start..start + len` excludes the
/// whitelist marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rule {
    pub start: usize,
    pub len: usize,
    pub whitelist: bool,
}

impl Rule {
    #[inline]
    pub fn text<'a>(&self, source: &'a [u8]) -> &'a [u8] {
        &source[self.start..self.start + self.len]
    }
}

/// Scan `source` and yield every rule it defines, in file order.
pub(crate) fn scan(source: &[u8], delimiter: u8) -> impl Iterator<Item = Rule> + '_ {
    let mut offset = 0;
    source.split(move |&b| b == delimiter).filter_map(move |record| {
        let start = offset;
        offset += record.len() + 1;
        parse_record(record).map(|(rel, len, whitelist)| Rule {
            start: start + rel,
            len,
            whitelist,
        })
    })
}

/// Parse one record into `(offset, len, whitelist)` relative to the record.
fn parse_record(record: &[u8]) -> Option<(usize, usize, bool)> {
    let mut pos = skip_whitespace(record, 0);
    if pos == record.len() || record[pos] == COMMENT_MARKER {
        return None;
    }

    let first_end = token_end(record, pos);
    if first_end < record.len() && is_ip(&record[pos..first_end]) {
        pos = skip_whitespace(record, first_end);
    }

    let whitelist = record.get(pos) == Some(&WHITELIST_MARKER);
    if whitelist {
        pos += 1;
    }

    let end = token_end(record, pos);
    (end > pos).then_some((pos, end - pos, whitelist))
}

#[inline]
fn skip_whitespace(record: &[u8], from: usize) -> usize {
    record[from..]
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(record.len(), |idx| from + idx)
}

#[inline]
fn token_end(record: &[u8], from: usize) -> usize {
    record[from..]
        .iter()
        .position(u8::is_ascii_whitespace)
        .map_or(record.len(), |idx| from + idx)
}

fn is_ip(token: &[u8]) -> bool {
    std::str::from_utf8(token).is_ok_and(|token| token.parse::<IpAddr>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str, delimiter: u8) -> Vec<(String, bool)> {
        scan(source.as_bytes(), delimiter)
            .map(|rule| {
                (
                    String::from_utf8_lossy(rule.text(source.as_bytes())).into_owned(),
                    rule.whitelist,
                )
            })
            .collect()
    }

    #[test]
    fn should_scan_plain_records() {
        assert_eq!(
            texts("sex.com\n!news.sex.com\n", b'\n'),
            vec![("sex.com".into(), false), ("news.sex.com".into(), true)]
        );
    }

    #[test]
    fn should_skip_comments_and_blank_records() {
        let source = "# header\n\n   \n\t\nexample.com\n  # indented comment\n";
        assert_eq!(texts(source, b'\n'), vec![("example.com".into(), false)]);
    }

    #[test]
    fn should_strip_ip_prefix() {
        let source = "0.0.0.0 ads.example.com\n127.0.0.1\ttracker.example.net\n::1 v6.example.org\n";
        assert_eq!(
            texts(source, b'\n'),
            vec![
                ("ads.example.com".into(), false),
                ("tracker.example.net".into(), false),
                ("v6.example.org".into(), false),
            ]
        );
    }

    #[test]
    fn should_keep_domain_that_only_looks_numeric() {
        assert_eq!(texts("1.2.3.example.com\n", b'\n'), vec![("1.2.3.example.com".into(), false)]);
    }

    #[test]
    fn should_handle_crlf_and_missing_final_delimiter() {
        assert_eq!(
            texts("a.com\r\nb.com", b'\n'),
            vec![("a.com".into(), false), ("b.com".into(), false)]
        );
    }

    #[test]
    fn should_honor_custom_delimiter() {
        assert_eq!(
            texts("a.com;!b.com; ;c.com", b';'),
            vec![("a.com".into(), false), ("b.com".into(), true), ("c.com".into(), false)]
        );
    }

    #[test]
    fn should_drop_bare_whitelist_marker() {
        assert!(texts("!\n! \n", b'\n').is_empty());
    }

    #[test]
    fn should_report_offsets_into_source() {
        let source = b"  a.com\n0.0.0.0 !b.com";
        let rules: Vec<_> = scan(source, b'\n').collect();
        assert_eq!(rules[0], Rule { start: 2, len: 5, whitelist: false });
        assert_eq!(rules[1], Rule { start: 17, len: 5, whitelist: true });
    }
}
