//! Label-level wildcard handling.
//!
//! Wildcards only ever stand for whole labels when a rule is placed in the
//! table: a label containing `*` anywhere is keyed as a bare `*`. Matching a
//! query against the original rule text then uses [`wildcard_match`], a
//! single-pass matcher that never backtracks.

pub(crate) const WILDCARD: u8 = b'*';
pub(crate) const SEPARATOR: u8 = b'.';

/// Yield the compressed table key of `pattern` byte by byte.
pub(crate) fn key_bytes(pattern: &[u8]) -> impl Iterator<Item = u8> + '_ {
    pattern
        .split(|&b| b == SEPARATOR)
        .enumerate()
        .flat_map(|(idx, label)| {
            let label: &[u8] = if label.contains(&WILDCARD) {
                &[WILDCARD]
            } else {
                label
            };
            let separator: &[u8] = if idx == 0 { &[] } else { &[SEPARATOR] };
            separator.iter().chain(label).copied()
        })
}

/// Compressed table key of `pattern` as an owned string.
///
/// ```
/// use bluegate::blacklist::compress_key;
///
/// assert_eq!(compress_key("*ads*.example.com"), "*.example.com");
/// assert_eq!(compress_key("cdn.example.com"), "cdn.example.com");
/// ```
pub fn compress_key(pattern: &str) -> String {
    key_bytes(pattern.as_bytes()).map(char::from).collect()
}

/// Match `text` against a wildcard `pattern`, ignoring ASCII case.
///
/// The matcher walks both inputs once. A run of `*` switches it into an
/// expanding mode in which text bytes are skipped until the next pattern
/// byte lines up again. A matched `.` ends expansion: whatever follows a
/// label boundary must match literally until the next `*`. There is no
/// backtracking, so a `*` never reclaims a label boundary it already
/// committed to.
///
/// ```
/// use bluegate::blacklist::wildcard_match;
///
/// assert!(wildcard_match(b"trackads1.example.com", b"*ads*.example.com"));
/// assert!(wildcard_match(b"b.example.com", b"*.example.com"));
/// // A backtracking matcher would let `*` cover `a.c`; this one does not.
/// assert!(!wildcard_match(b"a.c.b", b"*.b"));
/// ```
pub fn wildcard_match(text: &[u8], pattern: &[u8]) -> bool {
    let mut expanding = false;
    let (mut t, mut p) = (0, 0);

    'resync: loop {
        let (mut ht, mut hp) = (t, p);

        while let (Some(a), Some(b)) = (text.get(ht), pattern.get(hp)) {
            if !a.eq_ignore_ascii_case(b) {
                break;
            }
            if *a == SEPARATOR {
                expanding = false;
                t = ht + 1;
                p = hp + 1;
                continue 'resync;
            }
            ht += 1;
            hp += 1;
        }

        if pattern.get(hp) == Some(&WILDCARD) {
            while pattern.get(hp) == Some(&WILDCARD) {
                hp += 1;
            }
            expanding = true;
            t = ht;
            p = hp;
            continue;
        }

        if ht >= text.len() || !expanding {
            return ht >= text.len() && hp >= pattern.len();
        }

        t += 1;
    }
}
