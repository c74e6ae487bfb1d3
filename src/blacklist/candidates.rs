//! Partial-match candidate enumeration.
//!
//! For a query such as `www.shop.example.com` every trailing window of labels
//! is considered, narrowest first (`com`, `example.com`, `shop.example.com`,
//! ...). Within a window each subset of the non-final labels may be replaced
//! by a `*` label, starting with the all-literal form. The window's rightmost
//! label always stays literal.

use super::glob::{SEPARATOR, WILDCARD};

/// Widest window that is permuted. Wider windows would need `2^(n-1)`
/// candidates each.
pub const MAX_WINDOW_LABELS: usize = 16;

/// Visit every candidate of `domain` until `visit` returns `Some`.
///
/// `visit` receives the window text (the trailing slice of `domain` the
/// candidate covers) and the candidate pattern itself.
pub(crate) fn find_candidate<'d, T>(
    domain: &'d [u8],
    mut visit: impl FnMut(&'d [u8], &[u8]) -> Option<T>,
) -> Option<T> {
    let starts: Vec<usize> = std::iter::once(0)
        .chain(
            domain
                .iter()
                .enumerate()
                .filter(|&(_, &b)| b == SEPARATOR)
                .map(|(idx, _)| idx + 1),
        )
        .collect();

    let mut pattern = Vec::with_capacity(domain.len() + 2 * MAX_WINDOW_LABELS);
    let width = starts.len().min(MAX_WINDOW_LABELS);

    for labels in 1..=width {
        let first = starts.len() - labels;
        let window = &domain[starts[first]..];

        for mask in 0u32..(1 << (labels - 1)) {
            pattern.clear();
            for (offset, &start) in starts[first..].iter().enumerate() {
                if offset > 0 {
                    pattern.push(SEPARATOR);
                }
                if mask & (1 << offset) != 0 {
                    pattern.push(WILDCARD);
                } else {
                    let end = starts
                        .get(first + offset + 1)
                        .map_or(domain.len(), |next| next - 1);
                    pattern.extend_from_slice(&domain[start..end]);
                }
            }

            if let Some(found) = visit(window, &pattern) {
                return Some(found);
            }
        }
    }

    None
}
