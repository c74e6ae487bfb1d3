//! Table key hashing.
//!
//! Keys are hashed with an additive rolling hash (`h = h + (h << 5) + byte`)
//! finished by one linear-congruential step. The same step is reapplied to
//! derive the next slot position on collision.

use super::glob::key_bytes;

const LCG_MULTIPLIER: u32 = 1_664_525;
const LCG_INCREMENT: u32 = 1_013_904_223;

/// Advance a hash by one linear-congruential step.
///
/// Modulo any power of two this has a full period, so the slot sequence
/// `mutate(h) & mask` eventually visits every slot of the table.
#[inline]
pub(crate) const fn mutate(hash: u32) -> u32 {
    hash.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT)
}

/// Hash raw key bytes, folding ASCII case.
#[inline]
pub(crate) fn digest(bytes: impl IntoIterator<Item = u8>) -> u32 {
    let hash = bytes.into_iter().fold(0u32, |hash, byte| {
        hash.wrapping_add((hash << 5).wrapping_add(u32::from(byte.to_ascii_lowercase())))
    });
    mutate(hash)
}

/// Hash a rule or candidate pattern by its compressed table key.
///
/// Every label containing `*` contributes a single `*`, so `*ads*.example.com`
/// and `*.example.com` land on the same slot chain.
#[inline]
pub(crate) fn digest_key(pattern: &[u8]) -> u32 {
    digest(key_bytes(pattern))
}
