use sha1::{Digest, Sha1};

use crate::utils::types::HashPos;

/// Number of bits in the id space, N = 2^SHA1_BIT_COUNT (§3).
pub const SHA1_BIT_COUNT: usize = 160;

/// Derives the SHA-1 based id of an endpoint host string (§3, §9). Only the
/// host is hashed: the port and object name never participate in id
/// derivation, which is what lets two addresses on the same host agree on
/// a single ring position regardless of which object or port they name.
pub fn id(host: &str) -> HashPos {
    let digest = Sha1::digest(host.as_bytes());
    let mut pos = [0u8; 20];
    pos.copy_from_slice(&digest);
    pos
}

/// `x mod 2^160` viewed as a big-endian byte array, compared lexicographically
/// which is equivalent to unsigned integer comparison for fixed-width
/// big-endian encodings.
fn cmp(a: &HashPos, b: &HashPos) -> std::cmp::Ordering {
    a.cmp(b)
}

/// `l < r` on the id ring, i.e. plain unsigned comparison (no wraparound).
pub fn lt(a: &HashPos, b: &HashPos) -> bool {
    cmp(a, b) == std::cmp::Ordering::Less
}

/// Adds `2^i mod 2^160` to an id, used by finger-table and the stabilizer's
/// periodic lookups (§4.1).
pub fn add_pow2(pos: &HashPos, i: u32) -> HashPos {
    assert!((i as usize) < SHA1_BIT_COUNT, "finger index out of range");
    let mut acc = [0u16; 21];
    for (idx, byte) in pos.iter().enumerate() {
        acc[idx + 1] = *byte as u16;
    }
    let byte_index = 20 - 1 - (i as usize / 8);
    let bit = i % 8;
    acc[byte_index + 1] += 1u16 << bit;

    let mut carry = 0u16;
    for slot in acc.iter_mut().rev() {
        let sum = *slot + carry;
        *slot = sum & 0xFF;
        carry = sum >> 8;
    }
    // carry beyond byte 0 wraps around modulo 2^160 and is discarded.
    let mut out = [0u8; 20];
    for (idx, slot) in acc.iter().skip(1).enumerate() {
        out[idx] = *slot as u8;
    }
    out
}

/// The arc predicate `in_arc(x, l, r)` from §3/§8/GLOSSARY: true iff, starting
/// at `l` and moving clockwise around the ring, `x` is reached strictly after
/// `l` and no later than `r` (the half-open-on-the-left, closed-on-the-right
/// interval `(l, r]`, with wraparound when `l > r`). `l == r` is an invalid
/// input: the interval would otherwise ambiguously mean either the whole ring
/// or the empty set.
pub fn in_arc(x: &HashPos, l: &HashPos, r: &HashPos) -> bool {
    assert_ne!(
        l, r,
        "in_arc: left and right bounds must differ for circular comparison"
    );
    if lt(l, r) {
        lt(l, x) && !lt(r, x)
    } else {
        lt(l, x) || !lt(r, x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(n: u8) -> HashPos {
        let mut p = [0u8; 20];
        p[19] = n;
        p
    }

    #[test]
    fn id_is_deterministic_and_host_only() {
        assert_eq!(id("10.0.0.1"), id("10.0.0.1"));
        assert_ne!(id("10.0.0.1"), id("10.0.0.2"));
    }

    #[test]
    fn in_arc_simple_non_wrapping() {
        let (l, r) = (pos(10), pos(20));
        assert!(!in_arc(&pos(10), &l, &r)); // left excluded
        assert!(in_arc(&pos(11), &l, &r));
        assert!(in_arc(&pos(20), &l, &r)); // right included
        assert!(!in_arc(&pos(21), &l, &r));
        assert!(!in_arc(&pos(5), &l, &r));
    }

    #[test]
    fn in_arc_wrapping() {
        let (l, r) = (pos(250), pos(5));
        assert!(in_arc(&pos(251), &l, &r));
        assert!(in_arc(&pos(255), &l, &r));
        assert!(in_arc(&pos(0), &l, &r));
        assert!(in_arc(&pos(5), &l, &r));
        assert!(!in_arc(&pos(6), &l, &r));
        assert!(!in_arc(&pos(250), &l, &r));
    }

    #[test]
    #[should_panic]
    fn in_arc_rejects_equal_bounds() {
        let l = pos(7);
        in_arc(&pos(7), &l, &l);
    }

    #[test]
    fn add_pow2_wraps_modulo_ring_size() {
        let max = [0xFFu8; 20];
        let wrapped = add_pow2(&max, 0);
        assert_eq!(wrapped, [0u8; 20]);
    }

    #[test]
    fn add_pow2_matches_plain_addition_for_small_values() {
        let base = pos(1);
        assert_eq!(add_pow2(&base, 0), pos(2));
        assert_eq!(add_pow2(&base, 1), pos(3));
        assert_eq!(add_pow2(&base, 2), pos(5));
    }
}
