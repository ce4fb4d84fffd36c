//! Bit helpers and key builders

use crate::constants::WORD_BITS;
use crate::types::{Key, Pair, Word};
use ipnet::IpNet;

/// Number of words needed for a key of `key_bits` bits.
#[inline]
pub const fn words_for_bits(key_bits: u32) -> usize {
    key_bits.div_ceil(WORD_BITS) as usize
}

/// Word index and single-bit mask for a key bit.
#[inline]
pub const fn bit_position(bit: u32) -> (usize, Word) {
    ((bit / WORD_BITS) as usize, 1 << (bit % WORD_BITS))
}

/// Children of a split on `bit` that `key` must be routed to.
/// An unmasked bit sends the key both ways.
#[inline]
pub fn branch(key: &[Pair], bit: u32) -> [bool; 2] {
    let (w, b) = bit_position(bit);
    let p = &key[w];
    if p.mask & b == 0 {
        [true, true]
    } else {
        let one = p.value & b != 0;
        [!one, one]
    }
}

/// True when `key` fixes `bit` (to either value).
#[inline]
pub fn is_masked(key: &[Pair], bit: u32) -> bool {
    let (w, b) = bit_position(bit);
    key[w].mask & b != 0
}

/// Does `key` fall under the accumulated constraint `node_key`?  Bits fixed
/// by both must agree.
#[inline]
pub fn is_under(key: &[Pair], node_key: &[Pair]) -> bool {
    key.iter()
        .zip(node_key)
        .all(|(p, n)| p.value & n.mask == n.value & p.mask)
}

/// Accumulated key of a split child: parent's key with `bit` fixed to `side`.
pub fn child_key(parent: &[Pair], bit: u32, side: usize) -> Key {
    let (w, b) = bit_position(bit);
    let mut k: Key = parent.into();
    k[w].mask |= b;
    if side == 1 {
        k[w].value |= b;
    }
    k
}

#[inline]
pub fn mask_for_len(len: u8) -> Word {
    if len == 0 {
        0
    } else if len >= WORD_BITS as u8 {
        !0
    } else {
        !(!0 >> len)
    }
}

/// Build an `n_words` key from an IP prefix.  IPv4 occupies word 0, IPv6 words
/// 0..4 (most significant first); remaining words are wildcards.
pub fn prefix_key(net: &IpNet, n_words: usize) -> Option<Key> {
    let words: Vec<Word> = match net {
        IpNet::V4(v4) => vec![u32::from(v4.network())],
        IpNet::V6(v6) => {
            let x = u128::from(v6.network());
            (0..4).map(|i| (x >> (96 - 32 * i)) as u32).collect()
        }
    };
    if words.len() > n_words {
        return None;
    }
    let mut rest = net.prefix_len();
    let mut key = vec![Pair::wildcard(); n_words];
    for (slot, w) in key.iter_mut().zip(words) {
        let len = rest.min(WORD_BITS as u8);
        rest -= len;
        let mask = mask_for_len(len);
        *slot = Pair::new(mask, w & mask);
    }
    Some(key.into_boxed_slice())
}

// Packs an index and generation into a single u64 for ABA-safe handles.
#[inline]
pub fn pack(index: u32, gen: u32) -> u64 {
    ((gen as u64) << 32) | (index as u64)
}

#[inline]
pub fn unpack(packed: u64) -> (u32, u32) {
    (packed as u32, (packed >> 32) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_by_split_bit() {
        let k = [Pair::new(0b1100, 0b0100)];
        assert_eq!(branch(&k, 2), [false, true]);
        assert_eq!(branch(&k, 3), [true, false]);
        assert_eq!(branch(&k, 0), [true, true]);
        assert!(is_masked(&k, 3));
        assert!(!is_masked(&k, 1));
    }

    #[test]
    fn child_keys_fix_the_split_bit() {
        let root = [Pair::wildcard(), Pair::wildcard()];
        let k1 = child_key(&root, 33, 1);
        assert_eq!(k1[1], Pair::new(2, 2));
        let k0 = child_key(&k1, 0, 0);
        assert_eq!(k0[0], Pair::new(1, 0));
        assert_eq!(k0[1], Pair::new(2, 2));
        assert!(is_under(&[Pair::new(0, 0), Pair::new(3, 2)], &k1));
        assert!(!is_under(&[Pair::new(0, 0), Pair::new(2, 0)], &k1));
    }

    #[test]
    fn v4_and_v6_prefix_keys() {
        let k = prefix_key(&"10.1.2.0/24".parse().unwrap(), 1).unwrap();
        assert_eq!(k[0], Pair::new(0xffff_ff00, 0x0a01_0200));

        let k = prefix_key(&"2001:db8::/40".parse().unwrap(), 4).unwrap();
        assert_eq!(k[0], Pair::new(!0, 0x2001_0db8));
        assert_eq!(k[1], Pair::new(0xff00_0000, 0));
        assert_eq!(k[2], Pair::wildcard());

        assert!(prefix_key(&"::/0".parse().unwrap(), 1).is_none());
        assert_eq!(words_for_bits(33), 2);
        assert_eq!(mask_for_len(0), 0);
    }
}
