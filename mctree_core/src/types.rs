//! Data structures shared across the tree: pairs, keys and arena handles

use crate::helpers::{pack, unpack};
use std::fmt;

/// One key word.
pub type Word = u32;

/// Masked word: matches every `w` with `w & mask == value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
#[repr(C)]
pub struct Pair {
    pub mask: Word,
    pub value: Word,
}

impl Pair {
    #[inline]
    pub const fn new(mask: Word, value: Word) -> Self {
        Self { mask, value }
    }

    /// Exact match on every bit.
    #[inline]
    pub const fn exact(value: Word) -> Self {
        Self { mask: !0, value }
    }

    /// Matches anything.
    #[inline]
    pub const fn wildcard() -> Self {
        Self { mask: 0, value: 0 }
    }

    /// Value bits are only allowed where the mask is set.
    #[inline]
    pub const fn is_canonical(&self) -> bool {
        self.value & !self.mask == 0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}/{:08x}", self.value, self.mask)
    }
}

/// Fixed-length sequence of pairs.
pub type Key = Box<[Pair]>;

/// Formats a key as `value/mask` words separated by `.`
pub struct KeyDisplay<'a>(pub &'a [Pair]);

impl fmt::Display for KeyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, p) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Stable slot of a deduplicated key inside the key store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyHandle(pub u32);

impl KeyHandle {
    /// Marks a removed slot inside an indexed member set.
    pub const HOLE: KeyHandle = KeyHandle(u32::MAX);

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Generation-checked handle into the node pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self(pack(index, generation))
    }
    #[inline]
    pub fn index(self) -> u32 {
        unpack(self.0).0
    }
    #[inline]
    pub fn generation(self) -> u32 {
        unpack(self.0).1
    }
}

/// Generation-checked handle into the shared member-set pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetId(u64);

impl SetId {
    #[inline]
    pub fn new(index: u32, generation: u32) -> Self {
        Self(pack(index, generation))
    }
    #[inline]
    pub fn index(self) -> u32 {
        unpack(self.0).0
    }
    #[inline]
    pub fn generation(self) -> u32 {
        unpack(self.0).1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_round_trip_index_and_generation() {
        let n = NodeId::new(7, 3);
        assert_eq!((n.index(), n.generation()), (7, 3));
        let s = SetId::new(u32::MAX - 1, u32::MAX);
        assert_eq!((s.index(), s.generation()), (u32::MAX - 1, u32::MAX));
    }

    #[test]
    fn canonical_pairs() {
        assert!(Pair::new(0xff00, 0x1200).is_canonical());
        assert!(!Pair::new(0xff00, 0x1201).is_canonical());
        assert!(Pair::wildcard().is_canonical());
        assert_eq!(format!("{}", Pair::exact(0x0a000001)), "0a000001/ffffffff");
    }
}
