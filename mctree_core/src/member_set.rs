//! Leaf member sets.
//!
//! A set starts as a plain vector of key handles.  The first point edit
//! (`insert` / `remove`) switches it to the indexed form: the same vector plus
//! a hash of slot positions, so membership and removal are O(1).  Removal
//! leaves a [`KeyHandle::HOLE`] in the vector; holes are compacted out when
//! the index is rebuilt.

use crate::random::RandomSource;
use crate::types::KeyHandle;
use hashbrown::HashTable;

#[inline]
fn slot_hash(h: KeyHandle) -> u64 {
    (h.0 as u64 ^ 0x5bd1_e995).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(29)
}

#[derive(Debug, Clone)]
pub enum MemberSet {
    Dense(Vec<KeyHandle>),
    Indexed {
        slots: Vec<KeyHandle>,
        index: HashTable<u32>,
        holes: usize,
        stale: bool,
    },
}

impl Default for MemberSet {
    fn default() -> Self {
        MemberSet::Dense(Vec::new())
    }
}

impl MemberSet {
    pub fn from_vec(v: Vec<KeyHandle>) -> Self {
        MemberSet::Dense(v)
    }

    /// Raw slots, holes included.
    #[inline]
    pub fn slots(&self) -> &[KeyHandle] {
        match self {
            MemberSet::Dense(v) => v,
            MemberSet::Indexed { slots, .. } => slots,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            MemberSet::Dense(v) => v.len(),
            MemberSet::Indexed { slots, holes, .. } => slots.len() - holes,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live members in slot order.
    pub fn iter(&self) -> impl Iterator<Item = KeyHandle> + '_ {
        self.slots().iter().copied().filter(|&h| h != KeyHandle::HOLE)
    }

    /// True when lookups go through a trusted index.
    #[inline]
    pub fn is_indexed(&self) -> bool {
        matches!(self, MemberSet::Indexed { stale: false, .. })
    }

    /// Marks the index untrusted without touching the slots.
    pub fn invalidate(&mut self) {
        if let MemberSet::Indexed { index, stale, .. } = self {
            index.clear();
            *stale = true;
        }
    }

    /// Copy for a new owner.  The slots are copied; the index is rebuilt
    /// lazily by the copy's first `ensure_indexed`.
    pub fn detached_copy(&self) -> MemberSet {
        match self {
            MemberSet::Dense(v) => MemberSet::Dense(v.clone()),
            MemberSet::Indexed { slots, holes, .. } => {
                let mut copy = MemberSet::Indexed {
                    slots: slots.clone(),
                    index: HashTable::new(),
                    holes: *holes,
                    stale: false,
                };
                copy.invalidate();
                copy
            }
        }
    }

    /// Switch to (or refresh) the indexed form: compact holes, rebuild the
    /// index from the compacted slots.
    pub fn ensure_indexed(&mut self) {
        if self.is_indexed() {
            return;
        }
        let mut slots = match std::mem::take(self) {
            MemberSet::Dense(v) => v,
            MemberSet::Indexed { slots, .. } => slots,
        };
        slots.retain(|&h| h != KeyHandle::HOLE);

        let mut index = HashTable::with_capacity(slots.len());
        for (pos, &h) in slots.iter().enumerate() {
            index.insert_unique(slot_hash(h), pos as u32, |&p| slot_hash(slots[p as usize]));
        }
        *self = MemberSet::Indexed { slots, index, holes: 0, stale: false };
    }

    pub fn contains(&self, h: KeyHandle) -> bool {
        match self {
            MemberSet::Indexed { slots, index, stale: false, .. } => index
                .find(slot_hash(h), |&p| slots[p as usize] == h)
                .is_some(),
            _ => h != KeyHandle::HOLE && self.slots().contains(&h),
        }
    }

    /// Adds `h`; false if already present.
    pub fn insert(&mut self, h: KeyHandle) -> bool {
        self.ensure_indexed();
        let MemberSet::Indexed { slots, index, .. } = self else {
            unreachable!("ensure_indexed leaves the set indexed")
        };
        if index.find(slot_hash(h), |&p| slots[p as usize] == h).is_some() {
            return false;
        }
        let pos = slots.len() as u32;
        slots.push(h);
        index.insert_unique(slot_hash(h), pos, |&p| slot_hash(slots[p as usize]));
        true
    }

    /// Removes `h`; false if absent.
    pub fn remove(&mut self, h: KeyHandle) -> bool {
        self.ensure_indexed();
        let MemberSet::Indexed { slots, index, holes, .. } = self else {
            unreachable!("ensure_indexed leaves the set indexed")
        };
        let pos = match index.find_entry(slot_hash(h), |&p| slots[p as usize] == h) {
            Ok(entry) => entry.remove().0,
            Err(_) => return false,
        };
        slots[pos as usize] = KeyHandle::HOLE;
        *holes += 1;

        if *holes > 8 && *holes * 2 > slots.len() {
            self.invalidate();
            self.ensure_indexed();
        }
        true
    }

    /// Uniformly random live member.
    pub fn random_member(&self, random: &mut RandomSource) -> Option<KeyHandle> {
        if self.is_empty() {
            return None;
        }
        let slots = self.slots();
        loop {
            let h = slots[random.below(slots.len())];
            if h != KeyHandle::HOLE {
                return Some(h);
            }
        }
    }

    /// Empties the set and hands back its slot buffer for reuse.
    pub fn into_buffer(self) -> Vec<KeyHandle> {
        let mut v = match self {
            MemberSet::Dense(v) => v,
            MemberSet::Indexed { slots, .. } => slots,
        };
        v.clear();
        v
    }
}
