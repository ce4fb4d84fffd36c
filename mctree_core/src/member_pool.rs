//! Reference-counted pool of leaf member sets.
//!
//! Cloning a tree shares every leaf's set (`add_reference`); a set may only be
//! edited in place while its count is 1, otherwise it is detached first
//! (`make_unique`).  Buffers of freed sets are kept for reuse.

use crate::member_set::MemberSet;
use crate::types::{KeyHandle, SetId};

const MAX_SPARE_BUFFERS: usize = 256;

#[derive(Debug, Default)]
struct PoolEntry {
    set: MemberSet,
    refs: u32,
    generation: u32,
}

#[derive(Debug, Default)]
pub struct MemberPool {
    entries: Vec<PoolEntry>,
    free: Vec<u32>,
    spare: Vec<Vec<KeyHandle>>,
    live: usize,
}

impl MemberPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated (referenced) sets.
    #[inline]
    pub fn live(&self) -> usize {
        self.live
    }

    /// Empty buffer, recycled from a freed set when possible.
    pub fn take_buffer(&mut self) -> Vec<KeyHandle> {
        self.spare.pop().unwrap_or_default()
    }

    pub fn return_buffer(&mut self, mut buf: Vec<KeyHandle>) {
        if self.spare.len() < MAX_SPARE_BUFFERS && buf.capacity() > 0 {
            buf.clear();
            self.spare.push(buf);
        }
    }

    /// New set with a reference count of 1.
    pub fn allocate(&mut self, set: MemberSet) -> SetId {
        self.live += 1;
        match self.free.pop() {
            Some(i) => {
                let e = &mut self.entries[i as usize];
                e.set = set;
                e.refs = 1;
                SetId::new(i, e.generation)
            }
            None => {
                let i = self.entries.len() as u32;
                self.entries.push(PoolEntry { set, refs: 1, generation: 0 });
                SetId::new(i, 0)
            }
        }
    }

    #[inline]
    fn entry(&self, id: SetId) -> &PoolEntry {
        match self.entries.get(id.index() as usize) {
            Some(e) if e.refs > 0 && e.generation == id.generation() => e,
            _ => panic!("stale member set handle {}", id.index()),
        }
    }

    #[inline]
    fn entry_mut(&mut self, id: SetId) -> &mut PoolEntry {
        match self.entries.get_mut(id.index() as usize) {
            Some(e) if e.refs > 0 && e.generation == id.generation() => e,
            _ => panic!("stale member set handle {}", id.index()),
        }
    }

    pub fn add_reference(&mut self, id: SetId) {
        self.entry_mut(id).refs += 1;
    }

    /// Drops one reference; returns true when the set was freed.
    pub fn release(&mut self, id: SetId) -> bool {
        let e = self.entry_mut(id);
        e.refs -= 1;
        if e.refs > 0 {
            return false;
        }
        e.generation = e.generation.wrapping_add(1);
        let buf = std::mem::take(&mut e.set).into_buffer();
        self.free.push(id.index());
        self.live -= 1;
        self.return_buffer(buf);
        true
    }

    #[inline]
    pub fn get(&self, id: SetId) -> &MemberSet {
        &self.entry(id).set
    }

    /// In-place access; the set must not be shared.
    pub fn get_mut(&mut self, id: SetId) -> &mut MemberSet {
        let e = self.entry_mut(id);
        if e.refs != 1 {
            panic!("mutating member set {} shared by {} leaves", id.index(), e.refs);
        }
        &mut e.set
    }

    /// Returns an unshared handle with the same contents, copying and
    /// releasing `id` if it is shared.
    pub fn make_unique(&mut self, id: SetId) -> SetId {
        if self.entry(id).refs == 1 {
            return id;
        }
        let copy = self.get(id).detached_copy();
        self.release(id);
        self.allocate(copy)
    }

    #[inline]
    pub fn refs(&self, id: SetId) -> u32 {
        self.entry(id).refs
    }

    /// True when `id` names a live set of the current generation.
    pub fn is_live(&self, id: SetId) -> bool {
        self.entries
            .get(id.index() as usize)
            .is_some_and(|e| e.refs > 0 && e.generation == id.generation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(v: &[u32]) -> MemberSet {
        MemberSet::from_vec(v.iter().map(|&i| KeyHandle(i)).collect())
    }

    #[test]
    fn refcounts_and_free() {
        let mut p = MemberPool::new();
        let a = p.allocate(set(&[1, 2]));
        p.add_reference(a);
        assert_eq!(p.refs(a), 2);
        assert!(!p.release(a));
        assert!(p.release(a));
        assert!(!p.is_live(a));
        assert_eq!(p.live(), 0);

        let b = p.allocate(set(&[3]));
        assert_eq!(b.index(), a.index(), "slot reused");
        assert_ne!(b.generation(), a.generation());
        assert_eq!(p.get(b).len(), 1);
    }

    #[test]
    #[should_panic(expected = "shared")]
    fn shared_set_is_not_mutable() {
        let mut p = MemberPool::new();
        let a = p.allocate(set(&[1]));
        p.add_reference(a);
        p.get_mut(a).insert(KeyHandle(2));
    }

    #[test]
    #[should_panic(expected = "stale")]
    fn stale_handle_panics() {
        let mut p = MemberPool::new();
        let a = p.allocate(set(&[1]));
        p.release(a);
        p.get(a);
    }

    #[test]
    fn make_unique_copies_shared_sets() {
        let mut p = MemberPool::new();
        let a = p.allocate(set(&[1, 2]));
        assert_eq!(p.make_unique(a), a);

        p.add_reference(a);
        let b = p.make_unique(a);
        assert_ne!(a, b);
        assert_eq!(p.refs(a), 1);
        p.get_mut(b).insert(KeyHandle(5));
        assert_eq!(p.get(a).len(), 2);
        assert_eq!(p.get(b).len(), 3);
        assert_eq!(p.live(), 2);
    }

    #[test]
    fn freed_buffers_are_recycled() {
        let mut p = MemberPool::new();
        let a = p.allocate(set(&[1, 2, 3, 4]));
        p.release(a);
        let buf = p.take_buffer();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 4);
    }
}
