//! Content-addressed key store.
//!
//! Every distinct key gets one stable [`KeyHandle`]; the handle's pairs live in
//! a flat pool (`n_words` pairs per slot) and freed slots are reused.  The hash
//! table stores only handles and hashes/compares through the pool, so a
//! table resize rehashes live handles without touching key storage.

use crate::errors::Error;
use crate::types::{KeyHandle, Pair};
use hashbrown::HashTable;
use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;

pub struct KeyStore {
    n_words: usize,
    pairs: Vec<Pair>,
    // Add count per slot; 0 marks a free slot.
    refs: Vec<u32>,
    free: Vec<u32>,
    table: HashTable<KeyHandle>,
    hasher: RandomState,
}

impl KeyStore {
    pub fn new(n_words: usize) -> Self {
        Self {
            n_words,
            pairs: Vec::new(),
            refs: Vec::new(),
            free: Vec::new(),
            table: HashTable::new(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    pub fn words_per_key(&self) -> usize {
        self.n_words
    }

    /// Number of distinct live keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    #[inline]
    pub fn resolve(&self, h: KeyHandle) -> &[Pair] {
        let i = h.index() * self.n_words;
        &self.pairs[i..i + self.n_words]
    }

    #[inline]
    pub fn is_live(&self, h: KeyHandle) -> bool {
        self.refs.get(h.index()).is_some_and(|&r| r > 0)
    }

    /// How many times the key behind `h` has been added.
    #[inline]
    pub fn refs(&self, h: KeyHandle) -> u32 {
        self.refs.get(h.index()).copied().unwrap_or(0)
    }

    pub fn get(&self, key: &[Pair]) -> Option<KeyHandle> {
        let hash = self.hasher.hash_one(key);
        let (pairs, n) = (&self.pairs, self.n_words);
        self.table
            .find(hash, |&h| &pairs[h.index() * n..(h.index() + 1) * n] == key)
            .copied()
    }

    /// Returns the key's handle and whether it already existed.  Existing keys
    /// gain a reference; new keys take a recycled slot when one is free.
    pub fn intern(&mut self, key: &[Pair]) -> (KeyHandle, bool) {
        debug_assert_eq!(key.len(), self.n_words);
        if let Some(h) = self.get(key) {
            self.refs[h.index()] += 1;
            return (h, true);
        }

        let h = match self.free.pop() {
            Some(i) => {
                let at = i as usize * self.n_words;
                self.pairs[at..at + self.n_words].copy_from_slice(key);
                KeyHandle(i)
            }
            None => {
                let i = self.refs.len() as u32;
                self.pairs.extend_from_slice(key);
                self.refs.push(0);
                KeyHandle(i)
            }
        };
        self.refs[h.index()] = 1;

        let hash = self.hasher.hash_one(key);
        let (pairs, n, hasher) = (&self.pairs, self.n_words, &self.hasher);
        self.table.insert_unique(hash, h, |&x| {
            hasher.hash_one(&pairs[x.index() * n..(x.index() + 1) * n])
        });
        (h, false)
    }

    /// Drops one reference.  Returns the handle and whether that was the last
    /// one, in which case the slot is recycled.
    pub fn remove(&mut self, key: &[Pair]) -> Result<(KeyHandle, bool), Error> {
        let h = self.get(key).ok_or(Error::KeyNotFound)?;
        let r = &mut self.refs[h.index()];
        *r -= 1;
        if *r > 0 {
            return Ok((h, false));
        }

        let hash = self.hasher.hash_one(key);
        match self.table.find_entry(hash, |&x| x == h) {
            Ok(entry) => {
                entry.remove();
            }
            Err(_) => panic!("key handle {} missing from hash", h.0),
        }
        self.free.push(h.0);

        // Shrink once the table is mostly empty.
        if self.table.capacity() > 64 && self.table.len() * 4 < self.table.capacity() {
            let (pairs, n, hasher) = (&self.pairs, self.n_words, &self.hasher);
            self.table.shrink_to(self.table.len() * 2, |&x| {
                hasher.hash_one(&pairs[x.index() * n..(x.index() + 1) * n])
            });
        }
        Ok((h, true))
    }

    /// Live handles in slot order.
    pub fn handles(&self) -> impl Iterator<Item = KeyHandle> + '_ {
        self.refs
            .iter()
            .enumerate()
            .filter(|&(_, &r)| r > 0)
            .map(|(i, _)| KeyHandle(i as u32))
    }

    /// Cross-check table, slots and free list.
    pub fn check(&self) -> Result<(), String> {
        let live = self.refs.iter().filter(|&&r| r > 0).count();
        if live != self.table.len() {
            return Err(format!("{} live slots but {} hashed", live, self.table.len()));
        }
        if live + self.free.len() != self.refs.len() {
            return Err(format!(
                "{} live + {} free != {} slots",
                live,
                self.free.len(),
                self.refs.len()
            ));
        }
        for &h in self.table.iter() {
            if !self.is_live(h) {
                return Err(format!("hashed handle {} is free", h.0));
            }
            if self.get(self.resolve(h)) != Some(h) {
                return Err(format!("handle {} not found by its own key", h.0));
            }
        }
        Ok(())
    }
}
