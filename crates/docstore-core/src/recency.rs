//! Min-heap over resident document keys ordered by last-use time.
//!
//! The heap stores keys, not timestamps. Every operation that compares
//! entries takes a lookup closure returning the current stamp of a key, so
//! the stamps can live on the documents themselves. After a stamp changes
//! the caller must [`RecencyTracker::reheapify`] that key. A slot map from
//! key to heap position makes that O(log n) instead of a linear scan.

use std::hash::Hash;

use hashbrown::HashMap;

use crate::error::{DocResult, DocStoreError};

/// Binary min-heap of keys with reheapify-by-identity.
#[derive(Debug, Clone)]
pub struct RecencyTracker<K: Eq + Hash + Clone> {
    heap: Vec<K>,
    slots: HashMap<K, usize>,
}

impl<K: Eq + Hash + Clone> RecencyTracker<K> {
    pub fn new() -> Self {
        Self { heap: Vec::new(), slots: HashMap::new() }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Least recently used key, without removing it.
    pub fn peek(&self) -> Option<&K> {
        self.heap.first()
    }

    /// Tracked keys in heap order (not sorted).
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.heap.iter()
    }

    /// Track `key`. Returns false if it was already tracked.
    pub fn insert<F>(&mut self, key: K, stamp_of: F) -> bool
    where
        F: Fn(&K) -> Option<u64>,
    {
        if self.slots.contains_key(&key) {
            return false;
        }
        let slot = self.heap.len();
        self.slots.insert(key.clone(), slot);
        self.heap.push(key);
        self.sift_up(slot, &stamp_of);
        true
    }

    /// Pop the least recently used key.
    pub fn remove<F>(&mut self, stamp_of: F) -> DocResult<K>
    where
        F: Fn(&K) -> Option<u64>,
    {
        if self.heap.is_empty() {
            return Err(DocStoreError::EmptyCollection);
        }
        self.take_slot(0, &stamp_of).ok_or(DocStoreError::EmptyCollection)
    }

    /// Stop tracking `key` wherever it sits. Returns false if it was not tracked.
    pub fn remove_key<F>(&mut self, key: &K, stamp_of: F) -> bool
    where
        F: Fn(&K) -> Option<u64>,
    {
        match self.slots.get(key).copied() {
            Some(slot) => self.take_slot(slot, &stamp_of).is_some(),
            None => false,
        }
    }

    /// Restore heap order after the stamp of `key` changed in either direction.
    pub fn reheapify<F>(&mut self, key: &K, stamp_of: F) -> DocResult<()>
    where
        F: Fn(&K) -> Option<u64>,
    {
        let slot = self
            .slots
            .get(key)
            .copied()
            .ok_or_else(|| DocStoreError::invalid("reheapify of a key that is not tracked"))?;
        let slot = self.sift_up(slot, &stamp_of);
        self.sift_down(slot, &stamp_of);
        Ok(())
    }

    fn take_slot<F>(&mut self, slot: usize, stamp_of: &F) -> Option<K>
    where
        F: Fn(&K) -> Option<u64>,
    {
        if slot >= self.heap.len() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.swap(slot, last);
        let key = self.heap.pop()?;
        self.slots.remove(&key);
        if slot < self.heap.len() {
            let slot = self.sift_up(slot, stamp_of);
            self.sift_down(slot, stamp_of);
        }
        Some(key)
    }

    fn stamp<F>(&self, slot: usize, stamp_of: &F) -> u64
    where
        F: Fn(&K) -> Option<u64>,
    {
        stamp_of(&self.heap[slot]).unwrap_or(0)
    }

    fn swap(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.heap.swap(a, b);
        self.slots.insert(self.heap[a].clone(), a);
        self.slots.insert(self.heap[b].clone(), b);
    }

    fn sift_up<F>(&mut self, mut slot: usize, stamp_of: &F) -> usize
    where
        F: Fn(&K) -> Option<u64>,
    {
        while slot > 0 {
            let parent = (slot - 1) / 2;
            // Equal stamps stay put.
            if self.stamp(parent, stamp_of) <= self.stamp(slot, stamp_of) {
                break;
            }
            self.swap(parent, slot);
            slot = parent;
        }
        slot
    }

    fn sift_down<F>(&mut self, mut slot: usize, stamp_of: &F) -> usize
    where
        F: Fn(&K) -> Option<u64>,
    {
        let len = self.heap.len();
        loop {
            let left = 2 * slot + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < len && self.stamp(right, stamp_of) < self.stamp(left, stamp_of) {
                child = right;
            }
            if self.stamp(slot, stamp_of) <= self.stamp(child, stamp_of) {
                break;
            }
            self.swap(slot, child);
            slot = child;
        }
        slot
    }
}

impl<K: Eq + Hash + Clone> Default for RecencyTracker<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn stamps(pairs: &[(&'static str, u64)]) -> RefCell<HashMap<&'static str, u64>> {
        RefCell::new(pairs.iter().copied().collect())
    }

    #[test]
    fn test_pops_in_stamp_order() {
        let times = stamps(&[("a", 50), ("b", 10), ("c", 40), ("d", 20), ("e", 30)]);
        let lookup = |k: &&'static str| times.borrow().get(k).copied();
        let mut tracker = RecencyTracker::new();
        for key in ["a", "b", "c", "d", "e"] {
            assert!(tracker.insert(key, lookup));
        }
        assert!(!tracker.insert("a", lookup));
        assert_eq!(tracker.peek(), Some(&"b"));

        let order: Vec<_> = (0..5).map(|_| tracker.remove(lookup).unwrap()).collect();
        assert_eq!(order, vec!["b", "d", "e", "c", "a"]);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_empty_remove_fails() {
        let mut tracker: RecencyTracker<u32> = RecencyTracker::new();
        assert!(matches!(tracker.remove(|_| None), Err(DocStoreError::EmptyCollection)));
    }

    #[test]
    fn test_reheapify_after_touch_moves_key_down() {
        let times = stamps(&[("a", 1), ("b", 2), ("c", 3)]);
        let mut tracker = RecencyTracker::new();
        for key in ["a", "b", "c"] {
            tracker.insert(key, |k| times.borrow().get(k).copied());
        }

        // "a" was just used: it becomes the most recent.
        times.borrow_mut().insert("a", 10);
        tracker.reheapify(&"a", |k| times.borrow().get(k).copied()).unwrap();
        assert_eq!(tracker.remove(|k| times.borrow().get(k).copied()).unwrap(), "b");
        assert_eq!(tracker.remove(|k| times.borrow().get(k).copied()).unwrap(), "c");
        assert_eq!(tracker.remove(|k| times.borrow().get(k).copied()).unwrap(), "a");
    }

    #[test]
    fn test_reheapify_moves_key_up() {
        let times = stamps(&[("a", 10), ("b", 20), ("c", 30), ("d", 40)]);
        let mut tracker = RecencyTracker::new();
        for key in ["a", "b", "c", "d"] {
            tracker.insert(key, |k| times.borrow().get(k).copied());
        }
        times.borrow_mut().insert("d", 5);
        tracker.reheapify(&"d", |k| times.borrow().get(k).copied()).unwrap();
        assert_eq!(tracker.peek(), Some(&"d"));

        assert!(tracker.reheapify(&"zz", |k| times.borrow().get(k).copied()).is_err());
    }

    #[test]
    fn test_remove_arbitrary_key_keeps_order() {
        let times = stamps(&[("a", 1), ("b", 2), ("c", 3), ("d", 4), ("e", 5), ("f", 6)]);
        let lookup = |k: &&'static str| times.borrow().get(k).copied();
        let mut tracker = RecencyTracker::new();
        for key in ["f", "e", "d", "c", "b", "a"] {
            tracker.insert(key, lookup);
        }
        assert!(tracker.remove_key(&"c", lookup));
        assert!(!tracker.remove_key(&"c", lookup));
        assert!(!tracker.contains(&"c"));
        assert_eq!(tracker.len(), 5);

        let order: Vec<_> = (0..5).map(|_| tracker.remove(lookup).unwrap()).collect();
        assert_eq!(order, vec!["a", "b", "d", "e", "f"]);
    }

    #[test]
    fn test_many_keys_grow_past_initial_capacity() {
        let mut tracker = RecencyTracker::new();
        // Stamp equals the key, inserted in reverse.
        for key in (0u64..500).rev() {
            tracker.insert(key, |k| Some(*k));
        }
        assert_eq!(tracker.len(), 500);
        for expected in 0u64..500 {
            assert_eq!(tracker.remove(|k| Some(*k)).unwrap(), expected);
        }
    }

    #[test]
    fn test_missing_stamp_counts_as_oldest() {
        let mut tracker = RecencyTracker::new();
        tracker.insert(7u32, |k| if *k == 7 { Some(100) } else { None });
        tracker.insert(8u32, |k| if *k == 7 { Some(100) } else { None });
        assert_eq!(tracker.peek(), Some(&8));
    }
}
