//! Prefix tree mapping tokens to sets of values.
//!
//! The alphabet has 36 symbols: digits `0-9` then letters `A-Z`, with letters
//! folded to upper case. A token containing any other character cannot be
//! stored. Nodes left with no values and no children are pruned on delete.
//!
//! Tree depth equals token length, and a single token can be very long (a
//! base64 blob stored as text), so every walk over the tree is iterative.
//! This includes dropping it.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{DocResult, DocStoreError};

/// Number of symbols per node
pub const ALPHABET_SIZE: usize = 36;

struct Node<V> {
    values: BTreeSet<V>,
    links: [Option<Box<Node<V>>>; ALPHABET_SIZE],
}

impl<V> Node<V> {
    fn new() -> Self {
        Self { values: BTreeSet::new(), links: std::array::from_fn(|_| None) }
    }

    fn is_vacant(&self) -> bool {
        self.values.is_empty() && self.links.iter().all(Option::is_none)
    }

    fn link_count(&self) -> usize {
        self.links.iter().filter(|link| link.is_some()).count()
    }
}

impl<V: Ord + Clone> Node<V> {
    fn collect_into(&self, out: &mut BTreeSet<V>) {
        let mut pending = vec![self];
        while let Some(node) = pending.pop() {
            out.extend(node.values.iter().cloned());
            pending.extend(node.links.iter().flatten().map(|child| &**child));
        }
    }
}

impl<V> Drop for Node<V> {
    fn drop(&mut self) {
        let mut pending: Vec<Box<Node<V>>> = self.links.iter_mut().filter_map(Option::take).collect();
        while let Some(mut node) = pending.pop() {
            pending.extend(node.links.iter_mut().filter_map(Option::take));
        }
    }
}

/// Slot of `c` in a node, or `None` if `c` is outside the alphabet.
fn symbol_index(c: char) -> Option<usize> {
    match c {
        '0'..='9' => Some(c as usize - '0' as usize),
        'a'..='z' => Some(c as usize - 'a' as usize + 10),
        'A'..='Z' => Some(c as usize - 'A' as usize + 10),
        _ => None,
    }
}

fn symbol_char(slot: usize) -> char {
    const SYMBOLS: &[u8; ALPHABET_SIZE] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    SYMBOLS[slot] as char
}

/// Map a token to its path of slots. `None` if empty or outside the alphabet.
fn symbol_path(token: &str) -> Option<Vec<usize>> {
    if token.is_empty() {
        return None;
    }
    token.chars().map(symbol_index).collect()
}

/// Token -> value-set prefix tree.
pub struct SearchIndex<V> {
    root: Node<V>,
}

impl<V: Ord + Clone> SearchIndex<V> {
    pub fn new() -> Self {
        Self { root: Node::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_vacant()
    }

    /// Associate `value` with `token`. Returns false if it already was.
    pub fn put(&mut self, token: &str, value: V) -> DocResult<bool> {
        let path = symbol_path(token).ok_or_else(|| {
            DocStoreError::invalid(format!("token {:?} is empty or outside [0-9A-Z]", token))
        })?;
        let mut node = &mut self.root;
        for slot in path {
            node = node.links[slot].get_or_insert_with(|| Box::new(Node::new())).as_mut();
        }
        Ok(node.values.insert(value))
    }

    /// Values stored exactly at `token`.
    pub fn get_all(&self, token: &str) -> Vec<V> {
        self.find(token).map(|node| node.values.iter().cloned().collect()).unwrap_or_default()
    }

    /// Values stored at `token`, ordered by `compare` (stable for ties).
    pub fn get_all_sorted<F>(&self, token: &str, compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut values = self.get_all(token);
        values.sort_by(compare);
        values
    }

    /// Distinct values stored at `prefix` or any token below it.
    pub fn get_all_with_prefix(&self, prefix: &str) -> Vec<V> {
        let mut out = BTreeSet::new();
        if let Some(node) = self.find(prefix) {
            node.collect_into(&mut out);
        }
        out.into_iter().collect()
    }

    /// [`SearchIndex::get_all_with_prefix`], ordered by `compare` (stable for ties).
    pub fn get_all_with_prefix_sorted<F>(&self, prefix: &str, compare: F) -> Vec<V>
    where
        F: FnMut(&V, &V) -> Ordering,
    {
        let mut values = self.get_all_with_prefix(prefix);
        values.sort_by(compare);
        values
    }

    /// True if `value` is stored exactly at `token`.
    pub fn contains(&self, token: &str, value: &V) -> bool {
        self.find(token).map_or(false, |node| node.values.contains(value))
    }

    /// Remove `value` from `token`. Returns false if it was not there.
    pub fn delete(&mut self, token: &str, value: &V) -> bool {
        let Some(path) = symbol_path(token) else {
            return false;
        };
        let removed = self.node_mut(&path).map_or(false, |node| node.values.remove(value));
        if removed {
            self.prune(&path);
        }
        removed
    }

    /// Remove and return every value stored exactly at `token`.
    pub fn delete_all(&mut self, token: &str) -> BTreeSet<V> {
        let Some(path) = symbol_path(token) else {
            return BTreeSet::new();
        };
        let removed = self.node_mut(&path).map(|node| std::mem::take(&mut node.values)).unwrap_or_default();
        if !removed.is_empty() {
            self.prune(&path);
        }
        removed
    }

    /// Detach the whole subtree under `prefix` and return every value in it.
    pub fn delete_all_with_prefix(&mut self, prefix: &str) -> BTreeSet<V> {
        let mut out = BTreeSet::new();
        let Some(path) = symbol_path(prefix) else {
            return out;
        };
        let Some((&last, parents)) = path.split_last() else {
            return out;
        };
        let detached = self.node_mut(parents).and_then(|parent| parent.links[last].take());
        if let Some(subtree) = detached {
            subtree.collect_into(&mut out);
            self.prune(parents);
        }
        out
    }

    /// Snapshot of every stored token and its values, in symbol order.
    pub fn entries(&self) -> Vec<(String, Vec<V>)> {
        let mut out = Vec::new();
        let mut prefix = String::new();
        // (node, depth, symbol leading to it)
        let mut pending: Vec<(&Node<V>, usize, Option<char>)> = vec![(&self.root, 0, None)];
        while let Some((node, depth, symbol)) = pending.pop() {
            // Symbols are ASCII, so depth is also a byte length.
            prefix.truncate(depth.saturating_sub(1));
            if let Some(symbol) = symbol {
                prefix.push(symbol);
            }
            if !node.values.is_empty() {
                out.push((prefix.clone(), node.values.iter().cloned().collect()));
            }
            for (slot, child) in node.links.iter().enumerate().rev() {
                if let Some(child) = child {
                    pending.push((&**child, depth + 1, Some(symbol_char(slot))));
                }
            }
        }
        out
    }

    fn find(&self, token: &str) -> Option<&Node<V>> {
        let path = symbol_path(token)?;
        let mut node = &self.root;
        for slot in path {
            node = node.links[slot].as_deref()?;
        }
        Some(node)
    }

    fn node_mut(&mut self, path: &[usize]) -> Option<&mut Node<V>> {
        let mut node = &mut self.root;
        for &slot in path {
            node = node.links[slot].as_deref_mut()?;
        }
        Some(node)
    }

    /// Cut the longest run of nodes at the end of `path` that hold nothing but
    /// the link to the next node on the path, ending in a vacant node.
    fn prune(&mut self, path: &[usize]) {
        let mut cut = None;
        let mut node = &self.root;
        for (depth, &slot) in path.iter().enumerate() {
            let Some(child) = node.links[slot].as_deref() else {
                return;
            };
            let spare_links = if depth + 1 == path.len() { 0 } else { 1 };
            if child.values.is_empty() && child.link_count() == spare_links {
                cut.get_or_insert(depth);
            } else {
                cut = None;
            }
            node = child;
        }
        if let Some(depth) = cut {
            if let Some(parent) = self.node_mut(&path[..depth]) {
                parent.links[path[depth]] = None;
            }
        }
    }
}

impl<V: Ord + Clone> Default for SearchIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Ord + Clone + fmt::Debug> fmt::Debug for SearchIndex<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries()).finish()
    }
}
