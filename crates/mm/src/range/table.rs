//! Range table organized as a B-tree over simulated physical memory.
//!
//! Each node occupies one frame; key `i` of a node lives at
//! `frame * 4096 + i * KEY_BYTES`. A lookup reports the address of every
//! key it compares against so the range unit can charge one memory access
//! per key.

use super::{RangeEntry, RangeLookup};
use crate::addr::{PAGE_SHIFT, PAGE_SIZE, Pfn};
use crate::error::MmError;
use crate::traits::RangeTable;

/// Bytes per stored key: start, bound and offset.
pub const KEY_BYTES: u64 = 24;

/// Default minimum degree.
pub const DEFAULT_DEGREE: usize = 3;

struct Node {
    pfn: Pfn,
    keys: Vec<RangeEntry>,
    /// Empty for leaves.
    children: Vec<usize>,
}

impl Node {
    fn key_paddr(&self, idx: usize) -> u64 {
        self.pfn * PAGE_SIZE + idx as u64 * KEY_BYTES
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

pub struct BTreeRangeTable {
    nodes: Vec<Node>,
    root: Option<usize>,
    degree: usize,
    len: usize,
}

impl BTreeRangeTable {
    /// Nodes hold between `degree - 1` and `2 * degree - 1` keys.
    pub fn new(degree: usize) -> Self {
        Self { nodes: Vec::new(), root: None, degree: degree.max(2), len: 0 }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Frames holding table nodes.
    pub fn node_frames(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.root;
        while let Some(id) = node {
            depth += 1;
            node = self.nodes[id].children.first().copied();
        }
        depth
    }

    fn max_keys(&self) -> usize {
        2 * self.degree - 1
    }

    fn new_node(&mut self, frames: &mut dyn FnMut() -> Result<Pfn, MmError>) -> Result<usize, MmError> {
        let pfn = frames()?;
        self.nodes.push(Node { pfn, keys: Vec::with_capacity(self.max_keys()), children: Vec::new() });
        Ok(self.nodes.len() - 1)
    }

    /// Insert a range. Ranges must not overlap; `frames` backs new nodes.
    pub fn insert(
        &mut self,
        entry: RangeEntry,
        frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError> {
        let root = match self.root {
            Some(root) => root,
            None => {
                let root = self.new_node(frames)?;
                self.root = Some(root);
                root
            }
        };

        let start = if self.nodes[root].keys.len() == self.max_keys() {
            let new_root = self.new_node(frames)?;
            self.nodes[new_root].children.push(root);
            self.split_child(new_root, 0, frames)?;
            self.root = Some(new_root);
            new_root
        } else {
            root
        };

        self.insert_non_full(start, entry, frames)?;
        self.len += 1;
        Ok(())
    }

    fn insert_non_full(
        &mut self,
        mut node: usize,
        entry: RangeEntry,
        frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError> {
        loop {
            let pos = self.nodes[node].keys.partition_point(|k| k.vpn_start < entry.vpn_start);
            if self.nodes[node].is_leaf() {
                self.nodes[node].keys.insert(pos, entry);
                return Ok(());
            }

            let mut child_idx = pos;
            let child = self.nodes[node].children[pos];
            if self.nodes[child].keys.len() == self.max_keys() {
                self.split_child(node, pos, frames)?;
                if self.nodes[node].keys[pos].vpn_start < entry.vpn_start {
                    child_idx += 1;
                }
            }
            node = self.nodes[node].children[child_idx];
        }
    }

    /// Split the full child `idx` of `parent`, moving its median key up.
    fn split_child(
        &mut self,
        parent: usize,
        idx: usize,
        frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError> {
        let t = self.degree;
        let full = self.nodes[parent].children[idx];
        let sibling = self.new_node(frames)?;

        let mut upper = self.nodes[full].keys.split_off(t - 1);
        let median = upper.remove(0);
        let upper_children = if self.nodes[full].is_leaf() {
            Vec::new()
        } else {
            self.nodes[full].children.split_off(t)
        };

        self.nodes[sibling].keys = upper;
        self.nodes[sibling].children = upper_children;
        self.nodes[parent].keys.insert(idx, median);
        self.nodes[parent].children.insert(idx + 1, sibling);
        Ok(())
    }

    /// All ranges in key order.
    pub fn ranges(&self) -> Vec<RangeEntry> {
        let mut out = Vec::with_capacity(self.len);
        if let Some(root) = self.root {
            self.collect(root, &mut out);
        }
        out
    }

    fn collect(&self, node: usize, out: &mut Vec<RangeEntry>) {
        let n = &self.nodes[node];
        for (i, key) in n.keys.iter().enumerate() {
            if let Some(&child) = n.children.get(i) {
                self.collect(child, out);
            }
            out.push(*key);
        }
        if let Some(&last) = n.children.get(n.keys.len()) {
            self.collect(last, out);
        }
    }
}

impl Default for BTreeRangeTable {
    fn default() -> Self {
        Self::new(DEFAULT_DEGREE)
    }
}

impl RangeTable for BTreeRangeTable {
    fn lookup(&self, va: u64) -> RangeLookup {
        let vpn = va >> PAGE_SHIFT;
        let mut visited = Vec::new();
        let mut node = self.root;

        while let Some(id) = node {
            let n = &self.nodes[id];
            let mut i = 0;
            while i < n.keys.len() {
                visited.push(n.key_paddr(i));
                if vpn < n.keys[i].bound {
                    break;
                }
                i += 1;
            }
            if let Some(key) = n.keys.get(i).filter(|k| k.contains(vpn)) {
                return RangeLookup { entry: Some(*key), visited };
            }
            node = n.children.get(i).copied();
        }

        RangeLookup { entry: None, visited }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames() -> impl FnMut() -> Result<Pfn, MmError> {
        let mut next = 0x500;
        move || {
            next += 1;
            Ok(next)
        }
    }

    fn table_with(n: u64, degree: usize) -> BTreeRangeTable {
        let mut table = BTreeRangeTable::new(degree);
        let mut frames = frames();
        // Insert out of order to exercise splits on both sides
        for i in (0..n).rev().step_by(2).chain((0..n).step_by(2)) {
            table.insert(RangeEntry::new(i * 16, i * 16 + 8, 0x1_0000 + i * 8), &mut frames).unwrap();
        }
        table
    }

    #[test]
    fn test_empty_table_misses() {
        let table = BTreeRangeTable::default();
        let lookup = table.lookup(0x1000);
        assert_eq!(lookup.entry, None);
        assert!(lookup.visited.is_empty());
    }

    #[test]
    fn test_every_range_found() {
        let table = table_with(64, 2);
        assert_eq!(table.len(), 64);
        assert!(table.depth() > 2);
        for i in 0..64u64 {
            let va = (i * 16 + 3) << PAGE_SHIFT;
            let lookup = table.lookup(va);
            assert_eq!(lookup.entry.map(|r| r.vpn_start), Some(i * 16), "range {i}");
            assert!(!lookup.visited.is_empty());
        }
    }

    #[test]
    fn test_ranges_stay_sorted() {
        let table = table_with(40, 3);
        let starts: Vec<u64> = table.ranges().iter().map(|r| r.vpn_start).collect();
        let mut sorted = starts.clone();
        sorted.sort_unstable();
        assert_eq!(starts, sorted);
        assert_eq!(starts.len(), 40);
    }

    #[test]
    fn test_gap_between_ranges_misses() {
        let table = table_with(16, 2);
        let lookup = table.lookup(12 << PAGE_SHIFT);
        assert_eq!(lookup.entry, None);
        assert!(!lookup.visited.is_empty());
    }

    #[test]
    fn test_visited_addresses_follow_node_layout() {
        let mut table = BTreeRangeTable::new(2);
        let mut frames = frames();
        table.insert(RangeEntry::new(0, 8, 100), &mut frames).unwrap();
        table.insert(RangeEntry::new(16, 24, 200), &mut frames).unwrap();
        let lookup = table.lookup(20 << PAGE_SHIFT);
        assert_eq!(lookup.entry, Some(RangeEntry::new(16, 24, 200)));
        assert_eq!(lookup.visited, [0x501 * PAGE_SIZE, 0x501 * PAGE_SIZE + KEY_BYTES]);
    }

    #[test]
    fn test_node_allocation_failure_propagates() {
        let mut table = BTreeRangeTable::new(2);
        let err = table.insert(RangeEntry::new(0, 1, 0), &mut || Err(MmError::OutOfMemory));
        assert_eq!(err, Err(MmError::OutOfMemory));
        assert!(table.is_empty());
    }
}
