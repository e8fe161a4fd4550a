//! Radix page table: 512-entry nodes, one frame each.
//!
//! Level 0 is the root. With four levels a 4KB leaf sits at level 3, a 2MB
//! leaf at level 2 and a 1GB leaf at level 1.

use super::{PageTableKind, PageTableStats, WalkAccess, WalkTrace};
use crate::addr::{PAGE_SHIFT, PAGE_SIZE, PageSize, Pfn};
use crate::error::{Addr, MmError};
use crate::traits::PageTable;

pub const ENTRIES_PER_NODE: usize = 512;
const INDEX_BITS: u32 = 9;
const PTE_BYTES: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Table(usize),
    Leaf { ppn: Pfn, size: PageSize },
}

struct Node {
    pfn: Pfn,
    slots: Box<[Slot]>,
}

impl Node {
    fn new(pfn: Pfn) -> Self {
        Self { pfn, slots: vec![Slot::Empty; ENTRIES_PER_NODE].into_boxed_slice() }
    }

    fn entry_paddr(&self, idx: usize) -> u64 {
        self.pfn * PAGE_SIZE + idx as u64 * PTE_BYTES
    }
}

pub struct RadixPageTable {
    nodes: Vec<Node>,
    levels: usize,
    stats: PageTableStats,
}

impl RadixPageTable {
    /// `root` is the frame holding the top-level node.
    pub fn new(levels: usize, root: Pfn) -> Self {
        Self {
            nodes: vec![Node::new(root)],
            levels: levels.max(1),
            stats: PageTableStats { table_frames: 1, ..PageTableStats::default() },
        }
    }

    pub fn root(&self) -> Pfn {
        self.nodes[0].pfn
    }

    fn index(&self, va: u64, level: usize) -> usize {
        let shift = PAGE_SHIFT + INDEX_BITS * (self.levels - 1 - level) as u32;
        ((va >> shift) as usize) & (ENTRIES_PER_NODE - 1)
    }

    /// Level at which a leaf of `size` lives, if the table is deep enough.
    fn leaf_level(&self, size: PageSize) -> Option<usize> {
        let up = ((size.shift() - PAGE_SHIFT) / INDEX_BITS) as usize;
        (self.levels - 1).checked_sub(up)
    }

    /// Functional translation without recording a walk.
    pub fn translate(&self, va: u64) -> Option<(Pfn, PageSize)> {
        let mut node = 0;
        for level in 0..self.levels {
            match self.nodes[node].slots[self.index(va, level)] {
                Slot::Empty => return None,
                Slot::Table(next) => node = next,
                Slot::Leaf { ppn, size } => return Some((ppn, size)),
            }
        }
        None
    }
}

impl PageTable for RadixPageTable {
    fn kind(&self) -> PageTableKind {
        PageTableKind::Radix
    }

    fn max_level(&self) -> usize {
        self.levels
    }

    fn supports_page_size(&self, size: PageSize) -> bool {
        self.leaf_level(size).is_some()
    }

    fn initialize_walk(&mut self, va: u64, count: bool, is_prefetch: bool) -> WalkTrace {
        let mut trace = WalkTrace::default();
        let mut node = 0;

        for level in 0..self.levels {
            let idx = self.index(va, level);
            let paddr = self.nodes[node].entry_paddr(idx);
            let slot = self.nodes[node].slots[idx];
            match slot {
                Slot::Empty => {
                    trace.accesses.push(WalkAccess { table: 0, level, paddr, is_final: false });
                    break;
                }
                Slot::Table(next) => {
                    trace.accesses.push(WalkAccess { table: 0, level, paddr, is_final: false });
                    node = next;
                }
                Slot::Leaf { ppn, size } => {
                    trace.accesses.push(WalkAccess { table: 0, level, paddr, is_final: true });
                    trace.translation = Some((ppn, size));
                    break;
                }
            }
        }

        if count && !is_prefetch {
            self.stats.walks += 1;
            if trace.is_fault() {
                self.stats.faults += 1;
            }
        }
        trace
    }

    fn map(
        &mut self,
        va: u64,
        ppn: Pfn,
        size: PageSize,
        frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError> {
        let Some(leaf_level) = self.leaf_level(size) else {
            return Err(MmError::Unmapped(Addr(va)));
        };

        let mut node = 0;
        for level in 0..leaf_level {
            let idx = self.index(va, level);
            let slot = self.nodes[node].slots[idx];
            node = match slot {
                Slot::Table(next) => next,
                // A larger leaf in the way is split by replacing it with a
                // fresh table; pages it covered fault in again.
                Slot::Empty | Slot::Leaf { .. } => {
                    let pfn = frames()?;
                    self.nodes.push(Node::new(pfn));
                    self.stats.table_frames += 1;
                    let next = self.nodes.len() - 1;
                    self.nodes[node].slots[idx] = Slot::Table(next);
                    next
                }
            };
        }

        let idx = self.index(va, leaf_level);
        self.nodes[node].slots[idx] = Slot::Leaf { ppn, size };
        self.stats.record_map(size);
        Ok(())
    }

    fn unmap(&mut self, va: u64) -> bool {
        let mut node = 0;
        for level in 0..self.levels {
            let idx = self.index(va, level);
            let slot = self.nodes[node].slots[idx];
            match slot {
                Slot::Empty => return false,
                Slot::Table(next) => node = next,
                Slot::Leaf { .. } => {
                    self.nodes[node].slots[idx] = Slot::Empty;
                    return true;
                }
            }
        }
        false
    }

    fn stats(&self) -> PageTableStats {
        self.stats
    }
}
