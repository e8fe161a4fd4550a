//! Functional page tables that record the entries a walk touches.

pub mod hashed;
pub mod radix;

use serde::{Deserialize, Serialize};

use crate::addr::{PageSize, Pfn};

pub use hashed::HashedPageTable;
pub use radix::RadixPageTable;

/// Page-table organization; only radix walks are filtered by the PWC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageTableKind {
    #[default]
    Radix,
    Hashed,
}

/// One page-table entry read during a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WalkAccess {
    /// Independent sub-table the entry belongs to.
    pub table: usize,
    /// Depth within that table, 0 first.
    pub level: usize,
    pub paddr: u64,
    /// This entry holds the translation.
    pub is_final: bool,
}

/// Outcome of a functional walk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalkTrace {
    pub accesses: Vec<WalkAccess>,
    /// Translation found, as the first 4KB frame of the page and its size.
    pub translation: Option<(Pfn, PageSize)>,
}

impl WalkTrace {
    pub fn is_fault(&self) -> bool {
        self.translation.is_none()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageTableStats {
    pub walks: u64,
    pub faults: u64,
    pub mapped_4k: u64,
    pub mapped_2m: u64,
    pub mapped_1g: u64,
    pub table_frames: u64,
}

impl PageTableStats {
    pub(crate) fn record_map(&mut self, size: PageSize) {
        match size {
            PageSize::Base4K => self.mapped_4k += 1,
            PageSize::Huge2M => self.mapped_2m += 1,
            PageSize::Huge1G => self.mapped_1g += 1,
        }
    }
}
