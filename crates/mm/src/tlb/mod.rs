//! Translation lookaside buffers.
//!
//! [`Tlb`] is the contract a unit fulfils towards the hierarchy: lookup,
//! allocate with eviction reporting, capability and page-size support.
//! [`SetAssocTlb`] is the set-associative LRU unit used by default.

pub mod hierarchy;
pub mod prefetch;
pub mod unit;

use serde::{Deserialize, Serialize};

use crate::addr::{PageSize, Pfn};
use crate::time::SimTime;

pub use hierarchy::{TlbHierarchy, TlbHit};
pub use prefetch::{PrefetchQueue, PrefetchStats, StridePrefetcher};
pub use unit::SetAssocTlb;

/// Kind of access being translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    Instruction,
    Data,
}

/// Which access kinds a unit serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlbCapability {
    Instruction,
    Data,
    #[default]
    Unified,
}

impl TlbCapability {
    pub const fn serves(self, kind: AccessKind) -> bool {
        matches!(
            (self, kind),
            (TlbCapability::Unified, _)
                | (TlbCapability::Instruction, AccessKind::Instruction)
                | (TlbCapability::Data, AccessKind::Data)
        )
    }
}

/// One cached translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    /// Virtual address aligned to `page_size`.
    pub vpage: u64,
    /// First 4KB frame of the page.
    pub ppn: Pfn,
    pub page_size: PageSize,
}

impl TlbEntry {
    pub fn new(va: u64, ppn: Pfn, page_size: PageSize) -> Self {
        Self { vpage: page_size.align_down(va), ppn, page_size }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TlbStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub allocations: u64,
    pub evictions: u64,
}

pub trait Tlb: Send {
    fn name(&self) -> &str;
    fn capability(&self) -> TlbCapability;
    fn latency(&self) -> SimTime;
    fn supports_page_size(&self, size: PageSize) -> bool;
    fn allocate_on_miss(&self) -> bool;

    /// Look for a translation of `va` in any supported page size.
    fn lookup(&mut self, va: u64, count: bool) -> Option<TlbEntry>;

    /// Insert `entry`, returning the entry it displaced. Re-inserting a
    /// present translation refreshes it and evicts nothing.
    fn allocate(&mut self, entry: TlbEntry, count: bool) -> Option<TlbEntry>;

    fn stats(&self) -> TlbStats;
}
