//! Collaborator interfaces of the translation core.
//!
//! The MMU and allocator never reach into the OS model, the cache hierarchy
//! or the buddy primitive directly; they talk to them through these traits.

use crate::addr::{PageSize, Pfn};
use crate::error::MmError;
use crate::pagetable::{PageTableKind, PageTableStats, WalkTrace};
use crate::range::{RangeLookup, Vma};
use crate::time::SimTime;

/// Power-of-two frame pool backing the huge-page allocator.
pub trait FramePool: Send {
    /// Take a 2MB-aligned block of 512 frames.
    fn reserve_huge(&mut self) -> Option<Pfn>;
    /// Allocate enough contiguous frames to hold `bytes`.
    fn allocate(&mut self, bytes: u64) -> Option<Pfn>;
    /// Allocate up to `max_frames` contiguous frames, returning the start and
    /// the number actually granted.
    fn allocate_contiguous(&mut self, max_frames: u64) -> Option<(Pfn, u64)>;
    /// Return `frames` frames starting at `pfn`.
    fn free(&mut self, pfn: Pfn, frames: u64);
    /// Test hook: split free memory until fragmentation reaches `target`.
    fn fragment(&mut self, target: f64);
    fn free_pages(&self) -> u64;
    fn total_pages(&self) -> u64;
    fn large_page_ratio(&self) -> f64;
    fn average_size_ratio(&self) -> f64;
}

/// Page-table organization walked by the timing engine.
pub trait PageTable: Send {
    fn kind(&self) -> PageTableKind;

    /// Number of levels a walk may touch.
    fn max_level(&self) -> usize;

    /// Whether a leaf of `size` can be installed.
    fn supports_page_size(&self, size: PageSize) -> bool;

    /// Functionally resolve `va`, recording every entry touched.
    fn initialize_walk(&mut self, va: u64, count: bool, is_prefetch: bool) -> WalkTrace;

    /// Install a translation. `frames` provides backing frames for any
    /// table node the mapping needs.
    fn map(
        &mut self,
        va: u64,
        ppn: Pfn,
        size: PageSize,
        frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError>;

    /// Remove the translation covering `va`, returning whether one existed.
    fn unmap(&mut self, va: u64) -> bool;

    fn stats(&self) -> PageTableStats;
}

/// Range table consulted after an RLB miss.
pub trait RangeTable: Send {
    /// Covering range for `va`, plus the physical address of every node
    /// visited on the way.
    fn lookup(&self, va: u64) -> RangeLookup;
}

/// Structure a translation-side memory access belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSource {
    PageTable,
    RangeTable,
}

/// One memory access issued by the walker or the range unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    pub paddr: u64,
    pub core_id: usize,
    pub source: AccessSource,
    pub count: bool,
}

/// Cache-hierarchy model answering translation-side memory accesses.
pub trait MemoryAccessor {
    /// Latency of `access` when issued at `issue`.
    fn access(&mut self, access: &MemoryAccess, issue: SimTime) -> SimTime;
}

/// OS view of one application's address space.
pub trait AddressSpace {
    fn page_table(&mut self) -> &mut dyn PageTable;
    fn range_table(&self) -> Option<&dyn RangeTable>;
    fn vmas(&self) -> &[Vma];
    /// Fixed latency charged once per page fault.
    fn page_fault_latency(&self) -> SimTime;
    /// Allocate and map backing memory for `va`.
    fn handle_page_fault(&mut self, va: u64, core_id: usize) -> Result<(), MmError>;
}
