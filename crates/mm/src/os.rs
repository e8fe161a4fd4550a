//! Per-process memory state: page table, range table, VMAs and the fault
//! handler that backs pages through the huge page allocator.

use serde::Serialize;

use crate::addr::{FRAMES_PER_HUGE, PAGE_SIZE, PageSize, Pfn};
use crate::allocator::SharedAllocator;
use crate::config::OsConfig;
use crate::error::{Addr, MmError};
use crate::pagetable::{HashedPageTable, PageTableKind, PageTableStats, RadixPageTable};
use crate::range::{BTreeRangeTable, RangeEntry, Vma};
use crate::time::SimTime;
use crate::traits::{AddressSpace, PageTable, RangeTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OsStats {
    pub page_faults: u64,
    pub huge_mappings: u64,
    pub ranges_mapped: u64,
}

pub struct ProcessMemory {
    app_id: usize,
    allocator: SharedAllocator,
    page_table: Box<dyn PageTable>,
    range_table: Option<BTreeRangeTable>,
    vmas: Vec<Vma>,
    fault_latency: SimTime,
    stats: OsStats,
    trace: bool,
}

impl ProcessMemory {
    pub fn new(
        app_id: usize,
        allocator: SharedAllocator,
        page_table: Box<dyn PageTable>,
        fault_latency: SimTime,
    ) -> Self {
        Self {
            app_id,
            allocator,
            page_table,
            range_table: None,
            vmas: Vec::new(),
            fault_latency,
            stats: OsStats::default(),
            trace: false,
        }
    }

    /// Build the page table described by `config`, taking its root or its
    /// hash buckets from `allocator`.
    pub fn from_config(app_id: usize, config: &OsConfig, allocator: SharedAllocator) -> Result<Self, MmError> {
        let page_table: Box<dyn PageTable> = match config.page_table {
            PageTableKind::Radix => {
                let root = allocator.lock().allocate(PAGE_SIZE, 0, 0, true)?.pfn;
                Box::new(RadixPageTable::new(config.levels, root))
            }
            PageTableKind::Hashed => {
                let bytes = HashedPageTable::footprint(config.hashed_sizes.len(), config.hashed_slots);
                let base = allocator
                    .lock()
                    .give_page_fast(bytes, 0, 0)
                    .ok_or(MmError::OutOfMemory)?;
                Box::new(HashedPageTable::new(&config.hashed_sizes, config.hashed_slots, base * PAGE_SIZE))
            }
        };

        let mut process = Self::new(app_id, allocator, page_table, SimTime(config.page_fault_latency));
        if config.range_table {
            process.range_table = Some(BTreeRangeTable::new(config.range_table_degree));
        }
        log::info!(
            "[OS] app {app_id}: {:?} page table, range table {}",
            config.page_table,
            if config.range_table { "on" } else { "off" }
        );
        Ok(process)
    }

    pub fn with_range_table(mut self, table: BTreeRangeTable) -> Self {
        self.range_table = Some(table);
        self
    }

    /// Log every page fault at trace level.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn app_id(&self) -> usize {
        self.app_id
    }

    pub fn add_vma(&mut self, vma: Vma) {
        log::debug!("[OS] app {}: vma [{:#x}, {:#x})", self.app_id, vma.base, vma.end);
        self.vmas.push(vma);
    }

    /// Eagerly back `vma` with contiguous physical runs and record them in
    /// the range table. Returns the ranges installed.
    pub fn map_ranges(&mut self, vma: Vma) -> Result<Vec<RangeEntry>, MmError> {
        let Some(table) = self.range_table.as_mut() else {
            return Err(MmError::NoRangeTable);
        };
        let ranges = self.allocator.lock().allocate_ranges(vma.base, vma.end)?;

        let allocator = &self.allocator;
        let mut frames = || -> Result<Pfn, MmError> {
            Ok(allocator.lock().allocate(PAGE_SIZE, vma.base, 0, true)?.pfn)
        };
        for range in &ranges {
            table.insert(*range, &mut frames)?;
        }
        self.stats.ranges_mapped += ranges.len() as u64;
        log::debug!(
            "[OS] app {}: {} ranges back [{:#x}, {:#x})",
            self.app_id,
            ranges.len(),
            vma.base,
            vma.end
        );
        Ok(ranges)
    }

    pub fn allocator(&self) -> &SharedAllocator {
        &self.allocator
    }

    pub fn range_table_mut(&mut self) -> Option<&mut BTreeRangeTable> {
        self.range_table.as_mut()
    }

    pub fn stats(&self) -> OsStats {
        self.stats
    }

    pub fn page_table_stats(&self) -> PageTableStats {
        self.page_table.stats()
    }
}

impl AddressSpace for ProcessMemory {
    fn page_table(&mut self) -> &mut dyn PageTable {
        self.page_table.as_mut()
    }

    fn range_table(&self) -> Option<&dyn RangeTable> {
        self.range_table.as_ref().map(|t| t as &dyn RangeTable)
    }

    fn vmas(&self) -> &[Vma] {
        &self.vmas
    }

    fn page_fault_latency(&self) -> SimTime {
        self.fault_latency
    }

    /// Allocate a frame for `va` and map it. A frame from a promoted
    /// reservation is mapped as a 2MB leaf over the whole block, unless the
    /// page table has no 2MB leaves; then it is mapped as its own 4KB page.
    fn handle_page_fault(&mut self, va: u64, core_id: usize) -> Result<(), MmError> {
        self.stats.page_faults += 1;
        let allocation = self.allocator.lock().allocate(PAGE_SIZE, va, core_id, false)?;

        let huge = allocation.page_size == PageSize::Huge2M
            && self.page_table.supports_page_size(PageSize::Huge2M);
        let (ppn, size) = if huge {
            (allocation.pfn & !(FRAMES_PER_HUGE - 1), PageSize::Huge2M)
        } else {
            (allocation.pfn, PageSize::Base4K)
        };
        if size == PageSize::Huge2M {
            self.stats.huge_mappings += 1;
        }

        let allocator = &self.allocator;
        let mut frames = || -> Result<Pfn, MmError> {
            Ok(allocator.lock().allocate(PAGE_SIZE, va, core_id, true)?.pfn)
        };
        self.page_table.map(size.align_down(va), ppn, size, &mut frames)?;
        if self.trace {
            log::trace!("[OS] core {core_id}: fault {} mapped {size} at frame {ppn:#x}", Addr(va));
        }
        Ok(())
    }
}
