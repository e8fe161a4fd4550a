//! Page-table walk timing.
//!
//! The functional walk comes from the address space's page table. This
//! module turns the list of touched entries into a latency: levels of one
//! table are serialized, separate tables proceed in parallel, and anything
//! issued after the translation is already known costs nothing.

use serde::Serialize;

use super::pwc::PageWalkCache;
use crate::addr::{PageSize, Pfn};
use crate::error::{Addr, MmError};
use crate::pagetable::{PageTableKind, WalkAccess};
use crate::time::SimTime;
use crate::traits::{AccessSource, AddressSpace, MemoryAccess, MemoryAccessor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    pub core_id: usize,
    pub count: bool,
    pub is_prefetch: bool,
}

impl WalkOptions {
    pub fn counted(core_id: usize) -> Self {
        Self { core_id, count: true, is_prefetch: false }
    }
}

/// Timing and outcome of one translation walk, fault included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkResult {
    /// Memory time of the walk, both passes if the first one faulted.
    pub walk_latency: SimTime,
    pub fault_latency: SimTime,
    pub faulted: bool,
    pub ppn: Pfn,
    pub page_size: PageSize,
}

impl WalkResult {
    pub fn total(&self) -> SimTime {
        self.walk_latency + self.fault_latency
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkerStats {
    pub walks: u64,
    pub page_faults: u64,
    pub memory_accesses: u64,
    pub pwc_filtered: u64,
    pub total_walk_latency: SimTime,
    pub total_fault_latency: SimTime,
}

pub struct PageTableWalker {
    pwc: Option<PageWalkCache>,
    stats: WalkerStats,
    trace: bool,
}

impl PageTableWalker {
    pub fn new(pwc: Option<PageWalkCache>, trace: bool) -> Self {
        Self { pwc, stats: WalkerStats::default(), trace }
    }

    /// Walk `va` starting at `issue`. A faulting walk invokes the fault
    /// handler, charges its latency once and walks again; the second pass
    /// must resolve.
    pub fn walk(
        &mut self,
        va: u64,
        issue: SimTime,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
        opts: WalkOptions,
    ) -> Result<WalkResult, MmError> {
        if opts.count {
            self.stats.walks += 1;
        }

        let (translation, first) = self.walk_once(va, issue, space, mem, opts);
        let (translation, walk_latency, fault_latency) = match translation {
            Some(t) => (t, first, None),
            None => {
                space.handle_page_fault(va, opts.core_id)?;
                let fault_latency = space.page_fault_latency();
                let restart = issue + first + fault_latency;
                let (translation, second) = self.walk_once(va, restart, space, mem, opts);
                let translation = translation.ok_or(MmError::Unmapped(Addr(va)))?;
                if opts.count {
                    self.stats.page_faults += 1;
                    self.stats.total_fault_latency += fault_latency;
                }
                (translation, first + second, Some(fault_latency))
            }
        };
        let faulted = fault_latency.is_some();
        let fault_latency = fault_latency.unwrap_or(SimTime::ZERO);

        if opts.count {
            self.stats.total_walk_latency += walk_latency;
        }
        if self.trace {
            log::trace!(
                "[PTW] {va:#x} -> frame {:#x} ({}) walk {walk_latency} fault {fault_latency}",
                translation.0,
                translation.1
            );
        }
        Ok(WalkResult {
            walk_latency,
            fault_latency,
            faulted,
            ppn: translation.0,
            page_size: translation.1,
        })
    }

    /// Walk `va` for the prefetcher starting at `issue`. Never faults and
    /// counts nothing; returns the translation and its walk latency, or
    /// `None` when `va` is unmapped.
    pub fn prefetch_walk(
        &mut self,
        va: u64,
        issue: SimTime,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
        core_id: usize,
    ) -> Option<(Pfn, PageSize, SimTime)> {
        let opts = WalkOptions { core_id, count: false, is_prefetch: true };
        let (translation, latency) = self.walk_once(va, issue, space, mem, opts);
        if self.trace {
            log::trace!("[PTW] prefetch {va:#x} -> {translation:?} in {latency}");
        }
        translation.map(|(ppn, size)| (ppn, size, latency))
    }

    fn walk_once(
        &mut self,
        va: u64,
        issue: SimTime,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
        opts: WalkOptions,
    ) -> (Option<(Pfn, PageSize)>, SimTime) {
        let table = space.page_table();
        let kind = table.kind();
        let mut trace = table.initialize_walk(va, opts.count, opts.is_prefetch);

        trace.accesses.sort_unstable();
        trace.accesses.dedup();
        if kind == PageTableKind::Radix {
            self.filter_cached(&mut trace.accesses, opts.count);
        }

        let latency = self.timed_walk(&trace.accesses, issue, mem, opts);
        (trace.translation, latency)
    }

    /// Drop intermediate entries the page-walk cache already holds.
    fn filter_cached(&mut self, accesses: &mut Vec<WalkAccess>, count: bool) {
        let Some(pwc) = self.pwc.as_mut() else {
            return;
        };
        let before = accesses.len();
        accesses.retain(|a| a.is_final || !pwc.lookup(a.paddr, a.level, count));
        if count {
            self.stats.pwc_filtered += (before - accesses.len()) as u64;
        }
    }

    /// Latency of issuing `accesses` starting at `issue`.
    ///
    /// Each table keeps its own fetch delay; an entry at level `l` is issued
    /// once level `l - 1` of the same table has completed. A level costs
    /// its slowest entry, or its final entry if it holds the translation.
    /// Entries issued at or after the moment the translation arrived are
    /// free. The walk costs the sum over the table that produced the
    /// translation, or the slowest table when none did.
    pub fn timed_walk(
        &mut self,
        accesses: &[WalkAccess],
        issue: SimTime,
        mem: &mut dyn MemoryAccessor,
        opts: WalkOptions,
    ) -> SimTime {
        let tables = accesses.iter().map(|a| a.table + 1).max().unwrap_or(0);
        let levels = accesses.iter().map(|a| a.level + 1).max().unwrap_or(0);
        let mut per_level = vec![vec![SimTime::ZERO; levels]; tables];
        let mut fetch_delay = vec![SimTime::ZERO; tables];
        let mut translation_at: Option<SimTime> = None;
        let mut correct_table: Option<usize> = None;

        for level in 0..levels {
            for table in 0..tables {
                let issue_at = issue + fetch_delay[table];
                let mut slowest = SimTime::ZERO;
                let mut final_latency = None;

                for a in accesses.iter().filter(|a| a.table == table && a.level == level) {
                    let latency = if translation_at.is_none_or(|t| issue_at < t) {
                        if opts.count {
                            self.stats.memory_accesses += 1;
                        }
                        let request = MemoryAccess {
                            paddr: a.paddr,
                            core_id: opts.core_id,
                            source: AccessSource::PageTable,
                            count: opts.count,
                        };
                        mem.access(&request, issue_at)
                    } else {
                        SimTime::ZERO
                    };

                    if a.is_final && correct_table.is_none() {
                        correct_table = Some(table);
                        translation_at = Some(issue_at + latency);
                        final_latency = Some(latency);
                    } else {
                        slowest = slowest.max(latency);
                    }
                }

                let cost = final_latency.unwrap_or(slowest);
                per_level[table][level] = cost;
                fetch_delay[table] += cost;
            }
        }

        match correct_table {
            Some(t) => per_level[t].iter().copied().sum(),
            None => per_level
                .iter()
                .map(|l| l.iter().copied().sum::<SimTime>())
                .max()
                .unwrap_or(SimTime::ZERO),
        }
    }

    pub fn pwc(&self) -> Option<&PageWalkCache> {
        self.pwc.as_ref()
    }

    pub fn stats(&self) -> WalkerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagetable::{HashedPageTable, RadixPageTable};
    use crate::range::Vma;
    use crate::traits::{PageTable, RangeTable};

    struct FlatMemory {
        latency: SimTime,
        issued: Vec<(u64, SimTime)>,
    }

    impl FlatMemory {
        fn new(latency: u64) -> Self {
            Self { latency: SimTime(latency), issued: Vec::new() }
        }
    }

    impl MemoryAccessor for FlatMemory {
        fn access(&mut self, access: &MemoryAccess, issue: SimTime) -> SimTime {
            self.issued.push((access.paddr, issue));
            self.latency
        }
    }

    struct Space {
        table: Box<dyn PageTable>,
        fault_latency: SimTime,
        maps_on_fault: bool,
        next_frame: Pfn,
    }

    impl Space {
        fn radix(maps_on_fault: bool) -> Self {
            Self {
                table: Box::new(RadixPageTable::new(4, 1)),
                fault_latency: SimTime(1000),
                maps_on_fault,
                next_frame: 100,
            }
        }
    }

    impl AddressSpace for Space {
        fn page_table(&mut self) -> &mut dyn PageTable {
            self.table.as_mut()
        }

        fn range_table(&self) -> Option<&dyn RangeTable> {
            None
        }

        fn vmas(&self) -> &[Vma] {
            &[]
        }

        fn page_fault_latency(&self) -> SimTime {
            self.fault_latency
        }

        fn handle_page_fault(&mut self, va: u64, _core_id: usize) -> Result<(), MmError> {
            if !self.maps_on_fault {
                return Ok(());
            }
            let mut next = self.next_frame;
            let mut frames = || -> Result<Pfn, MmError> {
                next += 1;
                Ok(next)
            };
            self.table.map(va, 7, PageSize::Base4K, &mut frames)?;
            self.next_frame = next;
            Ok(())
        }
    }

    fn access(table: usize, level: usize, paddr: u64, is_final: bool) -> WalkAccess {
        WalkAccess { table, level, paddr, is_final }
    }

    /// Tests: [P1] a resolved radix walk serializes its levels
    #[test]
    fn test_radix_walk_sums_levels() {
        let mut space = Space::radix(false);
        let mut frames = {
            let mut n = 10;
            move || -> Result<Pfn, MmError> {
                n += 1;
                Ok(n)
            }
        };
        space.table.map(0x40_0000, 3, PageSize::Base4K, &mut frames).unwrap();
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);

        let r = walker
            .walk(0x40_0123, SimTime(5), &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap();
        assert_eq!(r.walk_latency, SimTime(40));
        assert!(!r.faulted);
        assert_eq!((r.ppn, r.page_size), (3, PageSize::Base4K));
        let issues: Vec<u64> = mem.issued.iter().map(|&(_, t)| t.cycles()).collect();
        assert_eq!(issues, [5, 15, 25, 35]);
    }

    /// Tests: [P2] PWC hits on upper levels are not charged
    #[test]
    fn test_pwc_filters_upper_levels() {
        let mut space = Space::radix(false);
        let mut frames = {
            let mut n = 10;
            move || -> Result<Pfn, MmError> {
                n += 1;
                Ok(n)
            }
        };
        space.table.map(0x40_0000, 3, PageSize::Base4K, &mut frames).unwrap();
        let mut mem = FlatMemory::new(10);
        let pwc = PageWalkCache::new(&[(16, 4), (16, 4), (16, 4)]);
        let mut walker = PageTableWalker::new(Some(pwc), false);

        let first = walker
            .walk(0x40_0000, SimTime::ZERO, &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap();
        let second = walker
            .walk(0x40_0000, SimTime(100), &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap();
        assert_eq!(first.walk_latency, SimTime(40));
        assert_eq!(second.walk_latency, SimTime(10));
        assert_eq!(walker.stats().pwc_filtered, 3);
        assert_eq!(walker.stats().memory_accesses, 5);
    }

    /// Tests: prefetch walks are timed but neither fault nor count
    #[test]
    fn test_prefetch_walk_never_faults() {
        let mut space = Space::radix(true);
        let mut frames = {
            let mut n = 10;
            move || -> Result<Pfn, MmError> {
                n += 1;
                Ok(n)
            }
        };
        space.table.map(0x40_0000, 3, PageSize::Base4K, &mut frames).unwrap();
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);

        let hit = walker.prefetch_walk(0x40_0000, SimTime(5), &mut space, &mut mem, 0);
        assert_eq!(hit, Some((3, PageSize::Base4K, SimTime(40))));
        assert_eq!(walker.prefetch_walk(0x80_0000, SimTime(5), &mut space, &mut mem, 0), None);
        assert!(space.table.initialize_walk(0x80_0000, false, false).is_fault());
        assert_eq!(walker.stats(), WalkerStats::default());
    }

    /// Tests: [P3] hashed sub-tables are searched in parallel
    #[test]
    fn test_hashed_tables_in_parallel() {
        let mut space = Space::radix(false);
        space.table = Box::new(HashedPageTable::new(&[PageSize::Base4K, PageSize::Huge2M], 64, 0));
        space
            .table
            .map(0x20_0000, 512, PageSize::Huge2M, &mut || Err(MmError::OutOfMemory))
            .unwrap();
        let mut mem = FlatMemory::new(30);
        let mut walker = PageTableWalker::new(Some(PageWalkCache::new(&[(4, 4)])), false);

        let r = walker
            .walk(0x20_1000, SimTime::ZERO, &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap();
        assert_eq!(r.walk_latency, SimTime(30));
        assert_eq!(r.page_size, PageSize::Huge2M);
        assert!(mem.issued.iter().all(|&(_, t)| t == SimTime::ZERO));
        // Hashed walks bypass the PWC
        assert_eq!(walker.stats().pwc_filtered, 0);
    }

    /// Tests: [P4] a faulting walk costs walk + fault + rewalk
    #[test]
    fn test_fault_then_rewalk() {
        let mut space = Space::radix(true);
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);

        let r = walker
            .walk(0x7000, SimTime::ZERO, &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap();
        assert!(r.faulted);
        assert_eq!(r.fault_latency, SimTime(1000));
        assert_eq!(r.walk_latency, SimTime(10 + 40));
        assert_eq!(r.total(), SimTime(1050));
        // Second walk starts once the first walk and the fault are over
        assert_eq!(mem.issued[1].1, SimTime(1010));
        assert_eq!(walker.stats().page_faults, 1);
    }

    /// Tests: [P5] a fault the handler cannot resolve is an error
    #[test]
    fn test_unresolved_fault() {
        let mut space = Space::radix(false);
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);
        let err = walker
            .walk(0x7000, SimTime::ZERO, &mut space, &mut mem, WalkOptions::counted(0))
            .unwrap_err();
        assert_eq!(err, MmError::Unmapped(Addr(0x7000)));
    }

    /// Tests: [P6] accesses issued after the translation arrived are free
    #[test]
    fn test_accesses_after_translation_are_free() {
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);
        let accesses = [
            access(0, 0, 0x100, true),
            access(1, 0, 0x200, false),
            access(1, 1, 0x300, false),
            access(1, 2, 0x400, false),
        ];
        let latency = walker.timed_walk(&accesses, SimTime::ZERO, &mut mem, WalkOptions::counted(0));
        assert_eq!(latency, SimTime(10));
        assert_eq!(mem.issued.len(), 2);
    }

    /// Tests: [P7] without a translation the slowest table decides
    #[test]
    fn test_no_translation_takes_slowest_table() {
        let mut mem = FlatMemory::new(10);
        let mut walker = PageTableWalker::new(None, false);
        let accesses = [
            access(0, 0, 0x100, false),
            access(0, 1, 0x180, false),
            access(1, 0, 0x200, false),
        ];
        let latency = walker.timed_walk(&accesses, SimTime::ZERO, &mut mem, WalkOptions::counted(0));
        assert_eq!(latency, SimTime(20));
    }

    /// Tests: [P8] entries of one level are fetched concurrently
    #[test]
    fn test_level_costs_slowest_entry() {
        struct ByAddr;
        impl MemoryAccessor for ByAddr {
            fn access(&mut self, access: &MemoryAccess, _issue: SimTime) -> SimTime {
                SimTime(access.paddr / 0x100)
            }
        }
        let mut walker = PageTableWalker::new(None, false);
        let accesses = [
            access(0, 0, 0x300, false),
            access(0, 0, 0x500, false),
            access(0, 1, 0x200, true),
        ];
        let latency =
            walker.timed_walk(&accesses, SimTime::ZERO, &mut ByAddr, WalkOptions::counted(0));
        assert_eq!(latency, SimTime(5 + 2));
    }
}
