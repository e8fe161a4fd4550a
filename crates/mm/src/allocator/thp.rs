//! Reservation-based transparent huge page allocator.
//!
//! Every first touch of a 2MB virtual region reserves an aligned 2MB block
//! from the frame pool. Individual 4KB frames of the block are handed out as
//! their virtual pages fault in, tracked by a 512-bit occupancy map. Once the
//! occupied fraction exceeds the promotion threshold the region is promoted
//! and from then on reported as a 2MB mapping. Under memory pressure the
//! least-occupied unpromoted region is demoted and its untouched frames are
//! returned to the pool.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use vmsim_utils::{BitSet512, HashMap, Mutex};

use super::buddy::BuddyAllocator;
use crate::addr::{FRAMES_PER_HUGE, PAGE_SIZE, PageSize, Pfn, huge_region_key, huge_region_offset, vpn};
use crate::config::AllocatorConfig;
use crate::error::{ConfigError, MmError};
use crate::range::RangeEntry;
use crate::traits::FramePool;

/// Allocator shared between the fault handler of every simulated core.
pub type SharedAllocator<P = BuddyAllocator> = Arc<Mutex<ReservationThpAllocator<P>>>;

/// A reserved 2MB block of physical memory backing one 2MB virtual region.
#[derive(Debug, Clone, Copy)]
pub struct HugeRegion {
    pub base: Pfn,
    pub occupancy: BitSet512,
    /// Only ever goes from false to true.
    pub promoted: bool,
}

/// Result of a successful allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// 4KB frame backing the requested virtual page.
    pub pfn: Pfn,
    pub page_size: PageSize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThpStats {
    pub total_allocations: u64,
    pub four_kb_allocated: u64,
    pub two_mb_reserved: u64,
    pub two_mb_promoted: u64,
    pub two_mb_demoted: u64,
    pub page_table_pages: u64,
    pub failed_allocations: u64,
    pub deallocations: u64,
}

pub struct ReservationThpAllocator<P: FramePool = BuddyAllocator> {
    pool: P,
    threshold: f64,
    /// Regions keyed by `va >> 21`.
    regions: BTreeMap<u64, HugeRegion>,
    /// Region key by reserved block base, for frame-to-region lookup.
    owners: HashMap<Pfn, u64>,
    stats: ThpStats,
}

impl ReservationThpAllocator<BuddyAllocator> {
    /// Build the allocator and its buddy pool, applying any requested
    /// artificial fragmentation.
    pub fn from_config(config: &AllocatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut pool = BuddyAllocator::new(
            config.memory_size_mb,
            config.kernel_size_mb,
            config.max_order,
            config.fragmentation_metric,
        );
        if let Some(target) = config.fragmentation_target {
            pool.fragment(target);
        }
        Ok(Self::new(pool, config.threshold_for_promotion))
    }
}

impl<P: FramePool> ReservationThpAllocator<P> {
    pub fn new(pool: P, threshold: f64) -> Self {
        Self {
            pool,
            threshold,
            regions: BTreeMap::new(),
            owners: HashMap::new(),
            stats: ThpStats::default(),
        }
    }

    pub fn into_shared(self) -> SharedAllocator<P> {
        Arc::new(Mutex::new(self))
    }

    /// Allocate backing memory for the virtual page containing `va`.
    ///
    /// Page-table allocations bypass the reservation logic and always get a
    /// plain 4KB frame.
    pub fn allocate(
        &mut self,
        bytes: u64,
        va: u64,
        core_id: usize,
        is_page_table: bool,
    ) -> Result<Allocation, MmError> {
        self.stats.total_allocations += 1;

        if is_page_table {
            let pfn = self.pool.allocate(bytes).ok_or_else(|| self.fail(va))?;
            self.stats.four_kb_allocated += 1;
            self.stats.page_table_pages += 1;
            return Ok(Allocation { pfn, page_size: PageSize::Base4K });
        }

        if let Some(allocation) = self.check_huge_allocation(va) {
            return Ok(allocation);
        }

        if let Some(pfn) = self.pool.allocate(bytes) {
            self.stats.four_kb_allocated += 1;
            return Ok(Allocation { pfn, page_size: PageSize::Base4K });
        }

        // One demotion, one retry.
        let demoted = self.demote_page();
        log::debug!("[THP] core {core_id}: pool exhausted at {va:#x}, demoted={demoted}");
        let pfn = self.pool.allocate(bytes).ok_or_else(|| self.fail(va))?;
        self.stats.four_kb_allocated += 1;
        Ok(Allocation { pfn, page_size: PageSize::Base4K })
    }

    fn fail(&mut self, va: u64) -> MmError {
        self.stats.failed_allocations += 1;
        log::warn!("[THP] out of memory allocating for {va:#x}");
        MmError::OutOfMemory
    }

    /// Place `va` inside its 2MB reservation, reserving one if needed.
    ///
    /// Returns `None` only when a new reservation was needed and the pool
    /// had no aligned 2MB block.
    pub fn check_huge_allocation(&mut self, va: u64) -> Option<Allocation> {
        let key = huge_region_key(va);
        if !self.regions.contains_key(&key) {
            let base = self.pool.reserve_huge()?;
            self.regions.insert(
                key,
                HugeRegion { base, occupancy: BitSet512::new(), promoted: false },
            );
            self.owners.insert(base, key);
            self.stats.two_mb_reserved += 1;
            log::trace!("[THP] reserved region {key:#x} at frame {base:#x}");
        }

        let region = self.regions.get_mut(&key)?;
        let offset = huge_region_offset(va);
        region.occupancy.set(offset);

        if !region.promoted && region.occupancy.occupancy() > self.threshold {
            region.promoted = true;
            self.stats.two_mb_promoted += 1;
            log::trace!("[THP] promoted region {key:#x}");
        }

        let page_size = if region.promoted { PageSize::Huge2M } else { PageSize::Base4K };
        Some(Allocation { pfn: region.base + offset as u64, page_size })
    }

    /// Demote the least-occupied unpromoted region, lowest key on ties.
    ///
    /// Untouched frames go back to the pool; touched ones stay allocated as
    /// standalone 4KB frames. Returns false if no region can be demoted.
    pub fn demote_page(&mut self) -> bool {
        let Some(key) = self
            .regions
            .iter()
            .filter(|(_, r)| !r.promoted)
            .min_by_key(|(_, r)| r.occupancy.count())
            .map(|(&k, _)| k)
        else {
            return false;
        };
        let Some(region) = self.regions.remove(&key) else {
            return false;
        };
        self.owners.remove(&region.base);

        for idx in region.occupancy.iter_clear() {
            self.pool.free(region.base + idx as u64, 1);
        }
        self.stats.two_mb_demoted += 1;
        log::debug!(
            "[THP] demoted region {key:#x}, released {} frames",
            FRAMES_PER_HUGE as usize - region.occupancy.count()
        );
        true
    }

    /// Direct pool allocation with no reservation bookkeeping.
    pub fn give_page_fast(&mut self, bytes: u64, _va: u64, _core_id: usize) -> Option<Pfn> {
        self.pool.allocate(bytes)
    }

    /// Release one 4KB frame.
    ///
    /// Frames inside a reservation clear their occupancy bit, and the whole
    /// block is returned once the region is empty. Other frames go straight
    /// back to the pool.
    pub fn deallocate(&mut self, pfn: Pfn, core_id: usize) {
        self.stats.deallocations += 1;
        let base = pfn & !(FRAMES_PER_HUGE - 1);
        let Some(&key) = self.owners.get(&base) else {
            self.pool.free(pfn, 1);
            return;
        };
        let Some(region) = self.regions.get_mut(&key) else {
            return;
        };
        if !region.occupancy.clear((pfn - base) as usize) {
            log::warn!("[THP] core {core_id}: frame {pfn:#x} freed twice");
            return;
        }
        if region.occupancy.is_empty() {
            self.regions.remove(&key);
            self.owners.remove(&base);
            self.pool.free(base, FRAMES_PER_HUGE);
        }
    }

    /// Back `[start_va, end_va)` with physically contiguous runs, one range
    /// entry per run.
    pub fn allocate_ranges(&mut self, start_va: u64, end_va: u64) -> Result<Vec<RangeEntry>, MmError> {
        let mut next = vpn(start_va);
        let end = vpn(end_va.saturating_add(PAGE_SIZE - 1));
        let mut ranges: Vec<RangeEntry> = Vec::new();

        while next < end {
            let Some((pfn, frames)) = self.pool.allocate_contiguous(end - next) else {
                for r in &ranges {
                    self.pool.free(r.ppn_offset, r.len());
                }
                return Err(self.fail(next << 12));
            };
            ranges.push(RangeEntry { vpn_start: next, bound: next + frames, ppn_offset: pfn });
            self.stats.four_kb_allocated += frames;
            next += frames;
        }
        Ok(ranges)
    }

    /// Base frame of the reservation backing `va`, if one exists.
    pub fn huge_region_of(&self, va: u64) -> Option<Pfn> {
        self.regions.get(&huge_region_key(va)).map(|r| r.base)
    }

    pub fn region(&self, va: u64) -> Option<&HugeRegion> {
        self.regions.get(&huge_region_key(va))
    }

    pub fn regions(&self) -> impl Iterator<Item = (&u64, &HugeRegion)> {
        self.regions.iter()
    }

    pub fn stats(&self) -> ThpStats {
        self.stats
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn pool(&self) -> &P {
        &self.pool
    }

    pub fn free_pages(&self) -> u64 {
        self.pool.free_pages()
    }

    pub fn total_pages(&self) -> u64 {
        self.pool.total_pages()
    }

    pub fn large_page_ratio(&self) -> f64 {
        self.pool.large_page_ratio()
    }

    pub fn average_size_ratio(&self) -> f64 {
        self.pool.average_size_ratio()
    }

    pub fn fragment_memory(&mut self, target: f64) {
        self.pool.fragment(target);
    }
}
