use super::{MmuDesign, MmuReport, MmuStats, Translation, TranslationRequest, TranslationSource};
use crate::addr::{PageSize, physical_address, vpn};
use crate::config::MmuConfig;
use crate::error::{Addr, ConfigError, MmError};
use crate::range::{RangeTranslationUnit, find_vma};
use crate::time::{SimClock, SimTime};
use crate::tlb::{PrefetchQueue, TlbEntry, TlbHierarchy};
use crate::traits::{AddressSpace, MemoryAccessor};
use crate::walker::{PageTableWalker, PageWalkCache, SharedWalkerPool, WalkOptions, WalkerSlot};

pub struct Mmu {
    design: MmuDesign,
    tlbs: TlbHierarchy,
    walker: PageTableWalker,
    pool: SharedWalkerPool,
    range: Option<RangeTranslationUnit>,
    prefetch: Option<PrefetchQueue>,
    stats: MmuStats,
    trace: bool,
}

impl Mmu {
    pub fn new(
        tlbs: TlbHierarchy,
        walker: PageTableWalker,
        pool: SharedWalkerPool,
        range: Option<RangeTranslationUnit>,
        trace: bool,
    ) -> Self {
        let design = if range.is_some() { MmuDesign::Range } else { MmuDesign::Baseline };
        Self { design, tlbs, walker, pool, range, prefetch: None, stats: MmuStats::default(), trace }
    }

    /// Search `queue` after the TLBs miss and fill it from a stride
    /// prefetcher after every demand walk.
    pub fn with_prefetch(mut self, queue: PrefetchQueue) -> Self {
        self.prefetch = Some(queue);
        self
    }

    /// Build an MMU whose walks are admitted through `pool`, which may be
    /// shared with the MMUs of other cores.
    pub fn from_config(config: &MmuConfig, pool: SharedWalkerPool) -> Result<Self, ConfigError> {
        config.validate()?;
        let tlbs = TlbHierarchy::from_config(&config.tlb_levels)?;
        let pwc = if config.pwc.enabled { Some(PageWalkCache::from_config(&config.pwc)?) } else { None };
        let walker = PageTableWalker::new(pwc, config.debug_trace);
        let range = match config.design {
            MmuDesign::Baseline => None,
            MmuDesign::Range => {
                Some(RangeTranslationUnit::from_config(&config.rlb)?.with_trace(config.debug_trace))
            }
        };
        log::info!(
            "[MMU] {:?} design, {} TLB levels, {} walkers, prefetch {}",
            config.design,
            tlbs.num_levels(),
            pool.lock().max_walkers(),
            if config.prefetch.enabled { "on" } else { "off" }
        );
        let mmu = Self::new(tlbs, walker, pool, range, config.debug_trace);
        if config.prefetch.enabled {
            return Ok(mmu.with_prefetch(PrefetchQueue::from_config(&config.prefetch)?));
        }
        Ok(mmu)
    }

    /// Translate one request, advancing `clock` by its latency.
    pub fn translate(
        &mut self,
        req: &TranslationRequest,
        clock: &mut SimClock,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
    ) -> Result<Translation, MmError> {
        let va = req.va;
        let count = req.records_stats();
        let start = clock.now();

        if self.design == MmuDesign::Range {
            find_vma(space.vmas(), va)?;
        }

        let mut fault_stall = None;
        let (ppn, page_size, source) = match self.tlbs.lookup(va, req.kind, count) {
            Some(hit) => {
                let latency = self.tlbs.lookup_latency(req.kind, Some(&hit));
                clock.advance(latency);
                if count {
                    self.stats.tlb_hits += 1;
                    self.stats.total_tlb_latency += latency;
                }
                self.tlbs.fill(va, req.kind, hit.entry.page_size, hit.entry.ppn, Some(hit.level), count);
                (hit.entry.ppn, hit.entry.page_size, TranslationSource::Tlb { level: hit.level })
            }
            None => {
                // The prefetch queue sits behind the last TLB level.
                let mut tlb_latency = self.tlbs.lookup_latency(req.kind, None);
                let queued = match self.prefetch.as_mut() {
                    Some(queue) => {
                        tlb_latency += queue.latency();
                        queue.lookup(va, count)
                    }
                    None => None,
                };
                if count {
                    self.stats.tlb_misses += 1;
                    self.stats.total_tlb_latency += tlb_latency;
                }

                let resolved = if let Some((entry, ready_at)) = queued {
                    clock.advance(tlb_latency);
                    clock.advance_to(ready_at);
                    if count {
                        self.stats.prefetch_hits += 1;
                    }
                    (entry.ppn, entry.page_size, TranslationSource::Prefetch)
                } else {
                    match self.try_range(req, start, tlb_latency, clock, space, mem)? {
                        Some(ppn) => (ppn, PageSize::Base4K, TranslationSource::Range),
                        None => {
                            let (ppn, size, stall) = self.walk(req, clock, space, mem)?;
                            fault_stall = stall;
                            self.prefetch_around(req, clock.now(), space, mem);
                            (ppn, size, TranslationSource::Walk)
                        }
                    }
                };
                self.tlbs.fill(va, req.kind, resolved.1, resolved.0, None, count);
                resolved
            }
        };

        let latency = clock.now().since(start);
        if count {
            self.stats.translations += 1;
            self.stats.total_translation_latency += latency;
        }
        let paddr = physical_address(ppn, page_size, va);
        if self.trace {
            log::trace!(
                "[MMU] core {} {va:#x} -> {paddr:#x} ({page_size}) via {source:?} in {latency}",
                req.core_id
            );
        }
        Ok(Translation { paddr, ppn, page_size, latency, source, fault_stall })
    }

    /// Range path, run alongside the lower TLB levels. A hit costs the first
    /// TLB level plus the range lookup; a miss costs whichever of the full
    /// TLB search and the range lookup is longer.
    fn try_range(
        &mut self,
        req: &TranslationRequest,
        start: SimTime,
        tlb_latency: SimTime,
        clock: &mut SimClock,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
    ) -> Result<Option<u64>, MmError> {
        let count = req.records_stats();
        let Some(unit) = self.range.as_mut() else {
            clock.advance(tlb_latency);
            return Ok(None);
        };
        let table = space.range_table().ok_or(MmError::NoRangeTable)?;
        let resolution = unit.resolve(req.va, start, table, mem, req.core_id, count);
        if count {
            self.stats.total_range_latency += resolution.latency;
        }

        match resolution.range {
            Some(range) => {
                let l1 = self.tlbs.level_latency_of(0, req.kind);
                clock.advance(l1 + resolution.latency);
                if count {
                    self.stats.range_hits += 1;
                }
                range.translate(vpn(req.va)).map(Some).ok_or(MmError::Unmapped(Addr(req.va)))
            }
            None => {
                clock.advance(tlb_latency.max(resolution.latency));
                if count {
                    self.stats.range_misses += 1;
                }
                Ok(None)
            }
        }
    }

    /// Walk path: wait for a walker, walk (faulting if needed) and hold the
    /// walker until the walk completes.
    fn walk(
        &mut self,
        req: &TranslationRequest,
        clock: &mut SimClock,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
    ) -> Result<(u64, PageSize, Option<SimTime>), MmError> {
        let count = req.records_stats();
        let opts = WalkOptions { core_id: req.core_id, count, is_prefetch: false };

        let mut pool = self.pool.lock();
        let request_time = clock.now();
        let delay = pool.slot_delay(request_time);
        let start_time = clock.advance(delay);

        let result = self.walker.walk(req.va, start_time, space, mem, opts)?;
        let completion_time = start_time + result.total();
        pool.occupy(WalkerSlot { request_time, start_time, completion_time });
        drop(pool);
        clock.advance_to(completion_time);

        if count {
            self.stats.walks += 1;
            self.stats.total_walker_delay += delay;
            self.stats.total_walk_latency += result.walk_latency;
            if result.faulted {
                self.stats.page_faults += 1;
                self.stats.total_fault_latency += result.fault_latency;
            }
        }
        let stall = result.faulted.then_some(result.fault_latency);
        Ok((result.ppn, result.page_size, stall))
    }

    /// Walk the prefetcher's candidates around `req.va`, all issued at
    /// `issue` outside the walker pool, and queue the mapped ones.
    fn prefetch_around(
        &mut self,
        req: &TranslationRequest,
        issue: SimTime,
        space: &mut dyn AddressSpace,
        mem: &mut dyn MemoryAccessor,
    ) {
        let Some(queue) = self.prefetch.as_mut() else {
            return;
        };
        let count = req.records_stats();
        for va in queue.candidates(req.va) {
            if queue.contains(va) {
                continue;
            }
            let walked = self.walker.prefetch_walk(va, issue, space, mem, req.core_id);
            queue.record_attempt(walked.is_some(), count);
            if let Some((ppn, size, latency)) = walked {
                queue.insert(TlbEntry::new(va, ppn, size), issue + latency);
            }
        }
    }

    pub fn design(&self) -> MmuDesign {
        self.design
    }

    pub fn tlbs(&self) -> &TlbHierarchy {
        &self.tlbs
    }

    pub fn walker(&self) -> &PageTableWalker {
        &self.walker
    }

    pub fn pool(&self) -> &SharedWalkerPool {
        &self.pool
    }

    pub fn range_unit(&self) -> Option<&RangeTranslationUnit> {
        self.range.as_ref()
    }

    pub fn prefetch_queue(&self) -> Option<&PrefetchQueue> {
        self.prefetch.as_ref()
    }

    pub fn stats(&self) -> MmuStats {
        self.stats
    }

    pub fn report(&self) -> MmuReport {
        MmuReport {
            mmu: self.stats,
            tlbs: self.tlbs.unit_stats(),
            walker: self.walker.stats(),
            walker_pool: self.pool.lock().stats(),
            pwc: self.walker.pwc().map(|p| p.stats().to_vec()).unwrap_or_default(),
            range: self.range.as_ref().map(RangeTranslationUnit::stats),
            rlb: self.range.as_ref().map(RangeTranslationUnit::rlb_stats),
            prefetch: self.prefetch.as_ref().map(PrefetchQueue::stats),
        }
    }
}
