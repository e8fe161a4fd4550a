//! Range path of the MMU: RLB first, range table on a miss.

use serde::Serialize;

use super::{RangeEntry, RangeLookasideBuffer, RlbStats};
use crate::config::RlbConfig;
use crate::error::ConfigError;
use crate::time::SimTime;
use crate::traits::{AccessSource, MemoryAccess, MemoryAccessor, RangeTable};

/// Result of resolving one address on the range path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeResolution {
    pub latency: SimTime,
    /// Covering range, `None` when neither the RLB nor the table has one.
    pub range: Option<RangeEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RangeUnitStats {
    pub resolutions: u64,
    pub rlb_hits: u64,
    pub table_hits: u64,
    pub misses: u64,
    pub table_accesses: u64,
    pub total_latency: SimTime,
}

pub struct RangeTranslationUnit {
    rlb: RangeLookasideBuffer,
    stats: RangeUnitStats,
    trace: bool,
}

impl RangeTranslationUnit {
    pub fn new(rlb: RangeLookasideBuffer) -> Self {
        Self { rlb, stats: RangeUnitStats::default(), trace: false }
    }

    /// Log every table search at trace level.
    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn from_config(config: &RlbConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(RangeLookasideBuffer::new(
            config.entries,
            SimTime(config.latency),
            config.seed,
        )))
    }

    /// Resolve `va` starting at `now`.
    ///
    /// An RLB hit costs the RLB latency. On a miss the table is searched and
    /// each visited key is one memory access, issued back to back after the
    /// RLB lookup; a found range is then cached in the RLB.
    pub fn resolve(
        &mut self,
        va: u64,
        now: SimTime,
        table: &dyn RangeTable,
        mem: &mut dyn MemoryAccessor,
        core_id: usize,
        count: bool,
    ) -> RangeResolution {
        let mut latency = self.rlb.latency();
        if count {
            self.stats.resolutions += 1;
        }

        if let Some(range) = self.rlb.access(va, count) {
            if count {
                self.stats.rlb_hits += 1;
                self.stats.total_latency += latency;
            }
            return RangeResolution { latency, range: Some(range) };
        }

        let lookup = table.lookup(va);
        for &paddr in &lookup.visited {
            let access = MemoryAccess { paddr, core_id, source: AccessSource::RangeTable, count };
            latency += mem.access(&access, now + latency);
        }

        if let Some(range) = lookup.entry {
            self.rlb.insert(range);
        }
        if count {
            self.stats.table_accesses += lookup.visited.len() as u64;
            self.stats.total_latency += latency;
            match lookup.entry {
                Some(_) => self.stats.table_hits += 1,
                None => self.stats.misses += 1,
            }
        }
        if self.trace {
            log::trace!("[RANGE] {va:#x} {:?} after {} table accesses", lookup.entry, lookup.visited.len());
        }

        RangeResolution { latency, range: lookup.entry }
    }

    pub fn rlb(&self) -> &RangeLookasideBuffer {
        &self.rlb
    }

    pub fn rlb_stats(&self) -> RlbStats {
        self.rlb.stats()
    }

    pub fn stats(&self) -> RangeUnitStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::{PAGE_SHIFT, Pfn};
    use crate::error::MmError;
    use crate::range::BTreeRangeTable;

    struct FlatMemory(Vec<(u64, SimTime)>);

    impl MemoryAccessor for FlatMemory {
        fn access(&mut self, access: &MemoryAccess, issue: SimTime) -> SimTime {
            assert_eq!(access.source, AccessSource::RangeTable);
            self.0.push((access.paddr, issue));
            SimTime(20)
        }
    }

    fn table() -> BTreeRangeTable {
        let mut table = BTreeRangeTable::new(2);
        let mut next: Pfn = 0x40;
        let mut frames = || -> Result<Pfn, MmError> {
            next += 1;
            Ok(next)
        };
        for i in 0..3u64 {
            table
                .insert(RangeEntry::new(i * 0x200, i * 0x200 + 0x100, 0x8000 + i * 0x100), &mut frames)
                .unwrap();
        }
        table
    }

    fn unit() -> RangeTranslationUnit {
        RangeTranslationUnit::new(RangeLookasideBuffer::new(8, SimTime(3), 42))
    }

    /// Tests: [R1] table hit charges serialized key accesses and fills the RLB
    #[test]
    fn test_table_hit_fills_rlb() {
        let table = table();
        let mut unit = unit();
        let mut mem = FlatMemory(Vec::new());
        let va = (0x210 << PAGE_SHIFT) | 0x123;

        let first = unit.resolve(va, SimTime(100), &table, &mut mem, 0, true);
        assert_eq!(first.range, Some(RangeEntry::new(0x200, 0x300, 0x8100)));
        let keys = mem.0.len() as u64;
        assert!(keys >= 1);
        assert_eq!(first.latency, SimTime(3 + 20 * keys));
        // Accesses are serialized after the RLB lookup
        assert_eq!(mem.0[0].1, SimTime(103));
        if keys > 1 {
            assert_eq!(mem.0[1].1, SimTime(123));
        }
        assert_eq!(unit.rlb().len(), 1);

        let second = unit.resolve(va, SimTime(200), &table, &mut mem, 0, true);
        assert_eq!(second, RangeResolution { latency: SimTime(3), range: first.range });
        assert_eq!(mem.0.len() as u64, keys);
        assert_eq!(unit.stats().rlb_hits, 1);
    }

    /// Tests: [R2] a true miss returns no range and leaves the RLB untouched
    #[test]
    fn test_true_miss_skips_rlb_insertion() {
        let table = table();
        let mut unit = unit();
        let mut mem = FlatMemory(Vec::new());
        let r = unit.resolve(0x150 << PAGE_SHIFT, SimTime::ZERO, &table, &mut mem, 0, true);
        assert_eq!(r.range, None);
        assert!(unit.rlb().is_empty());
        assert_eq!(unit.stats().misses, 1);
        assert_eq!(unit.rlb_stats().insertions, 0);
    }

    #[test]
    fn test_uncounted_resolution_keeps_stats() {
        let table = table();
        let mut unit = unit();
        let mut mem = FlatMemory(Vec::new());
        unit.resolve(0, SimTime::ZERO, &table, &mut mem, 0, false);
        assert_eq!(unit.stats(), RangeUnitStats::default());
        assert_eq!(unit.rlb().len(), 1);
    }
}
