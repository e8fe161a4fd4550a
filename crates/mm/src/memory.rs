//! Memory models answering the walker's and range unit's accesses.

use serde::Serialize;

use crate::cache::SetAssocArray;
use crate::config::MemoryConfig;
use crate::time::SimTime;
use crate::traits::{AccessSource, MemoryAccess, MemoryAccessor};

const LINE_SHIFT: u32 = 6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub page_table_accesses: u64,
    pub range_table_accesses: u64,
    pub hits: u64,
    pub misses: u64,
}

impl MemoryStats {
    fn record(&mut self, access: &MemoryAccess, hit: bool) {
        if !access.count {
            return;
        }
        match access.source {
            AccessSource::PageTable => self.page_table_accesses += 1,
            AccessSource::RangeTable => self.range_table_accesses += 1,
        }
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

/// Every access costs the same.
pub struct FixedLatencyMemory {
    latency: SimTime,
    stats: MemoryStats,
}

impl FixedLatencyMemory {
    pub fn new(latency: SimTime) -> Self {
        Self { latency, stats: MemoryStats::default() }
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }
}

impl MemoryAccessor for FixedLatencyMemory {
    fn access(&mut self, access: &MemoryAccess, _issue: SimTime) -> SimTime {
        self.stats.record(access, false);
        self.latency
    }
}

/// One level of 64-byte lines with LRU replacement in front of DRAM.
pub struct LineCacheMemory {
    lines: SetAssocArray<u64, ()>,
    hit_latency: SimTime,
    miss_latency: SimTime,
    stats: MemoryStats,
}

impl LineCacheMemory {
    pub fn new(entries: usize, ways: usize, hit_latency: SimTime, miss_latency: SimTime) -> Self {
        Self {
            lines: SetAssocArray::new(entries, ways),
            hit_latency,
            miss_latency,
            stats: MemoryStats::default(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }
}

impl MemoryAccessor for LineCacheMemory {
    fn access(&mut self, access: &MemoryAccess, _issue: SimTime) -> SimTime {
        let line = access.paddr >> LINE_SHIFT;
        let set = self.lines.set_index(line);
        let hit = self.lines.lookup(set, line).is_some();
        if !hit {
            self.lines.insert(set, line, ());
        }
        self.stats.record(access, hit);
        if hit { self.hit_latency } else { self.miss_latency }
    }
}

/// Either model, picked by configuration.
pub enum MemoryModel {
    Fixed(FixedLatencyMemory),
    LineCache(LineCacheMemory),
}

impl MemoryModel {
    pub fn from_config(config: &MemoryConfig) -> Self {
        if config.cache_lines == 0 {
            MemoryModel::Fixed(FixedLatencyMemory::new(SimTime(config.dram_latency)))
        } else {
            MemoryModel::LineCache(LineCacheMemory::new(
                config.cache_lines,
                config.cache_associativity,
                SimTime(config.cache_latency),
                SimTime(config.dram_latency),
            ))
        }
    }

    pub fn stats(&self) -> MemoryStats {
        match self {
            MemoryModel::Fixed(m) => m.stats(),
            MemoryModel::LineCache(m) => m.stats(),
        }
    }
}

impl MemoryAccessor for MemoryModel {
    fn access(&mut self, access: &MemoryAccess, issue: SimTime) -> SimTime {
        match self {
            MemoryModel::Fixed(m) => m.access(access, issue),
            MemoryModel::LineCache(m) => m.access(access, issue),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(paddr: u64) -> MemoryAccess {
        MemoryAccess { paddr, core_id: 0, source: AccessSource::PageTable, count: true }
    }

    #[test]
    fn test_line_cache_hits_same_line() {
        let mut mem = LineCacheMemory::new(64, 4, SimTime(4), SimTime(200));
        assert_eq!(mem.access(&pt(0x1000), SimTime::ZERO), SimTime(200));
        assert_eq!(mem.access(&pt(0x1038), SimTime::ZERO), SimTime(4));
        assert_eq!(mem.access(&pt(0x1040), SimTime::ZERO), SimTime(200));
        assert_eq!(mem.stats().hits, 1);
        assert_eq!(mem.stats().page_table_accesses, 3);
    }

    #[test]
    fn test_fixed_latency() {
        let mut mem = FixedLatencyMemory::new(SimTime(90));
        let range = MemoryAccess { source: AccessSource::RangeTable, count: false, ..pt(0) };
        assert_eq!(mem.access(&range, SimTime(5)), SimTime(90));
        assert_eq!(mem.stats(), MemoryStats::default());
    }

    #[test]
    fn test_model_from_config() {
        let config = MemoryConfig { cache_lines: 0, ..MemoryConfig::default() };
        assert!(matches!(MemoryModel::from_config(&config), MemoryModel::Fixed(_)));
        assert!(matches!(MemoryModel::from_config(&MemoryConfig::default()), MemoryModel::LineCache(_)));
    }
}
