//! Range lookaside buffer.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;

use super::RangeEntry;
use crate::addr::PAGE_SHIFT;
use crate::time::SimTime;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RlbStats {
    pub accesses: u64,
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

/// Fully associative cache of range entries. Replacement picks a random
/// victim other than the most recently hit entry.
pub struct RangeLookasideBuffer {
    entries: Vec<RangeEntry>,
    capacity: usize,
    latency: SimTime,
    mru: Option<usize>,
    rng: StdRng,
    stats: RlbStats,
}

impl RangeLookasideBuffer {
    pub fn new(capacity: usize, latency: SimTime, seed: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            latency,
            mru: None,
            rng: StdRng::seed_from_u64(seed),
            stats: RlbStats::default(),
        }
    }

    pub fn latency(&self) -> SimTime {
        self.latency
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Range covering `va`, if cached.
    pub fn access(&mut self, va: u64, count: bool) -> Option<RangeEntry> {
        let vpn = va >> PAGE_SHIFT;
        let hit = self.entries.iter().position(|r| r.contains(vpn));
        if count {
            self.stats.accesses += 1;
            match hit {
                Some(_) => self.stats.hits += 1,
                None => self.stats.misses += 1,
            }
        }
        let idx = hit?;
        self.mru = Some(idx);
        Some(self.entries[idx])
    }

    /// Cache `entry`, evicting a random non-MRU entry when full.
    pub fn insert(&mut self, entry: RangeEntry) -> Option<RangeEntry> {
        self.stats.insertions += 1;
        let mut evicted = None;
        if self.entries.len() == self.capacity {
            let victim = self.pick_victim();
            evicted = Some(self.entries.remove(victim));
            self.stats.evictions += 1;
            self.mru = match self.mru {
                Some(m) if m == victim => None,
                Some(m) if m > victim => Some(m - 1),
                other => other,
            };
        }
        self.entries.push(entry);
        evicted
    }

    fn pick_victim(&mut self) -> usize {
        if self.capacity == 1 {
            return 0;
        }
        loop {
            let candidate = self.rng.gen_range(0..self.entries.len());
            if Some(candidate) != self.mru {
                return candidate;
            }
        }
    }

    pub fn entries(&self) -> &[RangeEntry] {
        &self.entries
    }

    pub fn stats(&self) -> RlbStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(i: u64) -> RangeEntry {
        RangeEntry::new(i * 0x100, i * 0x100 + 0x10, 0x1000 + i * 0x10)
    }

    #[test]
    fn test_hit_and_miss() {
        let mut rlb = RangeLookasideBuffer::new(4, SimTime(2), 1);
        assert_eq!(rlb.access(0x10_0000, true), None);
        rlb.insert(range(1));
        assert_eq!(rlb.access(0x10_5000, true), Some(range(1)));
        assert_eq!(rlb.access(0x11_0000, true), None);
        let stats = rlb.stats();
        assert_eq!((stats.accesses, stats.hits, stats.misses), (3, 1, 2));
    }

    #[test]
    fn test_eviction_spares_mru() {
        for seed in 0..32 {
            let mut rlb = RangeLookasideBuffer::new(2, SimTime(2), seed);
            rlb.insert(range(0));
            rlb.insert(range(1));
            rlb.access(range(0).vpn_start << PAGE_SHIFT, false);
            assert_eq!(rlb.insert(range(2)), Some(range(1)));
            assert_eq!(rlb.len(), 2);
        }
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut rlb = RangeLookasideBuffer::new(3, SimTime(2), 7);
        for i in 0..20 {
            rlb.insert(range(i));
            rlb.access(range(i).vpn_start << PAGE_SHIFT, true);
            assert!(rlb.len() <= 3);
        }
        assert_eq!(rlb.stats().evictions, 17);
        // Most recent insertion was hit and survives the next eviction
        rlb.insert(range(99));
        assert!(rlb.entries().contains(&range(19)));
    }

    #[test]
    fn test_single_entry_replaces() {
        let mut rlb = RangeLookasideBuffer::new(1, SimTime(2), 0);
        rlb.insert(range(0));
        rlb.access(0, false);
        assert_eq!(rlb.insert(range(1)), Some(range(0)));
        assert_eq!(rlb.entries(), [range(1)]);
    }
}
