//! Stride prefetching into a small prefetch queue.
//!
//! After a demand walk the prefetcher names the pages within `length` pages
//! of the missing one. Each is walked off the critical path and, if mapped,
//! lands in the queue tagged with the time its walk completes. The queue is
//! searched after the TLB hierarchy misses and is never filled by demand
//! translations.

use serde::Serialize;

use super::TlbEntry;
use crate::addr::{PAGE_SHIFT, PageSize, Pfn, vpn};
use crate::cache::SetAssocArray;
use crate::config::PrefetchConfig;
use crate::error::ConfigError;
use crate::time::SimTime;

/// Neighbouring-page prefetcher: `vpn - length ..= vpn + length`, the
/// missing page itself excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StridePrefetcher {
    length: u64,
}

impl StridePrefetcher {
    pub fn new(length: u64) -> Self {
        Self { length }
    }

    /// Page-aligned addresses to prefetch after a miss on `va`, nearest
    /// first, lower page before upper.
    pub fn candidates(&self, va: u64) -> impl Iterator<Item = u64> + use<> {
        let page = vpn(va);
        (1..=self.length)
            .flat_map(move |d| [page.checked_sub(d), page.checked_add(d)])
            .flatten()
            .map(|p| p << PAGE_SHIFT)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchStats {
    pub attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub lookups: u64,
    pub hits: u64,
}

/// Fully associative LRU queue of prefetched translations.
pub struct PrefetchQueue {
    prefetcher: StridePrefetcher,
    latency: SimTime,
    array: SetAssocArray<(u64, PageSize), (Pfn, SimTime)>,
    stats: PrefetchStats,
}

impl PrefetchQueue {
    pub fn new(entries: usize, latency: SimTime, length: u64) -> Self {
        Self {
            prefetcher: StridePrefetcher::new(length),
            latency,
            array: SetAssocArray::new(entries, entries),
            stats: PrefetchStats::default(),
        }
    }

    pub fn from_config(config: &PrefetchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(config.entries, SimTime(config.latency), config.length))
    }

    pub fn latency(&self) -> SimTime {
        self.latency
    }

    pub fn candidates(&self, va: u64) -> impl Iterator<Item = u64> + use<> {
        self.prefetcher.candidates(va)
    }

    /// Look up `va`, returning the translation and the time it became
    /// available.
    pub fn lookup(&mut self, va: u64, count: bool) -> Option<(TlbEntry, SimTime)> {
        if count {
            self.stats.lookups += 1;
        }
        let hit = PageSize::ALL.into_iter().find_map(|size| {
            let (ppn, ready_at) = self.array.lookup(0, (va >> size.shift(), size))?;
            Some((TlbEntry::new(va, ppn, size), ready_at))
        });
        if count && hit.is_some() {
            self.stats.hits += 1;
        }
        hit
    }

    /// Whether a translation of `va` is already queued.
    pub fn contains(&self, va: u64) -> bool {
        PageSize::ALL
            .into_iter()
            .any(|size| self.array.peek(0, (va >> size.shift(), size)).is_some())
    }

    /// Queue a prefetched translation that becomes usable at `ready_at`.
    pub fn insert(&mut self, entry: TlbEntry, ready_at: SimTime) {
        let key = (entry.vpage >> entry.page_size.shift(), entry.page_size);
        self.array.insert(0, key, (entry.ppn, ready_at));
    }

    /// Count one prefetch walk and whether it found a mapping.
    pub fn record_attempt(&mut self, mapped: bool, count: bool) {
        if !count {
            return;
        }
        self.stats.attempts += 1;
        if mapped {
            self.stats.successful += 1;
        } else {
            self.stats.failed += 1;
        }
    }

    pub fn occupancy(&self) -> usize {
        self.array.len()
    }

    pub fn stats(&self) -> PrefetchStats {
        self.stats
    }
}
