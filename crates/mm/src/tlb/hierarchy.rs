//! Multi-level TLB hierarchy with cascading eviction.
//!
//! Level 0 is closest to the core. Every level may hold several units; the
//! units that take part in an access are those whose capability serves its
//! kind.

use super::{AccessKind, SetAssocTlb, Tlb, TlbEntry, TlbStats};
use crate::addr::{PageSize, Pfn};
use crate::config::TlbUnitConfig;
use crate::error::ConfigError;
use crate::time::SimTime;

/// Where a lookup hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbHit {
    pub level: usize,
    pub unit: usize,
    pub entry: TlbEntry,
}

pub struct TlbHierarchy {
    levels: Vec<Vec<Box<dyn Tlb>>>,
}

impl TlbHierarchy {
    pub fn new(levels: Vec<Vec<Box<dyn Tlb>>>) -> Self {
        Self { levels }
    }

    pub fn from_config(levels: &[Vec<TlbUnitConfig>]) -> Result<Self, ConfigError> {
        let mut built = Vec::with_capacity(levels.len());
        for level in levels {
            let mut units: Vec<Box<dyn Tlb>> = Vec::with_capacity(level.len());
            for unit in level {
                units.push(Box::new(SetAssocTlb::from_config(unit)?));
            }
            built.push(units);
        }
        Ok(Self::new(built))
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn unit(&self, level: usize, unit: usize) -> Option<&dyn Tlb> {
        self.levels.get(level)?.get(unit).map(|t| &**t)
    }

    /// Stats of every unit as `(name, stats)`, level by level.
    pub fn unit_stats(&self) -> Vec<(String, TlbStats)> {
        self.levels
            .iter()
            .flatten()
            .map(|t| (t.name().to_string(), t.stats()))
            .collect()
    }

    /// First unit, in level then declaration order, that serves `kind` and
    /// holds a translation for `va`.
    pub fn lookup(&mut self, va: u64, kind: AccessKind, count: bool) -> Option<TlbHit> {
        for (level, units) in self.levels.iter_mut().enumerate() {
            for (unit, tlb) in units.iter_mut().enumerate() {
                if !tlb.capability().serves(kind) {
                    continue;
                }
                if let Some(entry) = tlb.lookup(va, count) {
                    return Some(TlbHit { level, unit, entry });
                }
            }
        }
        None
    }

    /// Latency charged for a lookup that ended in `hit`.
    ///
    /// Levels are searched one after another and units within a level in
    /// parallel, so each level fully searched costs its slowest unit.
    pub fn lookup_latency(&self, kind: AccessKind, hit: Option<&TlbHit>) -> SimTime {
        let searched = hit.map_or(self.levels.len(), |h| h.level);
        let below: SimTime = self.levels[..searched]
            .iter()
            .map(|units| Self::level_latency(units, kind))
            .sum();
        let hit_latency = hit
            .and_then(|h| self.unit(h.level, h.unit))
            .map_or(SimTime::ZERO, |t| t.latency());
        below + hit_latency
    }

    /// Latency of searching one level for `kind`.
    pub fn level_latency_of(&self, level: usize, kind: AccessKind) -> SimTime {
        self.levels
            .get(level)
            .map_or(SimTime::ZERO, |units| Self::level_latency(units, kind))
    }

    fn level_latency(units: &[Box<dyn Tlb>], kind: AccessKind) -> SimTime {
        units
            .iter()
            .filter(|t| t.capability().serves(kind))
            .map(|t| t.latency())
            .max()
            .unwrap_or(SimTime::ZERO)
    }

    /// Install a resolved translation and cascade evictions downwards.
    ///
    /// At each level, entries evicted from the level above are offered
    /// first to every unit that supports their page size. The new
    /// translation is then allocated in allocate-on-miss units at levels
    /// above the hit level (or everywhere on a miss).
    pub fn fill(
        &mut self,
        va: u64,
        kind: AccessKind,
        page_size: PageSize,
        ppn: Pfn,
        hit_level: Option<usize>,
        count: bool,
    ) {
        let entry = TlbEntry::new(va, ppn, page_size);
        let mut pending: Vec<TlbEntry> = Vec::new();

        for (level, units) in self.levels.iter_mut().enumerate() {
            let mut evicted = Vec::new();
            let allocate_here = hit_level.is_none_or(|h| h > level);

            for tlb in units.iter_mut().filter(|t| t.capability().serves(kind)) {
                for victim in &pending {
                    if tlb.supports_page_size(victim.page_size) {
                        evicted.extend(tlb.allocate(*victim, count));
                    }
                }
                if allocate_here && tlb.allocate_on_miss() && tlb.supports_page_size(page_size) {
                    evicted.extend(tlb.allocate(entry, count));
                }
            }
            pending = evicted;
        }
    }
}
