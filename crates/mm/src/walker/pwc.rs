//! Page-walk caches for the upper levels of a radix table.

use serde::Serialize;

use crate::cache::SetAssocArray;
use crate::config::PwcConfig;
use crate::error::ConfigError;

/// PTE granularity the caches are indexed by.
const LINE_SHIFT: u32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PwcLevelStats {
    pub accesses: u64,
    pub misses: u64,
}

/// One small cache per radix level `0..levels`; deeper levels are never
/// cached.
pub struct PageWalkCache {
    levels: Vec<SetAssocArray<u64, ()>>,
    stats: Vec<PwcLevelStats>,
}

impl PageWalkCache {
    /// `geometry[i]` is `(entries, associativity)` for level `i`.
    pub fn new(geometry: &[(usize, usize)]) -> Self {
        Self {
            levels: geometry.iter().map(|&(e, a)| SetAssocArray::new(e, a)).collect(),
            stats: vec![PwcLevelStats::default(); geometry.len()],
        }
    }

    pub fn from_config(config: &PwcConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let geometry: Vec<(usize, usize)> = config
            .entries
            .iter()
            .copied()
            .zip(config.associativity.iter().copied())
            .collect();
        Ok(Self::new(&geometry))
    }

    /// Number of radix levels covered.
    pub fn levels(&self) -> usize {
        self.levels.len()
    }

    /// Look up the entry at `paddr`, inserting it on a miss.
    /// Levels past the cached range always miss and are not counted.
    pub fn lookup(&mut self, paddr: u64, level: usize, count: bool) -> bool {
        let Some(cache) = self.levels.get_mut(level) else {
            return false;
        };
        let line = paddr >> LINE_SHIFT;
        let set = cache.set_index(line);
        let hit = cache.lookup(set, line).is_some();
        if !hit {
            cache.insert(set, line, ());
        }
        if count {
            self.stats[level].accesses += 1;
            if !hit {
                self.stats[level].misses += 1;
            }
        }
        hit
    }

    pub fn stats(&self) -> &[PwcLevelStats] {
        &self.stats
    }
}
