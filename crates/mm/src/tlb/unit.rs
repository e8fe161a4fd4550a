use super::{Tlb, TlbCapability, TlbEntry, TlbStats};
use crate::addr::{PageSize, PageSizes, Pfn};
use crate::cache::SetAssocArray;
use crate::config::TlbUnitConfig;
use crate::error::ConfigError;
use crate::time::SimTime;

/// Set-associative TLB holding one or more page sizes in a shared array.
///
/// Entries are tagged with their page size, so a 4KB and a 2MB translation
/// with the same virtual page number never alias.
pub struct SetAssocTlb {
    name: String,
    capability: TlbCapability,
    latency: SimTime,
    page_sizes: PageSizes,
    allocate_on_miss: bool,
    array: SetAssocArray<(u64, PageSize), Pfn>,
    stats: TlbStats,
}

impl SetAssocTlb {
    pub fn new(
        name: impl Into<String>,
        capability: TlbCapability,
        entries: usize,
        associativity: usize,
        latency: SimTime,
        page_sizes: &[PageSize],
        allocate_on_miss: bool,
    ) -> Self {
        Self {
            name: name.into(),
            capability,
            latency,
            page_sizes: PageSizes::from_sizes(page_sizes),
            allocate_on_miss,
            array: SetAssocArray::new(entries, associativity),
            stats: TlbStats::default(),
        }
    }

    pub fn from_config(config: &TlbUnitConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(
            config.name.clone(),
            config.capability,
            config.entries,
            config.associativity,
            SimTime(config.latency),
            &config.page_sizes,
            config.allocate_on_miss,
        ))
    }

    pub fn occupancy(&self) -> usize {
        self.array.len()
    }

    fn slot(&self, va: u64, size: PageSize) -> (usize, (u64, PageSize)) {
        let vpn = va >> size.shift();
        (self.array.set_index(vpn), (vpn, size))
    }
}

impl Tlb for SetAssocTlb {
    fn name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> TlbCapability {
        self.capability
    }

    fn latency(&self) -> SimTime {
        self.latency
    }

    fn supports_page_size(&self, size: PageSize) -> bool {
        self.page_sizes.supports(size)
    }

    fn allocate_on_miss(&self) -> bool {
        self.allocate_on_miss
    }

    fn lookup(&mut self, va: u64, count: bool) -> Option<TlbEntry> {
        if count {
            self.stats.accesses += 1;
        }
        for size in PageSize::ALL {
            if !self.page_sizes.supports(size) {
                continue;
            }
            let (set, key) = self.slot(va, size);
            if let Some(ppn) = self.array.lookup(set, key) {
                if count {
                    self.stats.hits += 1;
                }
                return Some(TlbEntry::new(va, ppn, size));
            }
        }
        if count {
            self.stats.misses += 1;
        }
        None
    }

    fn allocate(&mut self, entry: TlbEntry, count: bool) -> Option<TlbEntry> {
        if !self.page_sizes.supports(entry.page_size) {
            return None;
        }
        let (set, key) = self.slot(entry.vpage, entry.page_size);
        let evicted = self.array.insert(set, key, entry.ppn);
        if count {
            self.stats.allocations += 1;
            if evicted.is_some() {
                self.stats.evictions += 1;
            }
        }
        evicted.map(|((vpn, size), ppn)| TlbEntry { vpage: vpn << size.shift(), ppn, page_size: size })
    }

    fn stats(&self) -> TlbStats {
        self.stats
    }
}
