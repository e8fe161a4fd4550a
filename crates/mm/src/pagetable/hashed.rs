//! Hashed page table: one open-addressed table per page size.
//!
//! A walk searches every table; the tables are independent, so the timing
//! engine lets them proceed in parallel. Slot `n` of a table's search is reported
//! as level `n`.

use vmsim_utils::HashMap;

use super::{PageTableKind, PageTableStats, WalkAccess, WalkTrace};
use crate::addr::{PageSize, Pfn};
use crate::error::{Addr, MmError};
use crate::traits::PageTable;

/// Bytes per hashed entry: tag plus frame.
pub const ENTRY_BYTES: u64 = 16;

struct HashTable {
    size: PageSize,
    base_paddr: u64,
    slots: usize,
    /// Occupied slots only; absent means empty.
    entries: HashMap<usize, (u64, Pfn)>,
}

impl HashTable {
    fn home(&self, vpn: u64) -> usize {
        (vpn.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 17) as usize % self.slots
    }

    fn slot_paddr(&self, slot: usize) -> u64 {
        self.base_paddr + slot as u64 * ENTRY_BYTES
    }

    /// Linear search sequence from the home slot, at most one full lap.
    fn slots(&self, vpn: u64) -> impl Iterator<Item = usize> + '_ {
        let home = self.home(vpn);
        (0..self.slots).map(move |step| (home + step) % self.slots)
    }
}

pub struct HashedPageTable {
    tables: Vec<HashTable>,
    stats: PageTableStats,
}

impl HashedPageTable {
    /// One table per entry of `sizes`, each `slots` entries long, laid out
    /// back to back from `base_paddr`.
    pub fn new(sizes: &[PageSize], slots: usize, base_paddr: u64) -> Self {
        let slots = slots.max(1);
        let tables = sizes
            .iter()
            .enumerate()
            .map(|(i, &size)| HashTable {
                size,
                base_paddr: base_paddr + (i * slots) as u64 * ENTRY_BYTES,
                slots,
                entries: HashMap::new(),
            })
            .collect();
        Self { tables, stats: PageTableStats::default() }
    }

    /// Bytes of simulated memory the tables occupy.
    pub fn footprint(sizes: usize, slots: usize) -> u64 {
        (sizes * slots) as u64 * ENTRY_BYTES
    }
}

impl PageTable for HashedPageTable {
    fn kind(&self) -> PageTableKind {
        PageTableKind::Hashed
    }

    fn max_level(&self) -> usize {
        self.tables.iter().map(|t| t.entries.len() + 1).max().unwrap_or(1)
    }

    fn supports_page_size(&self, size: PageSize) -> bool {
        self.tables.iter().any(|t| t.size == size)
    }

    fn initialize_walk(&mut self, va: u64, count: bool, is_prefetch: bool) -> WalkTrace {
        let mut trace = WalkTrace::default();

        for (table_idx, table) in self.tables.iter().enumerate() {
            let vpn = va >> table.size.shift();
            for (level, slot) in table.slots(vpn).enumerate() {
                let paddr = table.slot_paddr(slot);
                match table.entries.get(&slot) {
                    Some(&(tag, ppn)) if tag == vpn => {
                        trace.accesses.push(WalkAccess { table: table_idx, level, paddr, is_final: true });
                        if trace.translation.is_none() {
                            trace.translation = Some((ppn, table.size));
                        }
                        break;
                    }
                    Some(_) => {
                        trace.accesses.push(WalkAccess { table: table_idx, level, paddr, is_final: false });
                    }
                    None => {
                        trace.accesses.push(WalkAccess { table: table_idx, level, paddr, is_final: false });
                        break;
                    }
                }
            }
        }

        if count && !is_prefetch {
            self.stats.walks += 1;
            if trace.is_fault() {
                self.stats.faults += 1;
            }
        }
        trace
    }

    fn map(
        &mut self,
        va: u64,
        ppn: Pfn,
        size: PageSize,
        _frames: &mut dyn FnMut() -> Result<Pfn, MmError>,
    ) -> Result<(), MmError> {
        let Some(table) = self.tables.iter_mut().find(|t| t.size == size) else {
            return Err(MmError::Unmapped(Addr(va)));
        };
        let vpn = va >> size.shift();
        let slot = table
            .slots(vpn)
            .find(|s| table.entries.get(s).is_none_or(|&(tag, _)| tag == vpn));
        let Some(slot) = slot else {
            log::warn!("[HPT] {size} table full mapping {va:#x}");
            return Err(MmError::OutOfMemory);
        };
        table.entries.insert(slot, (vpn, ppn));
        self.stats.record_map(size);
        Ok(())
    }

    fn unmap(&mut self, va: u64) -> bool {
        // Unmapped slots keep an impossible tag so searches walk past them.
        for table in &mut self.tables {
            let vpn = va >> table.size.shift();
            let found = table
                .slots(vpn)
                .take_while(|s| table.entries.contains_key(s))
                .find(|s| table.entries.get(s).is_some_and(|&(tag, _)| tag == vpn));
            if let Some(slot) = found {
                table.entries.insert(slot, (u64::MAX, 0));
                return true;
            }
        }
        false
    }

    fn stats(&self) -> PageTableStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_frames() -> impl FnMut() -> Result<Pfn, MmError> {
        || Err(MmError::OutOfMemory)
    }

    #[test]
    fn test_walk_searches_every_table() {
        let mut pt = HashedPageTable::new(&[PageSize::Base4K, PageSize::Huge2M], 64, 0x10_0000);
        let trace = pt.initialize_walk(0x5000, true, false);
        assert!(trace.is_fault());
        let tables: Vec<usize> = trace.accesses.iter().map(|a| a.table).collect();
        assert_eq!(tables, [0, 1]);
        assert!(trace.accesses[1].paddr >= 0x10_0000 + 64 * ENTRY_BYTES);
    }

    #[test]
    fn test_map_and_find_in_size_table() {
        let mut pt = HashedPageTable::new(&[PageSize::Base4K, PageSize::Huge2M], 64, 0);
        pt.map(0x40_0000, 1024, PageSize::Huge2M, &mut no_frames()).unwrap();
        let trace = pt.initialize_walk(0x41_2345, true, false);
        assert_eq!(trace.translation, Some((1024, PageSize::Huge2M)));
        let finals: Vec<&WalkAccess> = trace.accesses.iter().filter(|a| a.is_final).collect();
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].table, 1);
    }

    #[test]
    fn test_collisions_extend_search_chain() {
        // Small table: neighbouring pages share search chains
        let mut pt = HashedPageTable::new(&[PageSize::Base4K], 4, 0);
        for i in 0..3u64 {
            pt.map(i << 12, 10 + i, PageSize::Base4K, &mut no_frames()).unwrap();
        }
        let trace = pt.initialize_walk(2 << 12, true, false);
        assert_eq!(trace.translation, Some((12, PageSize::Base4K)));
        assert!(trace.accesses.iter().all(|a| a.table == 0));
        assert_eq!(trace.accesses.last().map(|a| a.is_final), Some(true));
    }

    #[test]
    fn test_full_table_rejects_mapping() {
        let mut pt = HashedPageTable::new(&[PageSize::Base4K], 2, 0);
        pt.map(0x1000, 1, PageSize::Base4K, &mut no_frames()).unwrap();
        pt.map(0x2000, 2, PageSize::Base4K, &mut no_frames()).unwrap();
        assert_eq!(
            pt.map(0x3000, 3, PageSize::Base4K, &mut no_frames()),
            Err(MmError::OutOfMemory)
        );
    }

    #[test]
    fn test_unmap_keeps_chain_walkable() {
        let mut pt = HashedPageTable::new(&[PageSize::Base4K], 4, 0);
        pt.map(0x1000, 1, PageSize::Base4K, &mut no_frames()).unwrap();
        pt.map(0x2000, 2, PageSize::Base4K, &mut no_frames()).unwrap();
        assert!(pt.unmap(0x1000));
        assert!(pt.initialize_walk(0x1000, false, false).is_fault());
        assert_eq!(
            pt.initialize_walk(0x2000, false, false).translation,
            Some((2, PageSize::Base4K))
        );
    }
}
