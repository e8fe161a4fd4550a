//! End-of-run statistics.

use serde::Serialize;
use vmsim_mm::allocator::ThpStats;
use vmsim_mm::memory::MemoryStats;
use vmsim_mm::mmu::MmuReport;
use vmsim_mm::os::OsStats;
use vmsim_mm::pagetable::PageTableStats;
use vmsim_mm::{MmuDesign, SimTime};

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub design: MmuDesign,
    pub requests: u64,
    /// Final clock of each core.
    pub cycles: Vec<SimTime>,
    pub fault_stalls: u64,
    pub mmus: Vec<MmuReport>,
    pub allocator: ThpStats,
    pub free_pages: u64,
    pub total_pages: u64,
    pub large_page_ratio: f64,
    pub page_table: PageTableStats,
    pub os: OsStats,
    pub memory: MemoryStats,
}

impl RunReport {
    pub fn print_summary(&self) {
        println!("design            {:?}", self.design);
        println!("requests          {}", self.requests);
        for (core, cycles) in self.cycles.iter().enumerate() {
            println!("core {core:<3}          {cycles}");
        }
        for (core, report) in self.mmus.iter().enumerate() {
            let mmu = &report.mmu;
            println!(
                "mmu {core:<3}           {} hits / {} misses, {} walks, {} faults, avg {:.1} cy",
                mmu.tlb_hits,
                mmu.tlb_misses,
                mmu.walks,
                mmu.page_faults,
                average(mmu.total_translation_latency, mmu.translations)
            );
            for (name, tlb) in &report.tlbs {
                println!("  {name:<16}{} accesses, {} misses", tlb.accesses, tlb.misses);
            }
            if let Some(range) = &report.range {
                println!(
                    "  range           {} rlb hits, {} table hits, {} misses",
                    range.rlb_hits, range.table_hits, range.misses
                );
            }
            if let Some(prefetch) = &report.prefetch {
                println!(
                    "  prefetch        {} walks, {} mapped, {} queue hits",
                    prefetch.attempts, prefetch.successful, prefetch.hits
                );
            }
        }
        println!(
            "allocator         {} 4KB, {} 2MB reserved, {} promoted, {} demoted",
            self.allocator.four_kb_allocated,
            self.allocator.two_mb_reserved,
            self.allocator.two_mb_promoted,
            self.allocator.two_mb_demoted
        );
        println!(
            "memory            {}/{} pages free, large page ratio {:.3}",
            self.free_pages, self.total_pages, self.large_page_ratio
        );
        println!(
            "page table        {} walks, {} faults, {} table frames",
            self.page_table.walks, self.page_table.faults, self.page_table.table_frames
        );
    }
}

fn average(total: SimTime, n: u64) -> f64 {
    if n == 0 { 0.0 } else { total.0 as f64 / n as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_of_nothing_is_zero() {
        assert!(average(SimTime(10), 0).abs() < f64::EPSILON);
        assert!((average(SimTime(10), 4) - 2.5).abs() < f64::EPSILON);
    }
}
