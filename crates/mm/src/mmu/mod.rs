//! Translation coordinator.
//!
//! A request runs TLB lookup, then on a miss the range path (range design
//! only) and the page-table walk, and finally fills the TLB hierarchy. Each
//! step's latency is applied to the request clock exactly once. With a
//! prefetch queue attached, the queue is searched before the range path and
//! every demand walk is followed by prefetch walks of neighbouring pages.

pub mod coordinator;

use serde::{Deserialize, Serialize};

use crate::addr::{PageSize, Pfn};
use crate::range::{RangeUnitStats, RlbStats};
use crate::time::SimTime;
use crate::tlb::{AccessKind, PrefetchStats, TlbStats};
use crate::walker::{PwcLevelStats, WalkerPoolStats, WalkerStats};

pub use coordinator::Mmu;

/// Which translation path an MMU offers besides TLBs and page walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MmuDesign {
    #[default]
    Baseline,
    /// Consult the range unit before walking.
    Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationRequest {
    pub va: u64,
    pub core_id: usize,
    pub kind: AccessKind,
    /// Unmodeled requests (warm-up) run fully but update no statistics.
    pub modeled: bool,
    pub count: bool,
}

impl TranslationRequest {
    pub fn data(va: u64, core_id: usize) -> Self {
        Self { va, core_id, kind: AccessKind::Data, modeled: true, count: true }
    }

    pub fn instruction(va: u64, core_id: usize) -> Self {
        Self { va, core_id, kind: AccessKind::Instruction, modeled: true, count: true }
    }

    pub fn records_stats(&self) -> bool {
        self.modeled && self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationSource {
    Tlb { level: usize },
    Range,
    /// Served by the prefetch queue.
    Prefetch,
    Walk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub paddr: u64,
    /// First 4KB frame of the page holding `paddr`'s translation.
    pub ppn: Pfn,
    pub page_size: PageSize,
    /// Clock advance for this request.
    pub latency: SimTime,
    pub source: TranslationSource,
    /// Set when the request took a page fault; the pipeline should stall
    /// for this long.
    pub fault_stall: Option<SimTime>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MmuStats {
    pub translations: u64,
    pub tlb_hits: u64,
    pub tlb_misses: u64,
    pub range_hits: u64,
    pub range_misses: u64,
    pub prefetch_hits: u64,
    pub walks: u64,
    pub page_faults: u64,
    pub total_tlb_latency: SimTime,
    pub total_range_latency: SimTime,
    pub total_walker_delay: SimTime,
    pub total_walk_latency: SimTime,
    pub total_fault_latency: SimTime,
    pub total_translation_latency: SimTime,
}

/// Everything an MMU counted, for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MmuReport {
    pub mmu: MmuStats,
    pub tlbs: Vec<(String, TlbStats)>,
    pub walker: WalkerStats,
    pub walker_pool: WalkerPoolStats,
    pub pwc: Vec<PwcLevelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range: Option<RangeUnitStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rlb: Option<RlbStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchStats>,
}
