//! Simulation configuration.
//!
//! Every section deserializes with defaults for missing fields, so a TOML
//! file only needs to name what it changes. `validate` rejects geometry the
//! models cannot be built from.

use serde::{Deserialize, Serialize};

use crate::addr::{HUGE_ORDER, PageSize};
use crate::allocator::FragmentationMetric;
use crate::allocator::buddy::DEFAULT_MAX_ORDER;
use crate::error::ConfigError;
use crate::mmu::MmuDesign;
use crate::pagetable::PageTableKind;
use crate::tlb::TlbCapability;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub mmu: MmuConfig,
    #[serde(default)]
    pub os: OsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
}

impl SimConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.allocator.validate()?;
        self.mmu.validate()?;
        self.os.validate()?;
        self.memory.validate()?;
        if self.mmu.design == MmuDesign::Range && !self.os.range_table {
            return Err(ConfigError::Range("range design needs os.range_table = true"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_memory_size_mb")]
    pub memory_size_mb: u64,
    #[serde(default = "default_kernel_size_mb")]
    pub kernel_size_mb: u64,
    #[serde(default = "default_max_order")]
    pub max_order: usize,
    #[serde(default = "default_threshold")]
    pub threshold_for_promotion: f64,
    #[serde(default)]
    pub fragmentation_metric: FragmentationMetric,
    /// Fragment free memory down to this metric value before the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fragmentation_target: Option<f64>,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        AllocatorConfig {
            memory_size_mb: default_memory_size_mb(),
            kernel_size_mb: default_kernel_size_mb(),
            max_order: default_max_order(),
            threshold_for_promotion: default_threshold(),
            fragmentation_metric: FragmentationMetric::default(),
            fragmentation_target: None,
        }
    }
}

impl AllocatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_order < HUGE_ORDER {
            return Err(ConfigError::Allocator("max_order too small for 2MB blocks"));
        }
        if self.kernel_size_mb >= self.memory_size_mb {
            return Err(ConfigError::Allocator("kernel reservation covers all memory"));
        }
        if !(0.0..=1.0).contains(&self.threshold_for_promotion) {
            return Err(ConfigError::Allocator("promotion threshold outside [0, 1]"));
        }
        if self.fragmentation_target.is_some_and(|t| !(0.0..=1.0).contains(&t)) {
            return Err(ConfigError::Allocator("fragmentation target outside [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlbUnitConfig {
    pub name: String,
    #[serde(default)]
    pub capability: TlbCapability,
    pub entries: usize,
    pub associativity: usize,
    #[serde(default = "default_tlb_latency")]
    pub latency: u64,
    #[serde(default = "default_tlb_page_sizes")]
    pub page_sizes: Vec<PageSize>,
    #[serde(default = "default_true")]
    pub allocate_on_miss: bool,
}

impl TlbUnitConfig {
    pub fn new(name: &str, capability: TlbCapability, entries: usize, associativity: usize, latency: u64) -> Self {
        Self {
            name: name.to_string(),
            capability,
            entries,
            associativity,
            latency,
            page_sizes: default_tlb_page_sizes(),
            allocate_on_miss: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries == 0 || self.associativity == 0 {
            return Err(ConfigError::Tlb("entries and associativity must be non-zero"));
        }
        if self.entries % self.associativity != 0 {
            return Err(ConfigError::Tlb("associativity must divide entries"));
        }
        if self.page_sizes.is_empty() {
            return Err(ConfigError::Tlb("unit supports no page size"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwcConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Entries per cached level, root first.
    #[serde(default = "default_pwc_entries")]
    pub entries: Vec<usize>,
    #[serde(default = "default_pwc_associativity")]
    pub associativity: Vec<usize>,
}

impl Default for PwcConfig {
    fn default() -> Self {
        PwcConfig {
            enabled: true,
            entries: default_pwc_entries(),
            associativity: default_pwc_associativity(),
        }
    }
}

impl PwcConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries.len() != self.associativity.len() {
            return Err(ConfigError::Walker("pwc entries and associativity differ in length"));
        }
        let bad = self
            .entries
            .iter()
            .zip(&self.associativity)
            .any(|(&e, &a)| e == 0 || a == 0 || e % a != 0);
        if bad {
            return Err(ConfigError::Walker("pwc associativity must divide entries"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RlbConfig {
    #[serde(default = "default_rlb_entries")]
    pub entries: usize,
    #[serde(default = "default_rlb_latency")]
    pub latency: u64,
    /// Seed of the replacement RNG.
    #[serde(default = "default_rlb_seed")]
    pub seed: u64,
}

impl Default for RlbConfig {
    fn default() -> Self {
        RlbConfig {
            entries: default_rlb_entries(),
            latency: default_rlb_latency(),
            seed: default_rlb_seed(),
        }
    }
}

impl RlbConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries == 0 {
            return Err(ConfigError::Range("rlb needs at least one entry"));
        }
        Ok(())
    }
}

/// Stride prefetcher feeding a prefetch queue behind the TLBs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_prefetch_entries")]
    pub entries: usize,
    #[serde(default = "default_prefetch_latency")]
    pub latency: u64,
    /// Pages prefetched on each side of a missing page.
    #[serde(default = "default_prefetch_length")]
    pub length: u64,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        PrefetchConfig {
            enabled: false,
            entries: default_prefetch_entries(),
            latency: default_prefetch_latency(),
            length: default_prefetch_length(),
        }
    }
}

impl PrefetchConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.entries == 0 {
            return Err(ConfigError::Tlb("prefetch queue needs at least one entry"));
        }
        if self.length == 0 {
            return Err(ConfigError::Tlb("prefetch length must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MmuConfig {
    #[serde(default)]
    pub design: MmuDesign,
    #[serde(default = "default_walkers")]
    pub page_table_walkers: usize,
    /// TLB units per level, L1 first.
    #[serde(default = "default_tlb_levels")]
    pub tlb_levels: Vec<Vec<TlbUnitConfig>>,
    #[serde(default)]
    pub pwc: PwcConfig,
    #[serde(default)]
    pub rlb: RlbConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    /// Per-request trace logging; expensive.
    #[serde(default)]
    pub debug_trace: bool,
}

impl Default for MmuConfig {
    fn default() -> Self {
        MmuConfig {
            design: MmuDesign::default(),
            page_table_walkers: default_walkers(),
            tlb_levels: default_tlb_levels(),
            pwc: PwcConfig::default(),
            rlb: RlbConfig::default(),
            prefetch: PrefetchConfig::default(),
            debug_trace: false,
        }
    }
}

impl MmuConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_table_walkers == 0 {
            return Err(ConfigError::Walker("at least one page table walker required"));
        }
        if self.tlb_levels.is_empty() || self.tlb_levels.iter().any(Vec::is_empty) {
            return Err(ConfigError::Tlb("every TLB level needs a unit"));
        }
        for unit in self.tlb_levels.iter().flatten() {
            unit.validate()?;
        }
        if self.pwc.enabled {
            self.pwc.validate()?;
        }
        if self.design == MmuDesign::Range {
            self.rlb.validate()?;
        }
        if self.prefetch.enabled {
            self.prefetch.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsConfig {
    #[serde(default)]
    pub page_table: PageTableKind,
    /// Radix depth.
    #[serde(default = "default_levels")]
    pub levels: usize,
    /// One hashed table per listed size.
    #[serde(default = "default_hashed_sizes")]
    pub hashed_sizes: Vec<PageSize>,
    #[serde(default = "default_hashed_slots")]
    pub hashed_slots: usize,
    #[serde(default = "default_fault_latency")]
    pub page_fault_latency: u64,
    #[serde(default)]
    pub range_table: bool,
    #[serde(default = "default_range_degree")]
    pub range_table_degree: usize,
}

impl Default for OsConfig {
    fn default() -> Self {
        OsConfig {
            page_table: PageTableKind::default(),
            levels: default_levels(),
            hashed_sizes: default_hashed_sizes(),
            hashed_slots: default_hashed_slots(),
            page_fault_latency: default_fault_latency(),
            range_table: false,
            range_table_degree: default_range_degree(),
        }
    }
}

impl OsConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.page_table {
            PageTableKind::Radix if !(2..=5).contains(&self.levels) => {
                Err(ConfigError::PageTable("radix depth must be 2 to 5 levels"))
            }
            PageTableKind::Hashed if self.hashed_sizes.is_empty() || self.hashed_slots == 0 => {
                Err(ConfigError::PageTable("hashed table needs sizes and slots"))
            }
            PageTableKind::Hashed if !self.hashed_sizes.contains(&PageSize::Base4K) => {
                Err(ConfigError::PageTable("hashed table needs a 4KB size"))
            }
            _ if self.range_table && self.range_table_degree < 2 => {
                Err(ConfigError::Range("range table degree must be at least 2"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_dram_latency")]
    pub dram_latency: u64,
    /// Lines in the cache in front of DRAM; zero disables it.
    #[serde(default = "default_cache_lines")]
    pub cache_lines: usize,
    #[serde(default = "default_cache_associativity")]
    pub cache_associativity: usize,
    #[serde(default = "default_cache_latency")]
    pub cache_latency: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            dram_latency: default_dram_latency(),
            cache_lines: default_cache_lines(),
            cache_associativity: default_cache_associativity(),
            cache_latency: default_cache_latency(),
        }
    }
}

impl MemoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_lines > 0
            && (self.cache_associativity == 0 || self.cache_lines % self.cache_associativity != 0)
        {
            return Err(ConfigError::Walker("cache associativity must divide cache lines"));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_memory_size_mb() -> u64 {
    4096
}
fn default_kernel_size_mb() -> u64 {
    64
}
fn default_max_order() -> usize {
    DEFAULT_MAX_ORDER
}
fn default_threshold() -> f64 {
    0.75
}
fn default_tlb_latency() -> u64 {
    1
}
fn default_tlb_page_sizes() -> Vec<PageSize> {
    vec![PageSize::Base4K, PageSize::Huge2M]
}
fn default_tlb_levels() -> Vec<Vec<TlbUnitConfig>> {
    let mut l1i = TlbUnitConfig::new("itlb", TlbCapability::Instruction, 64, 4, 1);
    l1i.page_sizes = vec![PageSize::Base4K];
    let l1d = TlbUnitConfig::new("dtlb", TlbCapability::Data, 64, 4, 1);
    let l2 = TlbUnitConfig::new("stlb", TlbCapability::Unified, 1536, 12, 12);
    vec![vec![l1i, l1d], vec![l2]]
}
fn default_pwc_entries() -> Vec<usize> {
    vec![4, 16, 32]
}
fn default_pwc_associativity() -> Vec<usize> {
    vec![4, 4, 4]
}
fn default_rlb_entries() -> usize {
    32
}
fn default_rlb_latency() -> u64 {
    2
}
fn default_rlb_seed() -> u64 {
    1
}
fn default_prefetch_entries() -> usize {
    16
}
fn default_prefetch_latency() -> u64 {
    1
}
fn default_prefetch_length() -> u64 {
    1
}
fn default_walkers() -> usize {
    2
}
fn default_levels() -> usize {
    4
}
fn default_hashed_sizes() -> Vec<PageSize> {
    vec![PageSize::Base4K, PageSize::Huge2M]
}
fn default_hashed_slots() -> usize {
    1 << 16
}
fn default_fault_latency() -> u64 {
    1000
}
fn default_range_degree() -> usize {
    crate::range::table::DEFAULT_DEGREE
}
fn default_dram_latency() -> u64 {
    200
}
fn default_cache_lines() -> usize {
    16384
}
fn default_cache_associativity() -> usize {
    16
}
fn default_cache_latency() -> u64 {
    30
}
