//! Address translation and physical page allocation timing core.
//!
//! The crate models what happens between a core issuing a virtual address
//! and the cache hierarchy seeing a physical one: TLB lookups, page-walk
//! timing, range translation, and the huge page allocator that backs
//! page faults.

pub mod addr;
pub mod allocator;
pub mod cache;
pub mod config;
pub mod error;
pub mod memory;
pub mod mmu;
pub mod os;
pub mod pagetable;
pub mod range;
pub mod time;
pub mod tlb;
pub mod traits;
pub mod walker;

pub use addr::{PAGE_SIZE, PageSize, Pfn};
pub use config::SimConfig;
pub use error::{Addr, ConfigError, MmError};
pub use mmu::{Mmu, MmuDesign, Translation, TranslationRequest, TranslationSource};
pub use time::{SimClock, SimTime};
