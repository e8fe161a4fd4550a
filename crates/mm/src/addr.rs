//! Address arithmetic and page-size classes.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Base page size: 4KB
pub const PAGE_SIZE: u64 = 4096;
/// Base page shift
pub const PAGE_SHIFT: u32 = 12;
/// 2MB huge page shift
pub const HUGE_SHIFT: u32 = 21;
/// 4KB frames per 2MB region
pub const FRAMES_PER_HUGE: u64 = 1 << (HUGE_SHIFT - PAGE_SHIFT);
/// Buddy order of a 2MB block
pub const HUGE_ORDER: usize = (HUGE_SHIFT - PAGE_SHIFT) as usize;

/// Physical frame number at 4KB granularity.
pub type Pfn = u64;

/// Page-size class of a translation, stored as its log2 byte size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PageSize {
    #[serde(rename = "4K")]
    Base4K,
    #[serde(rename = "2M")]
    Huge2M,
    #[serde(rename = "1G")]
    Huge1G,
}

impl PageSize {
    pub const ALL: [PageSize; 3] = [PageSize::Base4K, PageSize::Huge2M, PageSize::Huge1G];

    pub const fn shift(self) -> u32 {
        match self {
            PageSize::Base4K => 12,
            PageSize::Huge2M => 21,
            PageSize::Huge1G => 30,
        }
    }

    pub const fn bytes(self) -> u64 {
        1 << self.shift()
    }

    /// Number of 4KB frames spanned by one page of this size.
    pub const fn frames(self) -> u64 {
        1 << (self.shift() - PAGE_SHIFT)
    }

    pub const fn from_shift(shift: u32) -> Option<Self> {
        match shift {
            12 => Some(PageSize::Base4K),
            21 => Some(PageSize::Huge2M),
            30 => Some(PageSize::Huge1G),
            _ => None,
        }
    }

    pub const fn mask(self) -> PageSizes {
        match self {
            PageSize::Base4K => PageSizes::BASE_4K,
            PageSize::Huge2M => PageSizes::HUGE_2M,
            PageSize::Huge1G => PageSizes::HUGE_1G,
        }
    }

    /// Virtual address rounded down to this page size.
    pub const fn align_down(self, va: u64) -> u64 {
        va & !(self.bytes() - 1)
    }

    pub const fn offset(self, va: u64) -> u64 {
        va & (self.bytes() - 1)
    }
}

impl core::fmt::Display for PageSize {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            PageSize::Base4K => "4KB",
            PageSize::Huge2M => "2MB",
            PageSize::Huge1G => "1GB",
        };
        f.write_str(s)
    }
}

bitflags! {
    /// Set of page sizes a TLB unit can hold.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageSizes: u8 {
        const BASE_4K = 1 << 0;
        const HUGE_2M = 1 << 1;
        const HUGE_1G = 1 << 2;
    }
}

impl PageSizes {
    pub fn from_sizes(sizes: &[PageSize]) -> Self {
        sizes.iter().fold(PageSizes::empty(), |acc, s| acc | s.mask())
    }

    pub fn supports(self, size: PageSize) -> bool {
        self.contains(size.mask())
    }
}

/// 4KB virtual page number.
pub const fn vpn(va: u64) -> u64 {
    va >> PAGE_SHIFT
}

/// Key of the 2MB region containing `va`.
pub const fn huge_region_key(va: u64) -> u64 {
    va >> HUGE_SHIFT
}

/// Index of `va`'s 4KB frame within its 2MB region.
pub const fn huge_region_offset(va: u64) -> usize {
    (vpn(va) & (FRAMES_PER_HUGE - 1)) as usize
}

/// Compose a physical byte address from a translation.
///
/// `ppn` is the 4KB frame at which the page of `size` begins.
pub const fn physical_address(ppn: Pfn, size: PageSize, va: u64) -> u64 {
    (ppn << PAGE_SHIFT) + size.offset(va)
}
