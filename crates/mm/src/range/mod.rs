//! Range translation: base/bound mappings that cover many pages at once.
//!
//! A [`RangeEntry`] maps a run of virtual pages onto a run of physical
//! frames of the same length. Entries are cached in the
//! [`RangeLookasideBuffer`] and backed by a [`RangeTable`](crate::traits::RangeTable).

pub mod rlb;
pub mod table;
pub mod unit;

use serde::Serialize;

use crate::addr::{PAGE_SHIFT, Pfn};
use crate::error::{Addr, MmError};

pub use rlb::{RangeLookasideBuffer, RlbStats};
pub use table::BTreeRangeTable;
pub use unit::{RangeResolution, RangeTranslationUnit, RangeUnitStats};

/// Virtual pages `[vpn_start, bound)` mapped onto frames starting at
/// `ppn_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RangeEntry {
    pub vpn_start: u64,
    pub bound: u64,
    pub ppn_offset: Pfn,
}

impl RangeEntry {
    pub const fn new(vpn_start: u64, bound: u64, ppn_offset: Pfn) -> Self {
        Self { vpn_start, bound, ppn_offset }
    }

    /// Pages covered.
    pub const fn len(&self) -> u64 {
        self.bound.saturating_sub(self.vpn_start)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn contains(&self, vpn: u64) -> bool {
        self.vpn_start <= vpn && vpn < self.bound
    }

    /// Frame backing `vpn`, which must lie inside the range.
    pub const fn translate(&self, vpn: u64) -> Option<Pfn> {
        if self.contains(vpn) {
            Some(vpn - self.vpn_start + self.ppn_offset)
        } else {
            None
        }
    }

    pub const fn contains_va(&self, va: u64) -> bool {
        self.contains(va >> PAGE_SHIFT)
    }
}

/// Outcome of a range-table lookup.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RangeLookup {
    pub entry: Option<RangeEntry>,
    /// Physical address of every table key examined, in visiting order.
    pub visited: Vec<u64>,
}

/// Virtual memory area `[base, end)` in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Vma {
    pub base: u64,
    pub end: u64,
}

impl Vma {
    pub const fn new(base: u64, end: u64) -> Self {
        Self { base, end }
    }

    pub const fn contains(&self, va: u64) -> bool {
        self.base <= va && va < self.end
    }

    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.base)
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First VMA covering `va`. Every translated address is expected to lie in
/// one, so a miss is an error the caller should treat as fatal.
pub fn find_vma(vmas: &[Vma], va: u64) -> Result<&Vma, MmError> {
    vmas.iter()
        .find(|v| v.contains(va))
        .ok_or(MmError::VmaMissing(Addr(va)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_within_range() {
        let r = RangeEntry::new(0x100, 0x180, 0x9000);
        assert_eq!(r.len(), 0x80);
        assert_eq!(r.translate(0x100), Some(0x9000));
        assert_eq!(r.translate(0x17f), Some(0x907f));
        assert_eq!(r.translate(0x180), None);
        assert!(r.contains_va(0x10_0fff));
    }

    #[test]
    fn test_find_vma_first_match() {
        let vmas = [Vma::new(0x1000, 0x5000), Vma::new(0x4000, 0x9000)];
        assert_eq!(find_vma(&vmas, 0x4800), Ok(&vmas[0]));
        assert_eq!(find_vma(&vmas, 0x5000), Ok(&vmas[1]));
    }

    #[test]
    fn test_find_vma_missing() {
        let vmas = [Vma::new(0x1000, 0x2000)];
        assert_eq!(find_vma(&vmas, 0x2000), Err(MmError::VmaMissing(Addr(0x2000))));
        assert_eq!(find_vma(&[], 0), Err(MmError::VmaMissing(Addr(0))));
    }
}
