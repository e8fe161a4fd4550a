//! Synthetic access streams.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vmsim_mm::range::Vma;
use vmsim_mm::{PAGE_SIZE, TranslationRequest};

use crate::cli::Pattern;

/// Start of the region every stream touches.
pub const REGION_BASE: u64 = 0x7f00_0000_0000;

/// Deals `total` requests over `cores` round-robin, each at
/// `REGION_BASE + offset` with the offset drawn from `pattern`.
pub struct Workload {
    pattern: Pattern,
    footprint: u64,
    stride: u64,
    instruction_ratio: f64,
    cores: usize,
    total: u64,
    issued: u64,
    cursor: u64,
    rng: StdRng,
}

impl Workload {
    pub fn new(
        pattern: Pattern,
        footprint: u64,
        stride: u64,
        instruction_ratio: f64,
        cores: usize,
        total: u64,
        seed: u64,
    ) -> Self {
        Self {
            pattern,
            footprint: footprint.max(PAGE_SIZE),
            stride: stride.max(1),
            instruction_ratio: instruction_ratio.clamp(0.0, 1.0),
            cores: cores.max(1),
            total,
            issued: 0,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn region(&self) -> Vma {
        Vma::new(REGION_BASE, REGION_BASE + self.footprint)
    }

    fn next_offset(&mut self) -> u64 {
        match self.pattern {
            Pattern::Sequential => self.step(PAGE_SIZE),
            Pattern::Strided => self.step(self.stride),
            Pattern::Random => self.rng.gen_range(0..self.footprint) & !7,
        }
    }

    fn step(&mut self, by: u64) -> u64 {
        let offset = self.cursor;
        self.cursor = (self.cursor + by) % self.footprint;
        offset
    }
}

impl Iterator for Workload {
    type Item = TranslationRequest;

    fn next(&mut self) -> Option<TranslationRequest> {
        if self.issued == self.total {
            return None;
        }
        let core_id = (self.issued % self.cores as u64) as usize;
        self.issued += 1;

        let va = REGION_BASE + self.next_offset();
        let fetch = self.instruction_ratio > 0.0 && self.rng.gen_bool(self.instruction_ratio);
        Some(if fetch {
            TranslationRequest::instruction(va, core_id)
        } else {
            TranslationRequest::data(va, core_id)
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = (self.total - self.issued) as usize;
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmsim_mm::tlb::AccessKind;

    #[test]
    fn test_sequential_wraps_at_footprint() {
        let w = Workload::new(Pattern::Sequential, 4 * PAGE_SIZE, 0, 0.0, 1, 6, 1);
        let offsets: Vec<u64> = w.map(|r| (r.va - REGION_BASE) / PAGE_SIZE).collect();
        assert_eq!(offsets, [0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_strided_uses_byte_stride() {
        let w = Workload::new(Pattern::Strided, 1 << 20, 3 * PAGE_SIZE, 0.0, 1, 3, 1);
        let vas: Vec<u64> = w.map(|r| r.va).collect();
        assert_eq!(vas, [REGION_BASE, REGION_BASE + 0x3000, REGION_BASE + 0x6000]);
    }

    #[test]
    fn test_random_stays_in_region() {
        let w = Workload::new(Pattern::Random, 8 << 20, 0, 0.0, 1, 1000, 7);
        let region = w.region();
        assert!(w.into_iter().all(|r| region.contains(r.va) && r.va % 8 == 0));
    }

    #[test]
    fn test_same_seed_same_stream() {
        let a: Vec<u64> = Workload::new(Pattern::Random, 1 << 24, 0, 0.5, 2, 50, 3).map(|r| r.va).collect();
        let b: Vec<u64> = Workload::new(Pattern::Random, 1 << 24, 0, 0.5, 2, 50, 3).map(|r| r.va).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cores_dealt_round_robin() {
        let cores: Vec<usize> = Workload::new(Pattern::Sequential, 1 << 20, 0, 0.0, 3, 7, 1)
            .map(|r| r.core_id)
            .collect();
        assert_eq!(cores, [0, 1, 2, 0, 1, 2, 0]);
    }

    #[test]
    fn test_instruction_ratio_extremes() {
        let all = Workload::new(Pattern::Sequential, 1 << 20, 0, 1.0, 1, 20, 1);
        assert!(all.into_iter().all(|r| r.kind == AccessKind::Instruction));
        let none = Workload::new(Pattern::Sequential, 1 << 20, 0, 0.0, 1, 20, 1);
        assert!(none.into_iter().all(|r| r.kind == AccessKind::Data));
    }
}
