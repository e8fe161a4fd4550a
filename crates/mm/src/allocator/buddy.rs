//! Buddy allocator over simulated physical frame numbers.
//!
//! Handles frame allocation and freeing with block splitting and buddy
//! coalescing. Frames below the kernel boundary are never handed out.
//!
//! Behavior IDs [B1]-[B12] are referenced by the tests at the bottom.

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::addr::{HUGE_ORDER, PAGE_SIZE, Pfn};
use crate::traits::FramePool;

/// Highest block order by default: 2^12 frames = 16MB.
pub const DEFAULT_MAX_ORDER: usize = 12;
/// Seed of the fragmentation generator, fixed for reproducible runs.
pub const FRAGMENT_SEED: u64 = 12345;
/// Number of largest free blocks averaged by [`FragmentationMetric::AverageSize`].
const AVERAGE_SIZE_SAMPLE: usize = 50;

/// Metric driven down by [`BuddyAllocator::fragment`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentationMetric {
    /// Free 2MB-capable chunks over all 2MB slots of memory.
    #[default]
    LargePageRatio,
    /// Mean of the largest free blocks relative to `2^(max_order-3)` frames.
    AverageSize,
}

/// [B1] Buddy allocator; free lists start empty until ranges are added.
pub struct BuddyAllocator {
    /// free_lists[i] holds the first frame of every free block of order i.
    free_lists: Vec<BTreeSet<Pfn>>,
    max_order: usize,
    total_pages: u64,
    kernel_pages: u64,
    free_pages: u64,
    metric: FragmentationMetric,
}

impl BuddyAllocator {
    /// Create an allocator with no free memory.
    pub fn empty(max_order: usize, metric: FragmentationMetric) -> Self {
        Self {
            free_lists: vec![BTreeSet::new(); max_order + 1],
            max_order,
            total_pages: 0,
            kernel_pages: 0,
            free_pages: 0,
            metric,
        }
    }

    /// Create an allocator managing `memory_mb` of physical memory, of which
    /// the first `kernel_mb` are reserved.
    pub fn new(memory_mb: u64, kernel_mb: u64, max_order: usize, metric: FragmentationMetric) -> Self {
        let frames_per_mb = (1 << 20) / PAGE_SIZE;
        let total_pages = memory_mb * frames_per_mb;
        let kernel_pages = (kernel_mb * frames_per_mb).min(total_pages);

        let mut buddy = Self::empty(max_order, metric);
        buddy.total_pages = total_pages;
        buddy.kernel_pages = kernel_pages;
        buddy.add_range(kernel_pages, total_pages);
        log::debug!(
            "[BUDDY] {} frames managed, {} reserved for the kernel, max order {}",
            total_pages,
            kernel_pages,
            max_order
        );
        buddy
    }

    /// Add the frame range `[start, end)` to the free lists and return how
    /// many frames were released.
    ///
    /// Blocks are carved greedily: the largest order that fits and is aligned.
    /// Frames that are already free are skipped and not counted again.
    pub fn add_range(&mut self, start: Pfn, end: Pfn) -> u64 {
        let mut released = 0;
        let mut curr = start;
        while curr < end {
            let mut order = self.max_order;
            while order > 0 {
                let size = 1u64 << order;
                if curr + size <= end && curr % size == 0 {
                    break;
                }
                order -= 1;
            }

            released += self.release(curr, order);
            curr += 1 << order;
        }
        released
    }

    /// [B2] Allocate a block of the given order.
    /// [B3] Returns None when no block of that order or above is free.
    /// [B4] alloc(order=N) allocates 2^N contiguous frames.
    /// [B6] Block splitting creates buddy pairs.
    pub fn alloc(&mut self, order: usize) -> Option<Pfn> {
        if order > self.max_order {
            return None;
        }

        // [B2][B4] Smallest free block of order >= requested
        for i in order..=self.max_order {
            if let Some(block) = self.free_lists[i].pop_first() {
                // [B6] Return the upper halves until the block has the right size
                for j in (order..i).rev() {
                    self.free_lists[j].insert(block + (1 << j));
                }
                self.free_pages -= 1 << order;
                return Some(block); // [B7] lowest address first
            }
        }

        None // [B3]
    }

    /// Free a block previously returned by [`alloc`](Self::alloc).
    pub fn free_order(&mut self, pfn: Pfn, order: usize) {
        self.release(pfn, order);
    }

    /// [B12] Free `[pfn, pfn + 2^order)` except the parts already free,
    /// splitting the block around them. Returns the frames released.
    fn release(&mut self, pfn: Pfn, order: usize) -> u64 {
        if self.covered_by_free(pfn, order) {
            return 0;
        }
        if order > 0 && self.has_free_within(pfn, order) {
            let half = 1u64 << (order - 1);
            return self.release(pfn, order - 1) + self.release(pfn + half, order - 1);
        }
        self.free_block(pfn, order);
        self.free_pages += 1 << order;
        1 << order
    }

    /// Some free block of order `order` or above contains `pfn`.
    fn covered_by_free(&self, pfn: Pfn, order: usize) -> bool {
        (order..=self.max_order).any(|o| self.free_lists[o].contains(&(pfn & !((1u64 << o) - 1))))
    }

    /// Some smaller free block lies inside `[pfn, pfn + 2^order)`.
    fn has_free_within(&self, pfn: Pfn, order: usize) -> bool {
        let end = pfn + (1u64 << order);
        (0..order).any(|o| self.free_lists[o].range(pfn..end).next().is_some())
    }

    /// [B8] Free blocks are coalesced with their buddies.
    fn free_block(&mut self, pfn: Pfn, order: usize) {
        let mut curr = pfn;
        let mut curr_order = order;

        while curr_order < self.max_order {
            let buddy = curr ^ (1 << curr_order);
            if !self.free_lists[curr_order].remove(&buddy) {
                break;
            }
            curr = curr.min(buddy);
            curr_order += 1; // [B8] merged into larger block
        }

        self.free_lists[curr_order].insert(curr);
    }

    /// Order needed to hold `bytes`, rounded up to whole frames.
    pub fn order_for(bytes: u64) -> usize {
        let frames = bytes.div_ceil(PAGE_SIZE).max(1);
        frames.next_power_of_two().trailing_zeros() as usize
    }

    /// [B9] Number of free blocks currently held at `order`.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.free_lists.get(order).map_or(0, BTreeSet::len)
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn kernel_pages(&self) -> u64 {
        self.kernel_pages
    }

    pub fn metric(&self) -> FragmentationMetric {
        self.metric
    }

    fn current_fragmentation(&self) -> f64 {
        match self.metric {
            FragmentationMetric::LargePageRatio => self.large_page_ratio(),
            FragmentationMetric::AverageSize => self.average_size_ratio(),
        }
    }

    fn largest_free_order(&self) -> Option<usize> {
        (0..=self.max_order).rev().find(|&o| !self.free_lists[o].is_empty())
    }
}

impl FramePool for BuddyAllocator {
    fn reserve_huge(&mut self) -> Option<Pfn> {
        self.alloc(HUGE_ORDER)
    }

    fn allocate(&mut self, bytes: u64) -> Option<Pfn> {
        self.alloc(Self::order_for(bytes))
    }

    /// [B10] Falls back to the largest free block when no block of the
    /// requested size exists.
    fn allocate_contiguous(&mut self, max_frames: u64) -> Option<(Pfn, u64)> {
        if max_frames == 0 {
            return None;
        }
        // Largest power of two not exceeding the request.
        let wanted = (63 - max_frames.leading_zeros()) as usize;
        let wanted = wanted.min(self.max_order);
        if let Some(pfn) = self.alloc(wanted) {
            return Some((pfn, 1 << wanted));
        }
        let largest = self.largest_free_order()?;
        let pfn = self.alloc(largest)?;
        Some((pfn, 1 << largest))
    }

    fn free(&mut self, pfn: Pfn, frames: u64) {
        let released = self.add_range(pfn, pfn + frames);
        if released < frames {
            log::warn!("[BUDDY] {} of {frames} frames at {pfn:#x} were already free", frames - released);
        }
    }

    /// [B11] Split large free blocks into random smaller orders until the
    /// configured metric is at or below `target`. Deterministic per seed.
    fn fragment(&mut self, target: f64) {
        let mut rng = StdRng::seed_from_u64(FRAGMENT_SEED);
        let mut current = self.current_fragmentation();
        log::info!("[BUDDY] fragmenting to {target:.3} (currently {current:.3})");

        while current > target {
            let Some(order) = (HUGE_ORDER..=self.max_order)
                .rev()
                .find(|&o| !self.free_lists[o].is_empty())
            else {
                log::warn!("[BUDDY] no large block left to split at {current:.3}");
                break;
            };
            let Some(block) = self.free_lists[order].pop_first() else {
                break;
            };

            let split_order = rng.gen_range(HUGE_ORDER - 1..order);
            let pieces = 1u64 << (order - split_order);
            for j in 0..pieces {
                self.free_lists[split_order].insert(block + (j << split_order));
            }
            current = self.current_fragmentation();
        }

        log::info!(
            "[BUDDY] fragmentation {current:.3}, {} frames free",
            self.free_pages
        );
    }

    fn free_pages(&self) -> u64 {
        self.free_pages
    }

    fn total_pages(&self) -> u64 {
        self.total_pages
    }

    fn large_page_ratio(&self) -> f64 {
        let slots = self.total_pages / (1 << HUGE_ORDER);
        if slots == 0 {
            return 0.0;
        }
        let large: u64 = (HUGE_ORDER..=self.max_order)
            .map(|o| self.free_lists[o].len() as u64 * (1 << (o - HUGE_ORDER)))
            .sum();
        large as f64 / slots as f64
    }

    fn average_size_ratio(&self) -> f64 {
        let sizes: Vec<u64> = (0..=self.max_order)
            .rev()
            .flat_map(|o| std::iter::repeat_n(1u64 << o, self.free_lists[o].len()))
            .take(AVERAGE_SIZE_SAMPLE)
            .collect();
        if sizes.is_empty() {
            return 0.0;
        }
        let average = sizes.iter().sum::<u64>() as f64 / sizes.len() as f64;
        average / (1u64 << self.max_order.saturating_sub(3)) as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_allocator(frames: u64, max_order: usize) -> BuddyAllocator {
        let mut buddy = BuddyAllocator::empty(max_order, FragmentationMetric::LargePageRatio);
        buddy.total_pages = frames;
        buddy.add_range(0, frames);
        buddy
    }

    /// Tests: [B1] empty allocator, [B3] OOM
    #[test]
    fn test_empty_allocator_fails() {
        let mut buddy = BuddyAllocator::empty(10, FragmentationMetric::LargePageRatio);
        assert_eq!(buddy.alloc(0), None);
        assert_eq!(buddy.free_pages(), 0);
    }

    /// Tests: [B2] alloc, [B7] sequential addresses
    #[test]
    fn test_alloc_order_0() {
        let mut buddy = create_allocator(16, 4);
        assert_eq!(buddy.alloc(0), Some(0));
        assert_eq!(buddy.alloc(0), Some(1));
        assert_eq!(buddy.alloc(0), Some(2));
        assert_eq!(buddy.free_pages(), 13);
    }

    /// Tests: [B4] 2^N frames, [B6] splitting leaves one buddy per order
    #[test]
    fn test_splitting() {
        let mut buddy = create_allocator(16, 4);
        assert_eq!(buddy.alloc(1), Some(0));
        assert_eq!(buddy.free_blocks(1), 1);
        assert_eq!(buddy.free_blocks(2), 1);
        assert_eq!(buddy.free_blocks(3), 1);
        assert_eq!(buddy.free_blocks(4), 0);
    }

    /// Tests: [B8] freeing both halves restores the original block
    #[test]
    fn test_coalescing() {
        let mut buddy = create_allocator(16, 4);
        let a = buddy.alloc(3).unwrap();
        let b = buddy.alloc(3).unwrap();
        assert_eq!(buddy.free_pages(), 0);
        buddy.free_order(a, 3);
        buddy.free_order(b, 3);
        assert_eq!(buddy.free_blocks(4), 1);
        assert_eq!(buddy.free_pages(), 16);
    }

    /// Tests: kernel prefix is never handed out, 2MB reservations are aligned
    #[test]
    fn test_reserve_huge_skips_kernel() {
        let mut buddy = BuddyAllocator::new(16, 3, 10, FragmentationMetric::LargePageRatio);
        assert_eq!(buddy.total_pages(), 4096);
        assert_eq!(buddy.kernel_pages(), 768);
        let huge = buddy.reserve_huge().unwrap();
        assert_eq!(huge % 512, 0);
        assert!(huge >= 768);
        assert_eq!(buddy.free_pages(), 4096 - 768 - 512);
    }

    /// Tests: byte sizes round up to whole power-of-two blocks
    #[test]
    fn test_order_for() {
        assert_eq!(BuddyAllocator::order_for(1), 0);
        assert_eq!(BuddyAllocator::order_for(4096), 0);
        assert_eq!(BuddyAllocator::order_for(4097), 1);
        assert_eq!(BuddyAllocator::order_for(2 << 20), 9);
    }

    /// Tests: [B10] contiguous request larger than any block returns the largest
    #[test]
    fn test_allocate_contiguous_falls_back() {
        let mut buddy = create_allocator(8, 3);
        let first = buddy.alloc(0).unwrap();
        assert_eq!(first, 0);
        // 7 frames left as 1 + 2 + 4; asking for 8 yields the 4-frame block
        assert_eq!(buddy.allocate_contiguous(8), Some((4, 4)));
        assert_eq!(buddy.allocate_contiguous(2), Some((2, 2)));
        assert_eq!(buddy.allocate_contiguous(1), Some((1, 1)));
        assert_eq!(buddy.allocate_contiguous(1), None);
    }

    /// Tests: freeing a non power-of-two range decomposes into aligned blocks
    #[test]
    fn test_free_unaligned_range() {
        let mut buddy = create_allocator(16, 4);
        let base = buddy.alloc(4).unwrap();
        buddy.free(base + 1, 3);
        assert_eq!(buddy.free_pages(), 3);
        assert_eq!(buddy.free_blocks(0), 1);
        assert_eq!(buddy.free_blocks(1), 1);
    }

    /// Tests: [B12] freeing a free frame twice is not counted twice
    #[test]
    fn test_double_free_is_refused() {
        let mut buddy = create_allocator(16, 4);
        let pfn = buddy.alloc(0).unwrap();
        buddy.free(pfn, 1);
        buddy.free(pfn, 1);
        assert_eq!(buddy.free_pages(), 16);
        assert_eq!(buddy.free_blocks(4), 1);
    }

    /// Tests: [B12] a range overlapping free frames releases only the rest
    #[test]
    fn test_overlapping_free_releases_remainder() {
        let mut buddy = create_allocator(16, 4);
        let base = buddy.alloc(2).unwrap();
        buddy.free(base + 1, 1);
        assert_eq!(buddy.add_range(base, base + 4), 3);
        assert_eq!(buddy.free_pages(), 16);
        assert_eq!(buddy.free_blocks(4), 1);
    }

    /// Tests: [B11] fragmentation drives the large-page ratio down deterministically
    #[test]
    fn test_fragment_is_deterministic() {
        let mut a = BuddyAllocator::new(64, 0, 12, FragmentationMetric::LargePageRatio);
        let mut b = BuddyAllocator::new(64, 0, 12, FragmentationMetric::LargePageRatio);
        assert!((a.large_page_ratio() - 1.0).abs() < f64::EPSILON);

        a.fragment(0.5);
        b.fragment(0.5);
        assert!(a.large_page_ratio() <= 0.5);
        assert!((a.large_page_ratio() - b.large_page_ratio()).abs() < f64::EPSILON);
        // Splitting never changes the amount of free memory
        assert_eq!(a.free_pages(), a.total_pages());
    }

    /// Tests: average-size metric normalizes by 2^(max_order-3)
    #[test]
    fn test_average_size_ratio() {
        let buddy = create_allocator(1 << 12, 12);
        // One free block of 4096 frames over 2^9
        assert!((buddy.average_size_ratio() - 8.0).abs() < f64::EPSILON);
    }
}
