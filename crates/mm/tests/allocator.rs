//! Huge page allocator behavior through the public API.

#![allow(clippy::unwrap_used)]

use vmsim_mm::PageSize;
use vmsim_mm::allocator::{BuddyAllocator, FragmentationMetric, ReservationThpAllocator};
use vmsim_mm::traits::FramePool;

const MB: u64 = 1 << 20;

fn allocator(threshold: f64) -> ReservationThpAllocator {
    let pool = BuddyAllocator::new(16, 0, 10, FragmentationMetric::LargePageRatio);
    ReservationThpAllocator::new(pool, threshold)
}

/// Tests: promotion happens on the allocation that pushes occupancy past 384/512
#[test]
fn test_promotion_exactly_past_threshold() {
    let mut a = allocator(0.75);
    let region = 4 * MB;
    for i in 0..384u64 {
        let r = a.allocate(4096, region + i * 4096, 0, false).unwrap();
        assert_eq!(r.page_size, PageSize::Base4K, "allocation {i}");
        assert!(!a.region(region).unwrap().promoted);
    }
    let r = a.allocate(4096, region + 384 * 4096, 0, false).unwrap();
    assert_eq!(r.page_size, PageSize::Huge2M);
    assert!(a.region(region).unwrap().promoted);
    assert_eq!(a.stats().two_mb_promoted, 1);
}

/// Tests: demotion picks the emptier region and frees its untouched frames
#[test]
fn test_demote_least_occupied_region() {
    let mut a = allocator(0.9);
    let sparse = 2 * MB;
    let dense = 4 * MB;
    for i in 0..10u64 {
        a.allocate(4096, sparse + i * 4096, 0, false).unwrap();
    }
    for i in 0..400u64 {
        a.allocate(4096, dense + i * 4096, 0, false).unwrap();
    }

    let before = a.free_pages();
    assert!(a.demote_page());
    assert_eq!(a.free_pages() - before, 502);
    assert!(a.region(sparse).is_none());
    let kept = a.region(dense).unwrap();
    assert_eq!(kept.occupancy.count(), 400);
    assert!(!kept.promoted);
    assert_eq!(a.stats().two_mb_demoted, 1);
}

/// Tests: a pool too fragmented for reservations still serves 4KB frames
#[test]
fn test_fragmented_pool_falls_back_to_base_pages() {
    let mut pool = BuddyAllocator::new(16, 0, 10, FragmentationMetric::LargePageRatio);
    pool.fragment(0.0);
    assert!(pool.large_page_ratio() <= f64::EPSILON);
    let mut a = ReservationThpAllocator::new(pool, 0.75);

    let r = a.allocate(4096, 0x40_0000, 0, false).unwrap();
    assert_eq!(r.page_size, PageSize::Base4K);
    assert!(a.huge_region_of(0x40_0000).is_none());
    assert_eq!(a.stats().two_mb_reserved, 0);
}

/// Tests: the shared handle serializes allocations from several cores
#[test]
fn test_shared_allocator_across_threads() {
    let shared = allocator(0.75).into_shared();
    let handles: Vec<_> = (0..4u64)
        .map(|core| {
            let shared = shared.clone();
            std::thread::spawn(move || {
                for i in 0..64u64 {
                    let va = core * 2 * MB + i * 4096;
                    shared.lock().allocate(4096, va, core as usize, false).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let a = shared.lock();
    assert_eq!(a.stats().two_mb_reserved, 4);
    for core in 0..4u64 {
        assert_eq!(a.region(core * 2 * MB).unwrap().occupancy.count(), 64);
    }
}
