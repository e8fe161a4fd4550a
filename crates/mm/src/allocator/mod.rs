//! Physical page allocation: the buddy frame pool and the reservation-based
//! huge page allocator layered on top of it.

pub mod buddy;
pub mod thp;

pub use buddy::{BuddyAllocator, FragmentationMetric};
pub use thp::{Allocation, HugeRegion, ReservationThpAllocator, SharedAllocator, ThpStats};
