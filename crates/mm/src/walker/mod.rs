//! Page-table walkers: the shared walker pool, the page-walk cache and the
//! timing engine that turns a functional walk into cycles.

pub mod engine;
pub mod pool;
pub mod pwc;

pub use engine::{PageTableWalker, WalkOptions, WalkResult, WalkerStats};
pub use pool::{SharedWalkerPool, WalkerPool, WalkerPoolStats, WalkerSlot};
pub use pwc::{PageWalkCache, PwcLevelStats};
