//! Bounded pool of hardware page-table walkers.
//!
//! Works like an MSHR file: every walk holds a slot from its start until its
//! completion, and a request that finds every slot busy waits for the
//! earliest slot to free up.

use std::sync::Arc;

use serde::Serialize;
use vmsim_utils::Mutex;

use crate::time::SimTime;

/// Pool shared by the walkers of several simulated cores.
pub type SharedWalkerPool = Arc<Mutex<WalkerPool>>;

/// One in-flight walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerSlot {
    pub request_time: SimTime,
    pub start_time: SimTime,
    pub completion_time: SimTime,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkerPoolStats {
    pub walks: u64,
    pub delayed_walks: u64,
    pub total_delay: SimTime,
    pub max_occupancy: usize,
}

#[derive(Debug)]
pub struct WalkerPool {
    max_walkers: usize,
    slots: Vec<WalkerSlot>,
    stats: WalkerPoolStats,
}

impl WalkerPool {
    pub fn new(max_walkers: usize) -> Self {
        Self { max_walkers: max_walkers.max(1), slots: Vec::new(), stats: WalkerPoolStats::default() }
    }

    pub fn into_shared(self) -> SharedWalkerPool {
        Arc::new(Mutex::new(self))
    }

    pub fn max_walkers(&self) -> usize {
        self.max_walkers
    }

    /// Drop every slot that has completed by `now`.
    pub fn retire_completed(&mut self, now: SimTime) {
        self.slots.retain(|s| s.completion_time > now);
    }

    /// How long a walk requested at `request_time` waits for a free slot.
    ///
    /// With `n` walks in flight and `max` walkers, the request needs
    /// `n - max + 1` of them to finish, so it starts at the `(n - max)`-th
    /// earliest completion (zero-based).
    pub fn slot_delay(&mut self, request_time: SimTime) -> SimTime {
        self.retire_completed(request_time);
        let mut completions: Vec<SimTime> = self.slots.iter().map(|s| s.completion_time).collect();
        if completions.len() < self.max_walkers {
            return SimTime::ZERO;
        }
        completions.sort_unstable();
        completions[completions.len() - self.max_walkers].since(request_time)
    }

    /// Record a walk holding a slot over `[start_time, completion_time)`.
    pub fn occupy(&mut self, slot: WalkerSlot) {
        self.stats.walks += 1;
        let delay = slot.start_time.since(slot.request_time);
        if delay > SimTime::ZERO {
            self.stats.delayed_walks += 1;
            self.stats.total_delay += delay;
        }
        self.slots.push(slot);
        self.stats.max_occupancy = self.stats.max_occupancy.max(self.in_flight_at(slot.start_time));
    }

    /// Walks holding a slot at instant `t`.
    pub fn in_flight_at(&self, t: SimTime) -> usize {
        self.slots
            .iter()
            .filter(|s| s.start_time <= t && t < s.completion_time)
            .count()
    }

    pub fn in_flight(&self) -> usize {
        self.slots.len()
    }

    pub fn stats(&self) -> WalkerPoolStats {
        self.stats
    }
}
