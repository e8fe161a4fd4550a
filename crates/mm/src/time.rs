//! Simulated time in core cycles.

use core::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// A point in, or a span of, simulated time measured in cycles.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);

    pub const fn cycles(self) -> u64 {
        self.0
    }

    /// Span from `earlier` to `self`, zero if `earlier` is later.
    pub const fn since(self, earlier: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(earlier.0))
    }
}

impl Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: SimTime) -> SimTime {
        self.since(rhs)
    }
}

impl core::iter::Sum for SimTime {
    fn sum<I: Iterator<Item = SimTime>>(iter: I) -> SimTime {
        iter.fold(SimTime::ZERO, Add::add)
    }
}

impl core::fmt::Display for SimTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}cy", self.0)
    }
}

/// Per-request logical clock. It only ever moves forward.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimClock {
    now: SimTime,
}

impl SimClock {
    pub const fn new(start: SimTime) -> Self {
        Self { now: start }
    }

    pub const fn now(&self) -> SimTime {
        self.now
    }

    /// Add a latency contribution.
    pub fn advance(&mut self, by: SimTime) -> SimTime {
        self.now += by;
        self.now
    }

    /// Move to `t` if it lies in the future; earlier targets are ignored.
    pub fn advance_to(&mut self, t: SimTime) -> SimTime {
        self.now = self.now.max(t);
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let mut clock = SimClock::new(SimTime(100));
        assert_eq!(clock.advance(SimTime(5)), SimTime(105));
        assert_eq!(clock.advance_to(SimTime(50)), SimTime(105));
        assert_eq!(clock.advance_to(SimTime(120)), SimTime(120));
    }

    #[test]
    fn test_time_arithmetic() {
        assert_eq!(SimTime(7) - SimTime(10), SimTime::ZERO);
        assert_eq!(SimTime(10).since(SimTime(3)), SimTime(7));
        let total: SimTime = [SimTime(1), SimTime(2), SimTime(3)].into_iter().sum();
        assert_eq!(total, SimTime(6));
    }
}
