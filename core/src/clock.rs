//! Time sources for circuit breakers
//!
//! Breakers never read wall-clock time. Every timestamp the engine produces
//! (`state_entered_at`, transition times, call durations) is a number of
//! seconds on a monotonic clock:
//! - `MonotonicClock`: anchored on an `Instant`, so NTP adjustments cannot
//!   shorten or stretch the open period
//! - `ManualClock`: only moves when told to, for deterministic tests

use parking_lot::Mutex;
use std::time::Instant;

/// Source of monotonic time in seconds
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Seconds elapsed since the clock's anchor
    fn monotonic_time(&self) -> f64;
}

/// Clock backed by `Instant`, relative to its creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    start_time: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn monotonic_time(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }
}

/// Clock that only advances when `advance` or `set` is called
///
/// # Example
///
/// ```rust
/// use circuit_gate::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// clock.advance(1.5);
/// assert_eq!(clock.monotonic_time(), 1.5);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward by `seconds`. Negative values are ignored.
    pub fn advance(&self, seconds: f64) {
        if seconds > 0.0 {
            *self.now.lock() += seconds;
        }
    }

    /// Jump to an absolute time; going backwards is ignored
    pub fn set(&self, seconds: f64) {
        let mut now = self.now.lock();
        if seconds > *now {
            *now = seconds;
        }
    }
}

impl Clock for ManualClock {
    fn monotonic_time(&self) -> f64 {
        *self.now.lock()
    }
}
