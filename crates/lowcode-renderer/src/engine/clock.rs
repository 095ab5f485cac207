//! Time sources for the scheduler.
//!
//! `TestClock` provides controllable virtual time. It advances only when
//! told to, which keeps debounce tests fast and deterministic.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

pub trait Clock {
    /// Milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;
}

/// Wall-clock time, measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Virtual time clock for testing.
///
/// Clones share the same time, so a test can keep one handle while the
/// scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct TestClock {
    current_time_ms: Rc<Cell<u64>>,
}

impl TestClock {
    /// Create a new TestClock starting at time 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance virtual time by the specified milliseconds.
    pub fn advance_by(&self, ms: u64) {
        self.current_time_ms.set(self.current_time_ms.get() + ms);
    }

    pub fn set_ms(&self, ms: u64) {
        self.current_time_ms.set(ms);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.current_time_ms.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_starts_at_zero() {
        let clock = TestClock::new();
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn advance_increases_time_for_every_handle() {
        let clock = TestClock::new();
        let shared = clock.clone();
        clock.advance_by(1000);
        assert_eq!(shared.now_ms(), 1000);

        shared.advance_by(500);
        assert_eq!(clock.now_ms(), 1500);
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        assert!(clock.now_ms() >= first);
    }
}
