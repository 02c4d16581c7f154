//! Uptime clock
//!
//! Every timestamp in the node is derived from milliseconds since boot, never wall-clock.

use core::cell::Cell;
use core::fmt;

/// Monotonic millisecond source
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

/// Uptime broken into hours, minutes and seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Uptime {
    pub hours: u64,
    pub minutes: u8,
    pub seconds: u8,
}

impl Uptime {
    pub fn from_millis(ms: u64) -> Self {
        let total_seconds = ms / 1000;
        Self {
            hours: total_seconds / 3600,
            minutes: ((total_seconds / 60) % 60) as u8,
            seconds: (total_seconds % 60) as u8,
        }
    }
}

impl fmt::Display for Uptime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Clock driven by hand, for host runs and tests
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Cell::new(start_ms),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Clock backed by the embassy time driver
#[cfg(feature = "device")]
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbassyClock;

#[cfg(feature = "device")]
impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uptime_formats_hours_unpadded() {
        assert_eq!(Uptime::from_millis(0).to_string(), "0:00:00");
        assert_eq!(Uptime::from_millis(61_500).to_string(), "0:01:01");
        assert_eq!(Uptime::from_millis(36_000_000 + 5_000).to_string(), "10:00:05");
    }

    #[test]
    fn manual_clock_advances_through_references() {
        let clock = ManualClock::new(100);
        let by_ref = &clock;
        clock.advance(50);
        assert_eq!(by_ref.now_ms(), 150);
        clock.set(10);
        assert_eq!(by_ref.now_ms(), 10);
    }
}
