use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of timestamps, in seconds.
///
/// Producers take a clock explicitly so tests can drive time by hand.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Wall clock: seconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Jump to an absolute time.
    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    /// Advance by `secs` and return the new time.
    pub fn tick(&self, secs: f64) -> f64 {
        let mut now = self.now.lock();
        *now += secs;
        *now
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &*self.now.lock())
            .finish()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_past_2020() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now() > 1_577_836_800.0);
    }

    #[test]
    fn test_manual_clock_set_and_tick() {
        let clock = ManualClock::default();
        assert_eq!(clock.now(), 0.0);

        assert_eq!(clock.tick(1.5), 1.5);
        assert_eq!(clock.tick(0.5), 2.0);

        clock.set(100.0);
        assert_eq!(clock.now(), 100.0);
    }
}
