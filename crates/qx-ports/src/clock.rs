//! Clock port.
//!
//! Time is always injected.  In backtests the clock is driven by the bar
//! being processed, so nothing in a run can observe wall-clock time.

use std::cell::Cell;

use chrono::{DateTime, Utc};

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.  Paper/live only.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock pinned to the close time of the bar currently being
/// processed.  The engine advances it before each bar step.
#[derive(Debug)]
pub struct BarClock {
    current: Cell<DateTime<Utc>>,
}

impl BarClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Cell::new(start),
        }
    }

    /// Advance to the given bar close time.
    pub fn advance_to(&self, ts: DateTime<Utc>) {
        self.current.set(ts);
    }
}

impl Clock for BarClock {
    fn now(&self) -> DateTime<Utc> {
        self.current.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bar_clock_returns_advanced_time() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap();
        let clock = BarClock::new(t0);
        assert_eq!(clock.now(), t0);
        clock.advance_to(t1);
        assert_eq!(clock.now(), t1);
    }
}
