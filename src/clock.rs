// =============================================================================
// Clock — monotonic simulated-time source with variable acceleration (C3)
// =============================================================================
//
// Owns no timer itself; it is pumped by the per-Session Clock Scheduler
// (spec.md §4.8). `speed` controls only how often the scheduler ticks it,
// not how many days a single tick advances.
// =============================================================================

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Minimum wall-clock interval between ticks, in milliseconds (spec.md §4.8).
pub const MIN_TICK_INTERVAL_MS: u64 = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clock {
    start_date: NaiveDate,
    simulated_date: NaiveDate,
    /// Ticks per wall-clock second, clamped to [0.1, 10] (spec.md §4.2).
    speed: f64,
}

/// Returned by `advance` when a custom-mode week budget blocks further
/// progress (spec.md §4.2, §3 ModeState::custom).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced,
    Exhausted,
}

impl Clock {
    pub fn new(start_date: NaiveDate, speed: f64) -> Self {
        Self {
            start_date,
            simulated_date: start_date,
            speed: speed.clamp(0.1, 10.0),
        }
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f64) {
        self.speed = speed.clamp(0.1, 10.0);
    }

    pub fn simulated_date(&self) -> NaiveDate {
        self.simulated_date
    }

    /// Integer day index since the Session's start date.
    pub fn day_count(&self) -> i64 {
        (self.simulated_date - self.start_date).num_days()
    }

    /// Wall-clock interval between ticks at the current speed.
    pub fn tick_interval_ms(&self) -> u64 {
        ((1000.0 / self.speed) as u64).max(MIN_TICK_INTERVAL_MS)
    }

    /// Advance by `days` (unconditionally — custom-mode budget enforcement
    /// lives in `mode::CustomModeState`, which gates calls to this method).
    pub fn advance(&mut self, days: i64) {
        self.simulated_date += Duration::days(days);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn day_count_starts_at_zero() {
        let clock = Clock::new(date(2024, 1, 1), 1.0);
        assert_eq!(clock.day_count(), 0);
    }

    #[test]
    fn advance_increments_day_count() {
        let mut clock = Clock::new(date(2024, 1, 1), 1.0);
        clock.advance(3);
        assert_eq!(clock.day_count(), 3);
        assert_eq!(clock.simulated_date(), date(2024, 1, 4));
    }

    #[test]
    fn speed_is_clamped() {
        let mut clock = Clock::new(date(2024, 1, 1), 100.0);
        assert_eq!(clock.speed(), 10.0);
        clock.set_speed(0.0001);
        assert_eq!(clock.speed(), 0.1);
    }

    #[test]
    fn tick_interval_respects_floor() {
        let clock = Clock::new(date(2024, 1, 1), 10.0);
        assert_eq!(clock.tick_interval_ms(), 100);
        let fast = Clock::new(date(2024, 1, 1), 1000.0); // clamped to 10
        assert_eq!(fast.tick_interval_ms(), 100);
    }
}
