// =============================================================================
// ModeState — tagged variant dispatched by the Trader and Clock (C4.9)
// =============================================================================
//
// Replaces the source's ad-hoc mode branches (spec.md §9 Design Notes) with
// one enum, one branch per mode, matched exhaustively wherever mode-specific
// behavior is needed.
// =============================================================================

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Classic,
    Challenge,
    Daytrader,
    Portfolio,
    Custom,
}

pub const DAYTRADER_MAX_TRADES_PER_DAY: u32 = 3;
pub const CHALLENGE_DAILY_TARGET_FRACTION: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaytraderState {
    pub trades_today: u32,
    pub current_sim_day: i64,
}

impl DaytraderState {
    pub fn new(current_sim_day: i64) -> Self {
        Self {
            trades_today: 0,
            current_sim_day,
        }
    }

    /// Reset the counter if the clock has crossed into a new simulated day
    /// (spec.md §4.3, §8 "single atomic reset before the next tick's
    /// broadcast"). Must be called before checking/incrementing the limit.
    pub fn roll_day_if_needed(&mut self, current_sim_day: i64) {
        if current_sim_day != self.current_sim_day {
            self.trades_today = 0;
            self.current_sim_day = current_sim_day;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengeState {
    pub daily_target: f64,
    pub days_completed: u32,
    pub streak_days: u32,
    pub last_evaluated_day: i64,
}

impl ChallengeState {
    pub fn new(starting_capital: f64, current_sim_day: i64) -> Self {
        Self {
            daily_target: starting_capital * CHALLENGE_DAILY_TARGET_FRACTION,
            days_completed: 0,
            streak_days: 0,
            last_evaluated_day: current_sim_day,
        }
    }

    /// Observe a day boundary (spec.md §4.9). Pure observation: never
    /// constrains trading.
    pub fn evaluate_day(&mut self, current_sim_day: i64, portfolio_value: f64, initial_capital: f64) {
        if current_sim_day == self.last_evaluated_day {
            return;
        }
        self.last_evaluated_day = current_sim_day;
        if portfolio_value - initial_capital >= self.daily_target {
            self.days_completed += 1;
            self.streak_days += 1;
        } else {
            self.streak_days = 0;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioModeState {
    /// Target allocation fractions by instrument type, summing to 1.0.
    pub target_allocation: std::collections::HashMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomModeState {
    pub start_day: i64,
    pub weeks_budget: u32,
}

impl CustomModeState {
    pub fn days_budget(&self) -> i64 {
        self.weeks_budget as i64 * 7
    }

    /// Whether the Session has consumed its week budget as of `current_day`
    /// (spec.md §3 custom-mode invariant, §8 boundary behavior).
    pub fn is_exhausted(&self, current_day: i64) -> bool {
        (current_day - self.start_day) >= self.days_budget()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeState {
    Classic,
    Daytrader(DaytraderState),
    Challenge(ChallengeState),
    Portfolio(PortfolioModeState),
    Custom(CustomModeState),
}

impl ModeState {
    pub fn mode(&self) -> Mode {
        match self {
            ModeState::Classic => Mode::Classic,
            ModeState::Daytrader(_) => Mode::Daytrader,
            ModeState::Challenge(_) => Mode::Challenge,
            ModeState::Portfolio(_) => Mode::Portfolio,
            ModeState::Custom(_) => Mode::Custom,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daytrader_rolls_over_on_new_day() {
        let mut s = DaytraderState::new(0);
        s.trades_today = 3;
        s.roll_day_if_needed(0);
        assert_eq!(s.trades_today, 3);
        s.roll_day_if_needed(1);
        assert_eq!(s.trades_today, 0);
        assert_eq!(s.current_sim_day, 1);
    }

    #[test]
    fn challenge_streak_resets_on_miss() {
        let mut s = ChallengeState::new(10_000.0, 0);
        assert_eq!(s.daily_target, 500.0);
        s.evaluate_day(1, 10_600.0, 10_000.0); // hit target
        assert_eq!(s.days_completed, 1);
        assert_eq!(s.streak_days, 1);
        s.evaluate_day(2, 10_050.0, 10_000.0); // missed target
        assert_eq!(s.days_completed, 1);
        assert_eq!(s.streak_days, 0);
    }

    #[test]
    fn challenge_evaluate_is_idempotent_within_a_day() {
        let mut s = ChallengeState::new(10_000.0, 0);
        s.evaluate_day(1, 10_600.0, 10_000.0);
        s.evaluate_day(1, 0.0, 10_000.0); // same day, should not re-evaluate
        assert_eq!(s.days_completed, 1);
    }

    #[test]
    fn custom_mode_exhausts_after_week_budget() {
        let s = CustomModeState {
            start_day: 0,
            weeks_budget: 1,
        };
        assert!(!s.is_exhausted(6));
        assert!(s.is_exhausted(7));
        assert!(s.is_exhausted(8));
    }
}
