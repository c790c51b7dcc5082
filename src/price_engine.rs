// =============================================================================
// PriceEngine — per-tick stochastic price evolution (C2)
// =============================================================================
//
// Pure function over `PriceState`: `tick()` carries only `price` and the
// previous delta (`prev_delta`) as state; `history` is purely observational
// and bounded to `HISTORY_RETENTION` entries (spec.md §3, §4.1).
// =============================================================================

use crate::catalog::InstrumentType;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Bounded retention for price history (spec.md §3: "e.g. 1024").
pub const HISTORY_RETENTION: usize = 1024;

const BOND_VOLATILITY: f64 = 0.002;
const DRIFT_COEFFICIENT: f64 = 0.00005;
const MOMENTUM_COEFFICIENT: f64 = 0.3;
const JUMP_PROBABILITY: f64 = 0.005;
const JUMP_MAGNITUDE: f64 = 0.2;
const NEWS_GAP_PROBABILITY: f64 = 0.02;
const NEWS_GAP_MAGNITUDE: f64 = 0.05;
const MIN_PRICE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskLevel {
    pub fn multiplier(self) -> f64 {
        match self {
            RiskLevel::Conservative => 0.5,
            RiskLevel::Moderate => 1.0,
            RiskLevel::Aggressive => 1.8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn multiplier(self) -> f64 {
        match self {
            Difficulty::Easy => 0.6,
            Difficulty::Medium => 1.0,
            Difficulty::Hard => 1.3,
        }
    }
}

/// Per-symbol, per-session price state (spec.md §3 `PriceState`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceState {
    pub price: f64,
    pub prev_delta: f64,
    pub history: VecDeque<f64>,
}

impl PriceState {
    pub fn new(starting_price: f64) -> Self {
        let mut history = VecDeque::with_capacity(HISTORY_RETENTION);
        history.push_back(starting_price);
        Self {
            price: starting_price,
            prev_delta: 0.0,
            history,
        }
    }

    fn push_history(&mut self, price: f64) {
        self.history.push_back(price);
        while self.history.len() > HISTORY_RETENTION {
            self.history.pop_front();
        }
    }
}

/// Compute the effective per-tick volatility for an instrument under a
/// session's risk/difficulty multipliers (spec.md §4.1 step 1).
pub fn effective_volatility(
    kind: InstrumentType,
    base_volatility: f64,
    risk: RiskLevel,
    difficulty: Difficulty,
) -> f64 {
    if kind == InstrumentType::Bond {
        BOND_VOLATILITY
    } else {
        base_volatility * risk.multiplier() * difficulty.multiplier()
    }
}

/// Advance `state` by `ticks` logical days using `rng` for the stochastic
/// terms. `ticks` must be >= 1; each unit is evaluated as an independent
/// tick in sequence (momentum/jump terms do not average across ticks).
pub fn tick<R: Rng + ?Sized>(state: &mut PriceState, effective_volatility: f64, ticks: u32, rng: &mut R) {
    for _ in 0..ticks.max(1) {
        let p = state.price;
        let type_vol = effective_volatility;

        let random = rng.gen_range(-0.5..0.5) * type_vol * p;
        let drift = DRIFT_COEFFICIENT * p;
        let momentum = MOMENTUM_COEFFICIENT * state.prev_delta;

        let jump_roll: f64 = rng.gen_range(0.0..1.0);
        let jump_factor = if jump_roll < JUMP_PROBABILITY {
            1.0 + rng.gen_range(-JUMP_MAGNITUDE..JUMP_MAGNITUDE)
        } else if jump_roll < JUMP_PROBABILITY + NEWS_GAP_PROBABILITY {
            1.0 + rng.gen_range(-NEWS_GAP_MAGNITUDE..NEWS_GAP_MAGNITUDE)
        } else {
            1.0
        };

        let raw_new_price = p * jump_factor + random + drift + momentum;
        let new_price = raw_new_price.max(MIN_PRICE);

        state.prev_delta = new_price - p;
        state.price = new_price;
        state.push_history(new_price);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn price_never_goes_non_positive() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut state = PriceState::new(1.0);
        for _ in 0..5000 {
            tick(&mut state, 0.9, 1, &mut rng);
            assert!(state.price > 0.0);
        }
    }

    #[test]
    fn history_is_bounded_to_retention() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut state = PriceState::new(100.0);
        tick(&mut state, 0.02, (HISTORY_RETENTION + 50) as u32, &mut rng);
        assert_eq!(state.history.len(), HISTORY_RETENTION);
        assert_eq!(*state.history.back().unwrap(), state.price);
    }

    #[test]
    fn bond_volatility_is_flat_regardless_of_base() {
        let vol = effective_volatility(
            InstrumentType::Bond,
            0.05,
            RiskLevel::Aggressive,
            Difficulty::Hard,
        );
        assert_eq!(vol, BOND_VOLATILITY);
    }

    #[test]
    fn non_bond_volatility_scales_with_multipliers() {
        let vol = effective_volatility(
            InstrumentType::Growth,
            0.01,
            RiskLevel::Aggressive,
            Difficulty::Hard,
        );
        assert!((vol - 0.01 * 1.8 * 1.3).abs() < 1e-12);
    }

    #[test]
    fn deterministic_seed_is_reproducible() {
        let mut rng_a = StdRng::seed_from_u64(42);
        let mut rng_b = StdRng::seed_from_u64(42);
        let mut a = PriceState::new(100.0);
        let mut b = PriceState::new(100.0);
        for _ in 0..20 {
            tick(&mut a, 0.02, 1, &mut rng_a);
            tick(&mut b, 0.02, 1, &mut rng_b);
        }
        assert_eq!(a.price, b.price);
    }

    #[test]
    fn zero_ticks_is_treated_as_one() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut state = PriceState::new(50.0);
        let before_len = state.history.len();
        tick(&mut state, 0.01, 0, &mut rng);
        assert_eq!(state.history.len(), before_len + 1);
    }
}
