// =============================================================================
// Session — the bound tuple (Config, Clock, PriceEngine, Portfolio, TradeLog,
// ModeState) that the Trader operates over (C5)
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{self, InstrumentType};
use crate::clock::Clock;
use crate::mode::{
    ChallengeState, CustomModeState, DaytraderState, Mode, ModeState, PortfolioModeState,
};
use crate::portfolio::Portfolio;
use crate::price_engine::{Difficulty, PriceState, RiskLevel};

/// Hard cap on starting capital (spec.md §3, §8 boundary behavior).
pub const MAX_STARTING_CAPITAL: f64 = 1_000_000.0;
/// Starting capital forced on custom-mode sessions (spec.md §4.9).
pub const CUSTOM_MODE_STARTING_CAPITAL: f64 = 10_000.0;
/// Starting cash seeded for fresh bot sessions (spec.md §4.4).
pub const BOT_STARTING_CAPITAL: f64 = 100_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub starting_capital: f64,
    pub risk_level: RiskLevel,
    pub difficulty: Difficulty,
    pub mode: Mode,
    pub weeks: u32,
    pub show_day_counter: bool,
    /// Config-level commission policy (spec.md §9 Open Question: the bot
    /// path applies 0.1%, the human path doesn't by default — modeled as a
    /// policy flag rather than a path-specific constant).
    pub commission_enabled: bool,
    pub margin_enabled: bool,
    pub margin_multiplier: f64,
}

impl Config {
    pub fn new(
        starting_capital: f64,
        risk_level: RiskLevel,
        difficulty: Difficulty,
        mode: Mode,
        weeks: u32,
        show_day_counter: bool,
    ) -> Self {
        let mut cfg = Self {
            starting_capital: starting_capital.min(MAX_STARTING_CAPITAL).max(0.0),
            risk_level,
            difficulty,
            mode,
            weeks,
            show_day_counter,
            commission_enabled: false,
            margin_enabled: false,
            margin_multiplier: 1.0,
        };
        // Custom mode forces its own capital/risk/difficulty (spec.md §4.9).
        if mode == Mode::Custom {
            cfg.starting_capital = CUSTOM_MODE_STARTING_CAPITAL;
            cfg.risk_level = RiskLevel::Moderate;
            cfg.difficulty = Difficulty::Medium;
        }
        cfg
    }
}

pub const COMMISSION_RATE: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOwner {
    User(Uuid),
    Bot(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    #[serde(skip)]
    pub owner: Option<SessionOwner>,
    pub config: Config,
    pub clock: Clock,
    pub price_states: HashMap<String, PriceState>,
    pub portfolio: Portfolio,
    pub trades: Vec<crate::portfolio::Trade>,
    pub mode_state: ModeState,
    pub start_time: DateTime<Utc>,
}

impl Session {
    /// Build a fresh Session for `config`, seeding a `PriceState` for every
    /// catalog instrument and the mode-appropriate `ModeState`.
    pub fn new(id: Uuid, owner: Option<SessionOwner>, config: Config, start_date: NaiveDate) -> Self {
        let mut price_states = HashMap::with_capacity(catalog::CATALOG.len());
        for inst in catalog::CATALOG.iter() {
            price_states.insert(inst.symbol.clone(), PriceState::new(inst.base_price));
        }

        let clock = Clock::new(start_date, 1.0);
        let mode_state = match config.mode {
            Mode::Classic => ModeState::Classic,
            Mode::Daytrader => ModeState::Daytrader(DaytraderState::new(clock.day_count())),
            Mode::Challenge => {
                ModeState::Challenge(ChallengeState::new(config.starting_capital, clock.day_count()))
            }
            Mode::Portfolio => {
                let mut target_allocation = HashMap::new();
                for t in [
                    InstrumentType::Growth,
                    InstrumentType::Dividend,
                    InstrumentType::Etf,
                    InstrumentType::Bond,
                ] {
                    target_allocation.insert(t.to_string(), 0.25);
                }
                ModeState::Portfolio(PortfolioModeState { target_allocation })
            }
            Mode::Custom => ModeState::Custom(CustomModeState {
                start_day: clock.day_count(),
                weeks_budget: config.weeks.max(1),
            }),
        };

        Self {
            id,
            owner,
            portfolio: Portfolio::new(config.starting_capital),
            trades: Vec::new(),
            mode_state,
            clock,
            price_states,
            config,
            start_time: Utc::now(),
        }
    }

    pub fn current_price(&self, symbol: &str) -> Option<f64> {
        self.price_states.get(symbol).map(|s| s.price)
    }

    pub fn effective_volatility(&self, symbol: &str) -> Option<f64> {
        let inst = catalog::lookup(symbol)?;
        Some(crate::price_engine::effective_volatility(
            inst.kind,
            inst.base_volatility,
            self.config.risk_level,
            self.config.difficulty,
        ))
    }

    pub fn total_value(&self) -> f64 {
        self.portfolio
            .total_value(|sym| self.current_price(sym))
    }

    /// Used margin: the notional of all long positions funded beyond cash,
    /// i.e. the portion of position cost basis not covered by available
    /// cash at entry. Reported to the margin-level calculation; the Trader
    /// never consults it to block trades (spec.md §4.3: "policy is left to
    /// callers").
    pub fn used_margin(&self) -> f64 {
        if !self.config.margin_enabled {
            return 0.0;
        }
        self.portfolio
            .positions
            .values()
            .map(|p| p.total_cost_basis)
            .sum::<f64>()
            .max(0.0)
    }

    /// `true` when `marginLevel < 130` (spec.md §4.3 margin call flag).
    /// Purely observable — the core never auto-liquidates on this.
    pub fn margin_call_flag(&self) -> bool {
        let used = self.used_margin();
        match self.portfolio.margin_level(|sym| self.current_price(sym), used) {
            Some(level) => level < 130.0,
            None => false,
        }
    }

    /// Bucket current long-position market value by instrument type,
    /// normalized to fractions summing to 1.0 (spec.md §4.9 "compute current
    /// allocation fractions by type"). Always reports all four types so the
    /// key set matches `PortfolioModeState::target_allocation`.
    pub fn current_allocation(&self) -> HashMap<String, f64> {
        let mut value_by_type: HashMap<InstrumentType, f64> = HashMap::new();
        let mut total = 0.0;
        for (symbol, pos) in self.portfolio.positions.iter() {
            let Some(inst) = catalog::lookup(symbol) else {
                continue;
            };
            let value = self.current_price(symbol).unwrap_or(0.0) * pos.quantity as f64;
            *value_by_type.entry(inst.kind).or_insert(0.0) += value;
            total += value;
        }
        [
            InstrumentType::Growth,
            InstrumentType::Dividend,
            InstrumentType::Etf,
            InstrumentType::Bond,
        ]
        .into_iter()
        .map(|t| {
            let fraction = if total > 0.0 {
                value_by_type.get(&t).copied().unwrap_or(0.0) / total
            } else {
                0.0
            };
            (t.to_string(), fraction)
        })
        .collect()
    }

    /// Current vs target allocation for portfolio-mode sessions (spec.md
    /// §4.9: "emit both current and target for UI"). `None` outside
    /// portfolio mode.
    pub fn portfolio_allocation(&self) -> Option<(HashMap<String, f64>, HashMap<String, f64>)> {
        match &self.mode_state {
            ModeState::Portfolio(state) => Some((self.current_allocation(), state.target_allocation.clone())),
            _ => None,
        }
    }

    /// Advance the Session's Clock and every instrument's PriceState by one
    /// scheduler tick (spec.md §4.8, flow in §2).
    pub fn tick<R: rand::Rng + ?Sized>(&mut self, rng: &mut R) -> crate::clock::AdvanceOutcome {
        if let ModeState::Custom(custom) = &self.mode_state {
            if custom.is_exhausted(self.clock.day_count()) {
                return crate::clock::AdvanceOutcome::Exhausted;
            }
        }

        self.clock.advance(1);

        for (symbol, state) in self.price_states.iter_mut() {
            let Some(inst) = catalog::lookup(symbol) else {
                continue;
            };
            let vol = crate::price_engine::effective_volatility(
                inst.kind,
                inst.base_volatility,
                self.config.risk_level,
                self.config.difficulty,
            );
            crate::price_engine::tick(state, vol, 1, rng);
        }

        let day = self.clock.day_count();
        if let ModeState::Daytrader(d) = &mut self.mode_state {
            d.roll_day_if_needed(day);
        }
        if let ModeState::Challenge(c) = &mut self.mode_state {
            let value = self.portfolio.total_value(|sym| {
                self.price_states.get(sym).map(|s| s.price)
            });
            c.evaluate_day(day, value, self.config.starting_capital);
        }

        crate::clock::AdvanceOutcome::Advanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    #[test]
    fn new_session_seeds_every_catalog_symbol() {
        let cfg = Config::new(25_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Classic, 0, true);
        let session = Session::new(Uuid::new_v4(), None, cfg, start_date());
        assert_eq!(session.price_states.len(), catalog::CATALOG.len());
    }

    #[test]
    fn starting_capital_is_clamped() {
        let cfg = Config::new(5_000_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Classic, 0, true);
        assert_eq!(cfg.starting_capital, MAX_STARTING_CAPITAL);
    }

    #[test]
    fn custom_mode_forces_config() {
        let cfg = Config::new(999_999.0, RiskLevel::Aggressive, Difficulty::Hard, Mode::Custom, 2, true);
        assert_eq!(cfg.starting_capital, CUSTOM_MODE_STARTING_CAPITAL);
        assert_eq!(cfg.risk_level, RiskLevel::Moderate);
        assert_eq!(cfg.difficulty, Difficulty::Medium);
    }

    #[test]
    fn current_allocation_matches_invested_value_fractions() {
        let cfg = Config::new(40_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Portfolio, 0, true);
        let mut session = Session::new(Uuid::new_v4(), None, cfg, start_date());
        let growth_symbol = catalog::CATALOG
            .iter()
            .find(|i| i.kind == InstrumentType::Growth)
            .unwrap()
            .symbol
            .clone();
        let bond_symbol = catalog::CATALOG
            .iter()
            .find(|i| i.kind == InstrumentType::Bond)
            .unwrap()
            .symbol
            .clone();
        let growth_price = session.current_price(&growth_symbol).unwrap();
        let bond_price = session.current_price(&bond_symbol).unwrap();
        session.portfolio.positions.insert(
            growth_symbol,
            crate::portfolio::Position {
                quantity: 10,
                total_cost_basis: 10.0 * growth_price,
            },
        );
        session.portfolio.positions.insert(
            bond_symbol,
            crate::portfolio::Position {
                quantity: 10,
                total_cost_basis: 10.0 * bond_price,
            },
        );

        let allocation = session.current_allocation();
        let total: f64 = allocation.values().sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(allocation.get("etf").copied(), Some(0.0));

        let (current, target) = session.portfolio_allocation().unwrap();
        assert_eq!(current, allocation);
        assert_eq!(target.get("growth").copied(), Some(0.25));
    }

    #[test]
    fn custom_mode_clock_stops_after_week_budget() {
        let cfg = Config::new(10_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Custom, 1, true);
        let mut session = Session::new(Uuid::new_v4(), None, cfg, start_date());
        let mut rng = rand::thread_rng();
        for _ in 0..7 {
            assert_eq!(session.tick(&mut rng), crate::clock::AdvanceOutcome::Advanced);
        }
        assert_eq!(session.tick(&mut rng), crate::clock::AdvanceOutcome::Exhausted);
        assert_eq!(session.clock.day_count(), 7);
    }
}
