// =============================================================================
// Portfolio — cash, positions, shorts, and cost-basis accounting (C4)
// =============================================================================
//
// Pure data + bookkeeping helpers. Admission rules (cash checks, day-trade
// limits, etc.) live in `trader.rs`, which is the only writer of `Portfolio`
// besides save-restore (spec.md §3 Lifecycle, §9 "flatten the cyclic
// reference").
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeKind {
    Buy,
    Sell,
    ShortOpen,
    ShortClose,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub kind: TradeKind,
    pub symbol: String,
    pub quantity: u64,
    pub execution_price: f64,
    pub wall_timestamp: DateTime<Utc>,
    pub sim_timestamp: DateTime<Utc>,
    /// Realized gain/loss closed by this trade; `0.0` for `Buy`/`ShortOpen`,
    /// which only ever open exposure.
    pub realized_pnl: f64,
}

/// A long position. Invariant: removed from the map when `quantity` hits 0
/// (spec.md §3 Portfolio invariant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: u64,
    pub total_cost_basis: f64,
}

/// A short position, tracked separately from longs (spec.md §4.3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortPosition {
    pub quantity: u64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: f64,
    pub positions: HashMap<String, Position>,
    pub shorts: HashMap<String, ShortPosition>,
    pub realized_gains: f64,
}

impl Portfolio {
    pub fn new(starting_capital: f64) -> Self {
        Self {
            cash: starting_capital,
            positions: HashMap::new(),
            shorts: HashMap::new(),
            realized_gains: 0.0,
        }
    }

    pub fn position_quantity(&self, symbol: &str) -> u64 {
        self.positions.get(symbol).map(|p| p.quantity).unwrap_or(0)
    }

    pub fn short_quantity(&self, symbol: &str) -> u64 {
        self.shorts.get(symbol).map(|s| s.quantity).unwrap_or(0)
    }

    /// Total portfolio value given a price lookup: cash plus the mark-to-
    /// market value of longs minus the mark-to-market liability of shorts
    /// (spec.md §8 quantified invariant).
    pub fn total_value<F: Fn(&str) -> Option<f64>>(&self, price_of: F) -> f64 {
        let longs_value: f64 = self
            .positions
            .iter()
            .map(|(sym, pos)| price_of(sym).unwrap_or(0.0) * pos.quantity as f64)
            .sum();
        let shorts_liability: f64 = self
            .shorts
            .iter()
            .map(|(sym, short)| {
                let current = price_of(sym).unwrap_or(short.entry_price);
                (current - short.entry_price) * short.quantity as f64
            })
            .sum();
        self.cash + longs_value - shorts_liability
    }

    /// Unrealized P&L across all longs and shorts.
    pub fn unrealized_pnl<F: Fn(&str) -> Option<f64>>(&self, price_of: F) -> f64 {
        let longs: f64 = self
            .positions
            .iter()
            .map(|(sym, pos)| {
                let current = price_of(sym).unwrap_or(0.0);
                let avg_cost = if pos.quantity > 0 {
                    pos.total_cost_basis / pos.quantity as f64
                } else {
                    0.0
                };
                (current - avg_cost) * pos.quantity as f64
            })
            .sum();
        let shorts: f64 = self
            .shorts
            .iter()
            .map(|(sym, short)| {
                let current = price_of(sym).unwrap_or(short.entry_price);
                (short.entry_price - current) * short.quantity as f64
            })
            .sum();
        longs + shorts
    }

    /// Margin level: equity / used margin * 100. Returns `None` when there is
    /// no margin in use (division by zero avoided).
    pub fn margin_level<F: Fn(&str) -> Option<f64>>(&self, price_of: F, used_margin: f64) -> Option<f64> {
        if used_margin <= 0.0 {
            return None;
        }
        let equity = self.total_value(price_of);
        Some(equity / used_margin * 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_portfolio_has_no_positions() {
        let p = Portfolio::new(10_000.0);
        assert_eq!(p.cash, 10_000.0);
        assert!(p.positions.is_empty());
        assert!(p.shorts.is_empty());
    }

    #[test]
    fn total_value_accounts_for_longs_and_shorts() {
        let mut p = Portfolio::new(1000.0);
        p.positions.insert(
            "X".into(),
            Position {
                quantity: 10,
                total_cost_basis: 1000.0,
            },
        );
        p.shorts.insert(
            "Y".into(),
            ShortPosition {
                quantity: 5,
                entry_price: 50.0,
            },
        );
        // X now worth 120/share, Y now at 40 (short gained 10/share * 5 = 50).
        let value = p.total_value(|sym| match sym {
            "X" => Some(120.0),
            "Y" => Some(40.0),
            _ => None,
        });
        // cash 1000 + longs 1200 - shorts_liability(40-50)*5=-50 => 1000+1200-(-50)=2250
        assert_eq!(value, 2250.0);
    }

    #[test]
    fn margin_level_none_without_margin_in_use() {
        let p = Portfolio::new(1000.0);
        assert_eq!(p.margin_level(|_| Some(1.0), 0.0), None);
    }
}
