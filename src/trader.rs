// =============================================================================
// Trader — order admission, mode rules, and execution against mid-price (C6)
// =============================================================================
//
// A pure operator over a `Session`, not a field of it (spec.md §9: "flatten
// the cyclic reference"). Every operation either fully mutates `cash`,
// `position`/`shorts`, `trades`, and `mode_state` together, or returns an
// error leaving the Session untouched (spec.md §4.3 atomicity contract).
// =============================================================================

use chrono::Utc;
use uuid::Uuid;

use crate::catalog;
use crate::error::TradeError;
use crate::mode::{DAYTRADER_MAX_TRADES_PER_DAY, ModeState};
use crate::portfolio::{Position, ShortPosition, Trade, TradeKind};
use crate::session::{Session, COMMISSION_RATE};

pub struct Trader;

impl Trader {
    fn require_known_symbol(symbol: &str) -> Result<(), TradeError> {
        if catalog::lookup(symbol).is_none() {
            return Err(TradeError::SymbolUnknown(symbol.to_string()));
        }
        Ok(())
    }

    fn require_positive_quantity(quantity: u64) -> Result<(), TradeError> {
        if quantity == 0 {
            return Err(TradeError::InvalidQuantity);
        }
        Ok(())
    }

    /// Check (without mutating) whether a day-trader order would exceed the
    /// daily cap, rolling the counter over to a new day first if needed.
    fn check_and_roll_daytrader(session: &mut Session) -> Result<(), TradeError> {
        let day = session.clock.day_count();
        if let ModeState::Daytrader(d) = &mut session.mode_state {
            d.roll_day_if_needed(day);
            if d.trades_today >= DAYTRADER_MAX_TRADES_PER_DAY {
                return Err(TradeError::DayTradeLimitExceeded {
                    limit: DAYTRADER_MAX_TRADES_PER_DAY,
                });
            }
        }
        Ok(())
    }

    fn record_daytrader_trade(session: &mut Session) {
        if let ModeState::Daytrader(d) = &mut session.mode_state {
            d.trades_today += 1;
        }
    }

    fn push_trade(
        session: &mut Session,
        kind: TradeKind,
        symbol: &str,
        quantity: u64,
        price: f64,
        realized_pnl: f64,
    ) {
        session.trades.push(Trade {
            id: Uuid::new_v4(),
            kind,
            symbol: symbol.to_string(),
            quantity,
            execution_price: price,
            wall_timestamp: Utc::now(),
            sim_timestamp: session
                .clock
                .simulated_date()
                .and_hms_opt(0, 0, 0)
                .unwrap()
                .and_utc(),
            realized_pnl,
        });
    }

    /// Buy `quantity` shares of `symbol` at the current price (spec.md §4.3).
    pub fn buy(session: &mut Session, symbol: &str, quantity: u64) -> Result<Trade, TradeError> {
        Self::require_known_symbol(symbol)?;
        Self::require_positive_quantity(quantity)?;
        if session.portfolio.short_quantity(symbol) > 0 {
            return Err(TradeError::ConflictingShortPosition);
        }
        Self::check_and_roll_daytrader(session)?;

        let price = session.current_price(symbol).expect("known symbol has a price");
        let notional = price * quantity as f64;
        let commission = if session.config.commission_enabled {
            notional * COMMISSION_RATE
        } else {
            0.0
        };
        let cost = notional + commission;

        let admissible_cash = if session.config.margin_enabled {
            session.portfolio.cash * session.config.margin_multiplier
        } else {
            session.portfolio.cash
        };
        if cost > admissible_cash {
            return Err(TradeError::InsufficientCash {
                needed: cost,
                available: admissible_cash,
            });
        }

        session.portfolio.cash -= cost;
        let entry = session
            .portfolio
            .positions
            .entry(symbol.to_string())
            .or_insert(Position {
                quantity: 0,
                total_cost_basis: 0.0,
            });
        entry.quantity += quantity;
        entry.total_cost_basis += notional;

        Self::record_daytrader_trade(session);
        Self::push_trade(session, TradeKind::Buy, symbol, quantity, price, 0.0);
        Ok(session.trades.last().unwrap().clone())
    }

    /// Sell `quantity` shares of `symbol` at the current price, using
    /// average-cost basis (spec.md §4.3).
    pub fn sell(session: &mut Session, symbol: &str, quantity: u64) -> Result<Trade, TradeError> {
        Self::require_known_symbol(symbol)?;
        Self::require_positive_quantity(quantity)?;

        let held = session.portfolio.position_quantity(symbol);
        if held < quantity {
            return Err(TradeError::InsufficientShares {
                needed: quantity,
                available: held,
            });
        }
        Self::check_and_roll_daytrader(session)?;

        let price = session.current_price(symbol).expect("known symbol has a price");
        let notional = price * quantity as f64;
        let commission = if session.config.commission_enabled {
            notional * COMMISSION_RATE
        } else {
            0.0
        };
        let proceeds = notional - commission;

        let pos = session
            .portfolio
            .positions
            .get_mut(symbol)
            .expect("checked held >= quantity above");
        let avg_cost = pos.total_cost_basis / pos.quantity as f64;
        let cost_removed = avg_cost * quantity as f64;
        let realized = notional - cost_removed - commission;

        pos.quantity -= quantity;
        pos.total_cost_basis -= cost_removed;
        if pos.quantity == 0 {
            session.portfolio.positions.remove(symbol);
        }

        session.portfolio.cash += proceeds;
        session.portfolio.realized_gains += realized;

        Self::record_daytrader_trade(session);
        Self::push_trade(session, TradeKind::Sell, symbol, quantity, price, realized);
        Ok(session.trades.last().unwrap().clone())
    }

    /// Open a short position (spec.md §4.3). Prohibited while a long is held
    /// (spec.md §9 Open Question: the spec prohibits both directions to keep
    /// positions unambiguous).
    pub fn open_short(session: &mut Session, symbol: &str, quantity: u64) -> Result<Trade, TradeError> {
        Self::require_known_symbol(symbol)?;
        Self::require_positive_quantity(quantity)?;
        if session.portfolio.position_quantity(symbol) > 0 {
            return Err(TradeError::ConflictingLongPosition);
        }

        let price = session.current_price(symbol).expect("known symbol has a price");
        let notional = price * quantity as f64;
        let commission = if session.config.commission_enabled {
            notional * COMMISSION_RATE
        } else {
            0.0
        };

        session.portfolio.cash += notional - commission;
        let entry = session
            .portfolio
            .shorts
            .entry(symbol.to_string())
            .or_insert(ShortPosition {
                quantity: 0,
                entry_price: price,
            });
        // Weighted-average entry price across successive short opens.
        let total_qty = entry.quantity + quantity;
        entry.entry_price =
            (entry.entry_price * entry.quantity as f64 + price * quantity as f64) / total_qty as f64;
        entry.quantity = total_qty;

        Self::push_trade(session, TradeKind::ShortOpen, symbol, quantity, price, 0.0);
        Ok(session.trades.last().unwrap().clone())
    }

    /// Close (all or part of) a short position (spec.md §4.3).
    pub fn close_short(session: &mut Session, symbol: &str, quantity: u64) -> Result<Trade, TradeError> {
        Self::require_known_symbol(symbol)?;
        Self::require_positive_quantity(quantity)?;

        let Some(short) = session.portfolio.shorts.get(symbol).cloned() else {
            return Err(TradeError::NoShortPosition(symbol.to_string()));
        };
        if quantity > short.quantity {
            return Err(TradeError::QuantityExceedsShort {
                requested: quantity,
                held: short.quantity,
            });
        }

        let price = session.current_price(symbol).expect("known symbol has a price");
        let notional = price * quantity as f64;
        let commission = if session.config.commission_enabled {
            notional * COMMISSION_RATE
        } else {
            0.0
        };
        let debit = notional + commission;
        let realized = (short.entry_price - price) * quantity as f64 - commission;

        session.portfolio.cash -= debit;
        session.portfolio.realized_gains += realized;

        let remaining = short.quantity - quantity;
        if remaining == 0 {
            session.portfolio.shorts.remove(symbol);
        } else {
            session.portfolio.shorts.insert(
                symbol.to_string(),
                ShortPosition {
                    quantity: remaining,
                    entry_price: short.entry_price,
                },
            );
        }

        Self::push_trade(session, TradeKind::ShortClose, symbol, quantity, price, realized);
        Ok(session.trades.last().unwrap().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Mode;
    use crate::price_engine::{Difficulty, RiskLevel};
    use crate::session::Config;
    use chrono::NaiveDate;

    fn session_with_price(mode: Mode, price: f64) -> Session {
        let cfg = Config::new(25_000.0, RiskLevel::Moderate, Difficulty::Medium, mode, 1, true);
        let mut session = Session::new(
            Uuid::new_v4(),
            None,
            cfg,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let symbol = catalog::CATALOG[0].symbol.clone();
        session
            .price_states
            .get_mut(&symbol)
            .unwrap()
            .price = price;
        session
    }

    fn sym(session: &Session) -> String {
        catalog::CATALOG[0].symbol.clone()
    }

    #[test]
    fn buy_then_sell_round_trips_cash_without_commission() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::buy(&mut session, &symbol, 10).unwrap();
        assert_eq!(session.portfolio.cash, 24_000.0);
        assert_eq!(session.portfolio.position_quantity(&symbol), 10);

        Trader::sell(&mut session, &symbol, 10).unwrap();
        assert_eq!(session.portfolio.cash, 25_000.0);
        assert_eq!(session.portfolio.position_quantity(&symbol), 0);
        assert_eq!(session.trades.len(), 2);
    }

    #[test]
    fn buy_then_sell_at_higher_price_realizes_gain() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::buy(&mut session, &symbol, 10).unwrap();
        session.price_states.get_mut(&symbol).unwrap().price = 110.0;
        Trader::sell(&mut session, &symbol, 10).unwrap();
        assert_eq!(session.portfolio.cash, 25_100.0);
        assert_eq!(session.portfolio.realized_gains, 100.0);
    }

    #[test]
    fn zero_quantity_is_rejected() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        let err = Trader::buy(&mut session, &symbol, 0).unwrap_err();
        assert_eq!(err, TradeError::InvalidQuantity);
    }

    #[test]
    fn unknown_symbol_is_rejected() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let err = Trader::buy(&mut session, "NOPE1", 1).unwrap_err();
        assert_eq!(err, TradeError::SymbolUnknown("NOPE1".to_string()));
    }

    #[test]
    fn insufficient_cash_is_rejected_and_state_is_untouched() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        let before_cash = session.portfolio.cash;
        let err = Trader::buy(&mut session, &symbol, 1_000_000).unwrap_err();
        assert!(matches!(err, TradeError::InsufficientCash { .. }));
        assert_eq!(session.portfolio.cash, before_cash);
        assert!(session.trades.is_empty());
    }

    #[test]
    fn commission_is_applied_symmetrically_when_enabled() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        session.config.commission_enabled = true;
        let symbol = sym(&session);
        let starting_cash = session.portfolio.cash;
        Trader::buy(&mut session, &symbol, 10).unwrap();
        Trader::sell(&mut session, &symbol, 10).unwrap();
        let commission = 100.0 * 10.0 * COMMISSION_RATE;
        assert!((session.portfolio.cash - (starting_cash - 2.0 * commission)).abs() < 1e-9);
    }

    #[test]
    fn daytrader_limit_blocks_fourth_same_day_trade() {
        let mut session = session_with_price(Mode::Daytrader, 100.0);
        let symbol = sym(&session);
        Trader::buy(&mut session, &symbol, 1).unwrap();
        Trader::sell(&mut session, &symbol, 1).unwrap();
        Trader::buy(&mut session, &symbol, 1).unwrap();
        let err = Trader::sell(&mut session, &symbol, 1).unwrap_err();
        assert_eq!(
            err,
            TradeError::DayTradeLimitExceeded { limit: DAYTRADER_MAX_TRADES_PER_DAY }
        );

        // Advance to the next simulated day — the limit resets.
        let mut rng = rand::thread_rng();
        session.tick(&mut rng);
        Trader::buy(&mut session, &symbol, 1).unwrap();
    }

    #[test]
    fn short_then_close_realizes_gain_on_price_drop() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::open_short(&mut session, &symbol, 10).unwrap();
        assert_eq!(session.portfolio.short_quantity(&symbol), 10);

        session.price_states.get_mut(&symbol).unwrap().price = 90.0;
        Trader::close_short(&mut session, &symbol, 10).unwrap();
        assert_eq!(session.portfolio.short_quantity(&symbol), 0);
        assert_eq!(session.portfolio.realized_gains, 100.0);
    }

    #[test]
    fn cannot_open_short_while_long_held() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::buy(&mut session, &symbol, 1).unwrap();
        let err = Trader::open_short(&mut session, &symbol, 1).unwrap_err();
        assert_eq!(err, TradeError::ConflictingLongPosition);
    }

    #[test]
    fn cannot_buy_long_while_short_held() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::open_short(&mut session, &symbol, 1).unwrap();
        let err = Trader::buy(&mut session, &symbol, 1).unwrap_err();
        assert_eq!(err, TradeError::ConflictingShortPosition);
    }

    #[test]
    fn closing_more_than_short_quantity_is_rejected() {
        let mut session = session_with_price(Mode::Classic, 100.0);
        let symbol = sym(&session);
        Trader::open_short(&mut session, &symbol, 5).unwrap();
        let err = Trader::close_short(&mut session, &symbol, 6).unwrap_err();
        assert_eq!(
            err,
            TradeError::QuantityExceedsShort { requested: 6, held: 5 }
        );
    }
}
