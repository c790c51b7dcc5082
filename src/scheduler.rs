// =============================================================================
// Clock Scheduler — one parallel task per Session driving ticks (C4.8 / §9
// "ambient event loop + setInterval" re-architected as an explicit task)
// =============================================================================
//
// Cancellation is an explicit token rather than dropping the task handle, so
// a caller can await completion after requesting a stop (spec.md §5
// shutdown sequence: "stops accepting new orders ... waits up to 10 seconds
// for in-flight work").
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcaster::{Broadcaster, BroadcastMessage};
use crate::clock::AdvanceOutcome;
use crate::session::Session;

/// Explicit cancellation token for a scheduler task (spec.md §9 Design
/// Note: "cancellation via a token"). Cheap to clone; `cancel()` wakes any
/// task awaiting `cancelled()`.
#[derive(Clone)]
struct CancelToken {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelToken {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    async fn cancelled(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            return;
        }
        self.notify.notified().await;
    }
}

pub struct SessionScheduler {
    cancel: CancelToken,
}

impl SessionScheduler {
    /// Spawn the per-Session ticking task. The task acquires `session`'s
    /// mutex once per tick, advances it, and publishes a portfolio update
    /// (spec.md §2 Flow, §4.8, §5). `publish_market` gates whether this
    /// Session's per-symbol price ticks also feed the shared `market_data`
    /// topic — only the designated reference market Session does, since
    /// every private Session otherwise runs its own independent price tape
    /// and would otherwise flood `market_data` with conflicting updates for
    /// the same symbol.
    pub fn spawn(session: Arc<Mutex<Session>>, broadcaster: Arc<Broadcaster>, publish_market: bool) -> Self {
        let cancel = CancelToken::new();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            loop {
                let (interval_ms, session_id) = {
                    let guard = session.lock();
                    (guard.clock.tick_interval_ms(), guard.id)
                };

                tokio::select! {
                    _ = task_cancel.cancelled() => {
                        debug!(session = %session_id, "scheduler cancelled");
                        break;
                    }
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {}
                }

                let (outcome, updates, sim_date, cash, total_value) = {
                    let mut guard = session.lock();
                    let mut rng = rand::thread_rng();
                    let outcome = guard.tick(&mut rng);
                    let sim_date = guard.clock.simulated_date().to_string();
                    let updates: Vec<(String, f64)> = guard
                        .price_states
                        .iter()
                        .map(|(sym, state)| (sym.clone(), state.price))
                        .collect();
                    let cash = guard.portfolio.cash;
                    let total_value = guard.total_value();
                    (outcome, updates, sim_date, cash, total_value)
                };

                if outcome == AdvanceOutcome::Exhausted {
                    info!(session = %session_id, "session's time budget exhausted");
                    continue;
                }

                if publish_market {
                    for (symbol, price) in updates {
                        broadcaster
                            .publish(BroadcastMessage::MarketUpdate {
                                symbol,
                                price,
                                sim_date: sim_date.clone(),
                            })
                            .await;
                    }
                }
                broadcaster
                    .publish(BroadcastMessage::PortfolioUpdate {
                        session_id,
                        cash,
                        total_value,
                    })
                    .await;
            }
        });

        Self { cancel }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// A substitutable manual driver for tests (spec.md §9 Design Note: "test
/// by substituting a manual driver"). Ticks a Session exactly once, without
/// a background task or wall-clock sleep.
pub fn drive_once<R: rand::Rng + ?Sized>(session: &mut Session, rng: &mut R) -> AdvanceOutcome {
    session.tick(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog;
    use crate::mode::Mode;
    use crate::price_engine::{Difficulty, RiskLevel};
    use crate::session::Config;
    use chrono::NaiveDate;

    #[test]
    fn manual_driver_advances_one_day() {
        let cfg = Config::new(25_000.0, RiskLevel::Moderate, Difficulty::Medium, Mode::Classic, 0, true);
        let mut session = Session::new(
            Uuid::new_v4(),
            None,
            cfg,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        );
        let mut rng = rand::thread_rng();
        let before = session.clock.day_count();
        let outcome = drive_once(&mut session, &mut rng);
        assert_eq!(outcome, AdvanceOutcome::Advanced);
        assert_eq!(session.clock.day_count(), before + 1);
        assert!(!catalog::CATALOG.is_empty());
    }
}
