use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// In-memory decision state for one auto-trading portfolio.
///
/// Created on enable, dropped on disable. Nothing here is persisted; the
/// stored `auto_trading_enabled` flag is the source of truth and this is a
/// cache rebuilt from it.
#[derive(Debug)]
pub struct PortfolioState {
    sell_only: AtomicBool,
    selling: Mutex<HashSet<Uuid>>,
    counters: Mutex<TradeCounters>,
    buy_lock: tokio::sync::Mutex<()>,
}

#[derive(Debug, Clone, Copy)]
struct TradeCounters {
    total: u64,
    today: u64,
    day: NaiveDate,
}

/// Releases a position from the selling set when dropped.
#[must_use = "the sell guard is released as soon as it is dropped"]
pub struct SellGuard<'a> {
    selling: &'a Mutex<HashSet<Uuid>>,
    position_id: Uuid,
}

impl Drop for SellGuard<'_> {
    fn drop(&mut self) {
        self.selling
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.position_id);
    }
}

impl PortfolioState {
    pub fn new(sell_only: bool) -> Self {
        Self {
            sell_only: AtomicBool::new(sell_only),
            selling: Mutex::new(HashSet::new()),
            counters: Mutex::new(TradeCounters {
                total: 0,
                today: 0,
                day: Utc::now().date_naive(),
            }),
            buy_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn is_sell_only(&self) -> bool {
        self.sell_only.load(Ordering::Acquire)
    }

    /// Re-evaluate sell-only mode with hysteresis: enter below `enter_below`,
    /// leave only at or above `exit_at`. Returns the new mode if it changed.
    pub fn update_mode(&self, cash: Decimal, enter_below: Decimal, exit_at: Decimal) -> Option<bool> {
        let current = self.is_sell_only();
        let next = if current { cash < exit_at } else { cash < enter_below };
        if next == current {
            return None;
        }
        match self
            .sell_only
            .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Some(next),
            Err(_) => None,
        }
    }

    /// Claim `position_id` for selling. `None` when a sell is already in flight.
    pub fn try_begin_sell(&self, position_id: Uuid) -> Option<SellGuard<'_>> {
        let mut selling = self.selling_set();
        if !selling.insert(position_id) {
            return None;
        }
        Some(SellGuard {
            selling: &self.selling,
            position_id,
        })
    }

    pub fn is_selling(&self, position_id: Uuid) -> bool {
        self.selling_set().contains(&position_id)
    }

    pub fn selling_count(&self) -> usize {
        self.selling_set().len()
    }

    /// Serialises buys within this portfolio.
    pub async fn lock_buys(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.buy_lock.lock().await
    }

    pub fn record_trade(&self, at: DateTime<Utc>) {
        let mut c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let day = at.date_naive();
        if day != c.day {
            c.day = day;
            c.today = 0;
        }
        c.total += 1;
        c.today += 1;
    }

    /// `(total, today)` trade counts as of `now`.
    pub fn trade_counts(&self, now: DateTime<Utc>) -> (u64, u64) {
        let c = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let today = if c.day == now.date_naive() { c.today } else { 0 };
        (c.total, today)
    }

    fn selling_set(&self) -> MutexGuard<'_, HashSet<Uuid>> {
        self.selling.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_hysteresis_band() {
        let state = PortfolioState::new(false);
        let enter = Decimal::from(500);
        let exit = Decimal::from(1_000);

        assert_eq!(state.update_mode(Decimal::from(600), enter, exit), None);
        assert_eq!(state.update_mode(Decimal::from(499), enter, exit), Some(true));
        // Inside the band stays sell-only
        assert_eq!(state.update_mode(Decimal::from(800), enter, exit), None);
        assert!(state.is_sell_only());
        assert_eq!(state.update_mode(Decimal::from(1_000), enter, exit), Some(false));
        assert!(!state.is_sell_only());
    }

    #[test]
    fn test_sell_guard_released_on_drop() {
        let state = PortfolioState::new(false);
        let id = Uuid::new_v4();

        let guard = state.try_begin_sell(id).expect("first claim");
        assert!(state.is_selling(id));
        assert!(state.try_begin_sell(id).is_none());

        drop(guard);
        assert!(!state.is_selling(id));
        assert_eq!(state.selling_count(), 0);
    }

    #[test]
    fn test_counters_roll_over_by_day() {
        let state = PortfolioState::new(false);
        let now = Utc::now();
        state.record_trade(now);
        state.record_trade(now);
        assert_eq!(state.trade_counts(now), (2, 2));

        let tomorrow = now + Duration::days(1);
        assert_eq!(state.trade_counts(tomorrow), (2, 0));
        state.record_trade(tomorrow);
        assert_eq!(state.trade_counts(tomorrow), (3, 1));
    }
}
