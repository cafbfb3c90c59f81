use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::Store;
use crate::models::{NewPosition, NewTrade, Portfolio, Position, PricePoint, Token, Trade};

/// In-process store used for paper trading without a database and in tests.
///
/// Every accessor yields to the scheduler once before touching state, so
/// concurrent callers interleave at the same points they would against a
/// real database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    fail_writes: Arc<AtomicBool>,
    fail_once: Arc<Mutex<HashSet<&'static str>>>,
}

#[derive(Default)]
struct Inner {
    portfolios: HashMap<Uuid, Portfolio>,
    positions: HashMap<Uuid, Position>,
    trades: Vec<Trade>,
    tokens: HashMap<Uuid, Token>,
    history: HashMap<Uuid, Vec<PricePoint>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test panicked mid-write; the maps are
        // still structurally valid.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self, op: &'static str) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            anyhow::bail!("memory store: writes disabled");
        }
        let armed = self
            .fail_once
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(op);
        if armed {
            anyhow::bail!("memory store: {op} failed");
        }
        Ok(())
    }

    /// Fail the next call to the named write (e.g. `"apply_cash_delta"`).
    pub fn fail_next(&self, op: &'static str) {
        self.fail_once
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(op);
    }

    /// Make every subsequent write fail, simulating a storage outage.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    // --- seeding helpers ---

    pub fn insert_portfolio(&self, portfolio: Portfolio) -> Portfolio {
        self.lock().portfolios.insert(portfolio.id, portfolio.clone());
        portfolio
    }

    pub fn insert_token(&self, symbol: &str, price: Decimal) -> Token {
        let token = Token {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            current_price: price,
            volume_24h: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        self.lock().tokens.insert(token.id, token.clone());
        token
    }

    /// Update a token's quote and append it to the price history.
    pub fn set_price(&self, token_id: Uuid, price: Decimal) {
        let mut inner = self.lock();
        let now = Utc::now();
        if let Some(token) = inner.tokens.get_mut(&token_id) {
            token.current_price = price;
            token.updated_at = now;
        }
        inner
            .history
            .entry(token_id)
            .or_default()
            .push(PricePoint::new(price, Decimal::ZERO, now));
    }

    pub fn push_price_points(&self, token_id: Uuid, points: &[PricePoint]) {
        self.lock()
            .history
            .entry(token_id)
            .or_default()
            .extend_from_slice(points);
    }

    pub fn portfolio(&self, id: Uuid) -> Option<Portfolio> {
        self.lock().portfolios.get(&id).cloned()
    }

    pub fn positions_for(&self, portfolio_id: Uuid) -> Vec<Position> {
        self.lock()
            .positions
            .values()
            .filter(|p| p.portfolio_id == portfolio_id)
            .cloned()
            .collect()
    }

    pub fn trades_for(&self, portfolio_id: Uuid) -> Vec<Trade> {
        self.lock()
            .trades
            .iter()
            .filter(|t| t.portfolio_id == portfolio_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_portfolio(&self, id: Uuid) -> anyhow::Result<Option<Portfolio>> {
        tokio::task::yield_now().await;
        Ok(self.lock().portfolios.get(&id).cloned())
    }

    async fn list_auto_trading_portfolios(&self) -> anyhow::Result<Vec<Portfolio>> {
        tokio::task::yield_now().await;
        let mut portfolios: Vec<Portfolio> = self
            .lock()
            .portfolios
            .values()
            .filter(|p| p.auto_trading_enabled)
            .cloned()
            .collect();
        portfolios.sort_by_key(|p| p.id);
        Ok(portfolios)
    }

    async fn set_auto_trading(&self, id: Uuid, enabled: bool) -> anyhow::Result<Option<Portfolio>> {
        tokio::task::yield_now().await;
        self.check_writable("set_auto_trading")?;
        let mut inner = self.lock();
        Ok(inner.portfolios.get_mut(&id).map(|p| {
            p.auto_trading_enabled = enabled;
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn apply_cash_delta(
        &self,
        id: Uuid,
        cash_delta: Decimal,
        realized_pnl_delta: Decimal,
    ) -> anyhow::Result<Option<Portfolio>> {
        tokio::task::yield_now().await;
        self.check_writable("apply_cash_delta")?;
        let mut inner = self.lock();
        Ok(inner.portfolios.get_mut(&id).map(|p| {
            p.cash_balance += cash_delta;
            p.realized_pnl += realized_pnl_delta;
            p.updated_at = Utc::now();
            p.clone()
        }))
    }

    async fn update_valuation(
        &self,
        id: Uuid,
        total_value: Decimal,
        total_pnl: Decimal,
    ) -> anyhow::Result<()> {
        tokio::task::yield_now().await;
        self.check_writable("update_valuation")?;
        if let Some(p) = self.lock().portfolios.get_mut(&id) {
            p.total_value = total_value;
            p.total_pnl = total_pnl;
            p.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        tokio::task::yield_now().await;
        Ok(self.lock().positions.get(&id).cloned())
    }

    async fn find_position(&self, portfolio_id: Uuid, token_id: Uuid) -> anyhow::Result<Option<Position>> {
        tokio::task::yield_now().await;
        Ok(self
            .lock()
            .positions
            .values()
            .find(|p| p.portfolio_id == portfolio_id && p.token_id == token_id)
            .cloned())
    }

    async fn open_positions(&self, portfolio_id: Uuid) -> anyhow::Result<Vec<Position>> {
        tokio::task::yield_now().await;
        let mut positions: Vec<Position> = self
            .lock()
            .positions
            .values()
            .filter(|p| p.portfolio_id == portfolio_id && p.is_open())
            .cloned()
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        Ok(positions)
    }

    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position> {
        tokio::task::yield_now().await;
        self.check_writable("create_position")?;
        let mut inner = self.lock();
        if inner
            .positions
            .values()
            .any(|p| p.portfolio_id == new.portfolio_id && p.token_id == new.token_id)
        {
            anyhow::bail!(
                "position for portfolio {} token {} already exists",
                new.portfolio_id,
                new.token_id
            );
        }
        let now = Utc::now();
        let position = Position {
            id: Uuid::new_v4(),
            portfolio_id: new.portfolio_id,
            token_id: new.token_id,
            amount: new.amount,
            average_buy_price: new.average_buy_price,
            entry_trade_id: new.entry_trade_id,
            opened_at: now,
            updated_at: now,
        };
        inner.positions.insert(position.id, position.clone());
        Ok(position)
    }

    async fn reopen_position(
        &self,
        id: Uuid,
        amount: Decimal,
        average_buy_price: Decimal,
        entry_trade_id: Uuid,
    ) -> anyhow::Result<Option<Position>> {
        tokio::task::yield_now().await;
        self.check_writable("reopen_position")?;
        let mut inner = self.lock();
        Ok(inner
            .positions
            .get_mut(&id)
            .filter(|p| p.amount.is_zero())
            .map(|p| {
                let now = Utc::now();
                p.amount = amount;
                p.average_buy_price = average_buy_price;
                p.entry_trade_id = Some(entry_trade_id);
                p.opened_at = now;
                p.updated_at = now;
                p.clone()
            }))
    }

    async fn close_position(&self, id: Uuid, expected_amount: Decimal) -> anyhow::Result<bool> {
        tokio::task::yield_now().await;
        self.check_writable("close_position")?;
        let mut inner = self.lock();
        match inner.positions.get_mut(&id) {
            Some(p) if p.is_open() && p.amount == expected_amount => {
                p.amount = Decimal::ZERO;
                p.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn restore_position(&self, id: Uuid, amount: Decimal) -> anyhow::Result<bool> {
        tokio::task::yield_now().await;
        self.check_writable("restore_position")?;
        let mut inner = self.lock();
        match inner.positions.get_mut(&id) {
            Some(p) if p.amount.is_zero() => {
                p.amount = amount;
                p.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_trade(&self, new: NewTrade) -> anyhow::Result<Trade> {
        tokio::task::yield_now().await;
        self.check_writable("insert_trade")?;
        let trade = Trade {
            id: Uuid::new_v4(),
            portfolio_id: new.portfolio_id,
            token_id: new.token_id,
            trade_type: new.trade_type.as_str().to_string(),
            amount: new.amount,
            price: new.price,
            total_value: new.amount * new.price,
            pattern_id: new.pattern_id,
            pattern_type: new.pattern_type,
            reason: new.reason,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
            executed_at: Utc::now(),
        };
        self.lock().trades.push(trade.clone());
        Ok(trade)
    }

    async fn get_trade(&self, id: Uuid) -> anyhow::Result<Option<Trade>> {
        tokio::task::yield_now().await;
        Ok(self.lock().trades.iter().find(|t| t.id == id).cloned())
    }

    async fn delete_trade(&self, id: Uuid) -> anyhow::Result<bool> {
        tokio::task::yield_now().await;
        self.check_writable("delete_trade")?;
        let mut inner = self.lock();
        let before = inner.trades.len();
        inner.trades.retain(|t| t.id != id || t.is_closed());
        Ok(inner.trades.len() < before)
    }

    async fn find_open_buy_trade(
        &self,
        portfolio_id: Uuid,
        token_id: Uuid,
        price: Decimal,
    ) -> anyhow::Result<Option<Trade>> {
        tokio::task::yield_now().await;
        Ok(self
            .lock()
            .trades
            .iter()
            .rev()
            .find(|t| {
                t.portfolio_id == portfolio_id
                    && t.token_id == token_id
                    && t.trade_type == "buy"
                    && t.price == price
                    && !t.is_closed()
            })
            .cloned())
    }

    async fn close_trade(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Trade>> {
        tokio::task::yield_now().await;
        self.check_writable("close_trade")?;
        let mut inner = self.lock();
        Ok(inner.trades.iter_mut().find(|t| t.id == id).map(|t| {
            t.exit_price = Some(exit_price);
            t.realized_pnl = Some(realized_pnl);
            t.closed_at = Some(closed_at);
            t.clone()
        }))
    }

    async fn closed_trades_for_pattern(
        &self,
        pattern_type: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Trade>> {
        tokio::task::yield_now().await;
        Ok(self
            .lock()
            .trades
            .iter()
            .rev()
            .filter(|t| t.is_closed() && t.pattern_type.as_deref() == Some(pattern_type))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn recent_closed_trades(&self, limit: i64) -> anyhow::Result<Vec<Trade>> {
        tokio::task::yield_now().await;
        Ok(self
            .lock()
            .trades
            .iter()
            .rev()
            .filter(|t| t.is_closed())
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        tokio::task::yield_now().await;
        Ok(self.lock().tokens.get(&id).cloned())
    }

    async fn price_history(&self, token_id: Uuid, limit: i64) -> anyhow::Result<Vec<PricePoint>> {
        tokio::task::yield_now().await;
        let inner = self.lock();
        let history = inner.history.get(&token_id).map(Vec::as_slice).unwrap_or(&[]);
        let start = history.len().saturating_sub(limit.max(0) as usize);
        Ok(history[start..].to_vec())
    }
}
