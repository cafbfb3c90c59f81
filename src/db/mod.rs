pub mod memory;
pub mod portfolio_repo;
pub mod position_repo;
pub mod token_repo;
pub mod trade_repo;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewPosition, NewTrade, Portfolio, Position, PricePoint, Token, Trade};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Persistence accessors consumed by the decision engine.
///
/// "Not found" is `Ok(None)`. Two operations are conditional so concurrent
/// writers cannot both win: [`Store::close_position`] only zeroes a row whose
/// amount still matches, and [`Store::reopen_position`] only revives a row
/// that is currently soft-closed.
#[async_trait]
pub trait Store: Send + Sync {
    // --- portfolios ---
    async fn get_portfolio(&self, id: Uuid) -> anyhow::Result<Option<Portfolio>>;
    async fn list_auto_trading_portfolios(&self) -> anyhow::Result<Vec<Portfolio>>;
    async fn set_auto_trading(&self, id: Uuid, enabled: bool) -> anyhow::Result<Option<Portfolio>>;
    /// Atomically add `cash_delta` to cash and `realized_pnl_delta` to realized P&L.
    async fn apply_cash_delta(
        &self,
        id: Uuid,
        cash_delta: Decimal,
        realized_pnl_delta: Decimal,
    ) -> anyhow::Result<Option<Portfolio>>;
    async fn update_valuation(
        &self,
        id: Uuid,
        total_value: Decimal,
        total_pnl: Decimal,
    ) -> anyhow::Result<()>;

    // --- positions ---
    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>>;
    /// The position row for (portfolio, token), open or soft-closed.
    async fn find_position(&self, portfolio_id: Uuid, token_id: Uuid) -> anyhow::Result<Option<Position>>;
    async fn open_positions(&self, portfolio_id: Uuid) -> anyhow::Result<Vec<Position>>;
    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position>;
    /// Revive a soft-closed row. `None` if the row is missing or already open.
    async fn reopen_position(
        &self,
        id: Uuid,
        amount: Decimal,
        average_buy_price: Decimal,
        entry_trade_id: Uuid,
    ) -> anyhow::Result<Option<Position>>;
    /// Compare-and-swap close: set amount to zero only if it still equals
    /// `expected_amount`. Returns whether this caller performed the close.
    async fn close_position(&self, id: Uuid, expected_amount: Decimal) -> anyhow::Result<bool>;
    /// Undo a close: put `amount` back on a row that is still at zero.
    async fn restore_position(&self, id: Uuid, amount: Decimal) -> anyhow::Result<bool>;

    // --- trades ---
    async fn insert_trade(&self, new: NewTrade) -> anyhow::Result<Trade>;
    async fn get_trade(&self, id: Uuid) -> anyhow::Result<Option<Trade>>;
    /// Remove an open trade row. Closed trades are kept.
    async fn delete_trade(&self, id: Uuid) -> anyhow::Result<bool>;
    /// Most recent open buy trade for (portfolio, token) at exactly `price`.
    async fn find_open_buy_trade(
        &self,
        portfolio_id: Uuid,
        token_id: Uuid,
        price: Decimal,
    ) -> anyhow::Result<Option<Trade>>;
    async fn close_trade(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Trade>>;
    /// Closed trades that originated from `pattern_type` (most recent first).
    async fn closed_trades_for_pattern(
        &self,
        pattern_type: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Trade>>;
    async fn recent_closed_trades(&self, limit: i64) -> anyhow::Result<Vec<Trade>>;

    // --- tokens ---
    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>>;
    /// Up to `limit` most recent samples, returned in ascending time order.
    async fn price_history(&self, token_id: Uuid, limit: i64) -> anyhow::Result<Vec<PricePoint>>;

    async fn ping(&self) -> bool {
        true
    }
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_portfolio(&self, id: Uuid) -> anyhow::Result<Option<Portfolio>> {
        portfolio_repo::get_portfolio(&self.pool, id).await
    }

    async fn list_auto_trading_portfolios(&self) -> anyhow::Result<Vec<Portfolio>> {
        portfolio_repo::list_auto_trading(&self.pool).await
    }

    async fn set_auto_trading(&self, id: Uuid, enabled: bool) -> anyhow::Result<Option<Portfolio>> {
        portfolio_repo::set_auto_trading(&self.pool, id, enabled).await
    }

    async fn apply_cash_delta(
        &self,
        id: Uuid,
        cash_delta: Decimal,
        realized_pnl_delta: Decimal,
    ) -> anyhow::Result<Option<Portfolio>> {
        portfolio_repo::apply_cash_delta(&self.pool, id, cash_delta, realized_pnl_delta).await
    }

    async fn update_valuation(
        &self,
        id: Uuid,
        total_value: Decimal,
        total_pnl: Decimal,
    ) -> anyhow::Result<()> {
        portfolio_repo::update_valuation(&self.pool, id, total_value, total_pnl).await
    }

    async fn get_position(&self, id: Uuid) -> anyhow::Result<Option<Position>> {
        position_repo::get_position(&self.pool, id).await
    }

    async fn find_position(&self, portfolio_id: Uuid, token_id: Uuid) -> anyhow::Result<Option<Position>> {
        position_repo::find_position(&self.pool, portfolio_id, token_id).await
    }

    async fn open_positions(&self, portfolio_id: Uuid) -> anyhow::Result<Vec<Position>> {
        position_repo::get_open_positions(&self.pool, portfolio_id).await
    }

    async fn create_position(&self, new: NewPosition) -> anyhow::Result<Position> {
        position_repo::insert_position(&self.pool, &new).await
    }

    async fn reopen_position(
        &self,
        id: Uuid,
        amount: Decimal,
        average_buy_price: Decimal,
        entry_trade_id: Uuid,
    ) -> anyhow::Result<Option<Position>> {
        position_repo::reopen_position(&self.pool, id, amount, average_buy_price, entry_trade_id).await
    }

    async fn close_position(&self, id: Uuid, expected_amount: Decimal) -> anyhow::Result<bool> {
        position_repo::close_position(&self.pool, id, expected_amount).await
    }

    async fn restore_position(&self, id: Uuid, amount: Decimal) -> anyhow::Result<bool> {
        position_repo::restore_position(&self.pool, id, amount).await
    }

    async fn insert_trade(&self, new: NewTrade) -> anyhow::Result<Trade> {
        trade_repo::insert_trade(&self.pool, &new).await
    }

    async fn get_trade(&self, id: Uuid) -> anyhow::Result<Option<Trade>> {
        trade_repo::get_trade(&self.pool, id).await
    }

    async fn delete_trade(&self, id: Uuid) -> anyhow::Result<bool> {
        trade_repo::delete_open_trade(&self.pool, id).await
    }

    async fn find_open_buy_trade(
        &self,
        portfolio_id: Uuid,
        token_id: Uuid,
        price: Decimal,
    ) -> anyhow::Result<Option<Trade>> {
        trade_repo::find_open_buy_trade(&self.pool, portfolio_id, token_id, price).await
    }

    async fn close_trade(
        &self,
        id: Uuid,
        exit_price: Decimal,
        realized_pnl: Decimal,
        closed_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<Trade>> {
        trade_repo::close_trade(&self.pool, id, exit_price, realized_pnl, closed_at).await
    }

    async fn closed_trades_for_pattern(
        &self,
        pattern_type: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Trade>> {
        trade_repo::closed_trades_for_pattern(&self.pool, pattern_type, limit).await
    }

    async fn recent_closed_trades(&self, limit: i64) -> anyhow::Result<Vec<Trade>> {
        trade_repo::recent_closed_trades(&self.pool, limit).await
    }

    async fn get_token(&self, id: Uuid) -> anyhow::Result<Option<Token>> {
        token_repo::get_token(&self.pool, id).await
    }

    async fn price_history(&self, token_id: Uuid, limit: i64) -> anyhow::Result<Vec<PricePoint>> {
        token_repo::price_history(&self.pool, token_id, limit).await
    }

    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}
