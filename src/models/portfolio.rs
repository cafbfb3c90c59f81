use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for portfolios table.
///
/// `total_value` and `total_pnl` are recomputed by the position monitor on
/// every sweep; they are a snapshot, not a running ledger.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Portfolio {
    pub id: Uuid,
    pub name: String,
    pub cash_balance: Decimal,
    pub starting_capital: Decimal,
    pub total_value: Decimal,
    pub realized_pnl: Decimal,
    pub total_pnl: Decimal,
    pub auto_trading_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

impl Portfolio {
    /// A fresh all-cash portfolio.
    pub fn new(name: &str, starting_capital: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            cash_balance: starting_capital,
            starting_capital,
            total_value: starting_capital,
            realized_pnl: Decimal::ZERO,
            total_pnl: Decimal::ZERO,
            auto_trading_enabled: false,
            updated_at: Utc::now(),
        }
    }
}
