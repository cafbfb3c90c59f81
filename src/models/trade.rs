use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for trades table.
///
/// Only the entry leg is inserted. When the lot is sold, the same row is
/// amended with `exit_price`, `realized_pnl` and `closed_at`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub token_id: Uuid,
    /// `buy` or `sell`, see [`super::TradeType`].
    pub trade_type: String,
    pub amount: Decimal,
    pub price: Decimal,
    pub total_value: Decimal,
    pub pattern_id: Option<Uuid>,
    pub pattern_type: Option<String>,
    pub reason: Option<String>,
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
    pub executed_at: DateTime<Utc>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

/// Insert payload for a trade row.
#[derive(Debug, Clone)]
pub struct NewTrade {
    pub portfolio_id: Uuid,
    pub token_id: Uuid,
    pub trade_type: super::TradeType,
    pub amount: Decimal,
    pub price: Decimal,
    pub pattern_id: Option<Uuid>,
    pub pattern_type: Option<String>,
    pub reason: Option<String>,
}
