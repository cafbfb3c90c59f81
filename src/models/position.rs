use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for positions table.
///
/// A fully sold position keeps its row with `amount = 0` (soft-close).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub token_id: Uuid,
    pub amount: Decimal,
    pub average_buy_price: Decimal,
    /// Buy trade that opened the current lot. `None` on rows written before
    /// lot lineage was tracked.
    pub entry_trade_id: Option<Uuid>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.amount > Decimal::ZERO
    }

    /// Unrealized gain in percent at `price`. Zero when the basis is zero.
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.average_buy_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.average_buy_price) / self.average_buy_price * Decimal::ONE_HUNDRED
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.amount * price
    }
}

/// Insert payload for a brand-new position row.
#[derive(Debug, Clone)]
pub struct NewPosition {
    pub portfolio_id: Uuid,
    pub token_id: Uuid,
    pub amount: Decimal,
    pub average_buy_price: Decimal,
    pub entry_trade_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(avg: Decimal) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            amount: Decimal::from(100),
            average_buy_price: avg,
            entry_trade_id: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_pnl_pct() {
        let pos = position(Decimal::ONE);
        assert_eq!(pos.pnl_pct(Decimal::new(92, 2)), Decimal::from(-8));
        assert_eq!(pos.pnl_pct(Decimal::new(115, 2)), Decimal::from(15));
    }

    #[test]
    fn test_pnl_pct_zero_basis() {
        let pos = position(Decimal::ZERO);
        assert_eq!(pos.pnl_pct(Decimal::ONE), Decimal::ZERO);
    }
}
