use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::Position;

/// An open position priced for a possible rebalancing sale.
#[derive(Debug, Clone)]
pub struct RebalanceCandidate {
    pub position: Position,
    pub price: Decimal,
    pub gain_pct: Decimal,
    /// Quoted value before the sale: amount × price.
    pub value: Decimal,
}

impl RebalanceCandidate {
    pub fn new(position: Position, price: Decimal) -> Self {
        let gain_pct = position.pnl_pct(price);
        let value = position.market_value(price);
        Self {
            position,
            price,
            gain_pct,
            value,
        }
    }
}

/// Stagnant positions (0 ≤ gain ≤ `max_gain_pct`), excluding
/// `exclude_token`, ordered most stagnant first.
pub fn select_stagnant(
    candidates: Vec<RebalanceCandidate>,
    exclude_token: Uuid,
    max_gain_pct: Decimal,
) -> Vec<RebalanceCandidate> {
    let mut stagnant: Vec<RebalanceCandidate> = candidates
        .into_iter()
        .filter(|c| c.position.token_id != exclude_token && c.position.is_open())
        .filter(|c| c.gain_pct >= Decimal::ZERO && c.gain_pct <= max_gain_pct)
        .collect();
    stagnant.sort_by(|a, b| a.gain_pct.cmp(&b.gain_pct));
    stagnant
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn candidate(token_id: Uuid, amount: i64, avg: Decimal, price: Decimal) -> RebalanceCandidate {
        let position = Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            token_id,
            amount: Decimal::from(amount),
            average_buy_price: avg,
            entry_trade_id: None,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
        };
        RebalanceCandidate::new(position, price)
    }

    #[test]
    fn test_filters_band_and_excluded_token() {
        let pending = Uuid::new_v4();
        let cands = vec![
            candidate(Uuid::new_v4(), 100, Decimal::ONE, Decimal::new(102, 2)), // +2%
            candidate(Uuid::new_v4(), 100, Decimal::ONE, Decimal::new(110, 2)), // +10%
            candidate(Uuid::new_v4(), 100, Decimal::ONE, Decimal::new(95, 2)),  // -5%
            candidate(Uuid::new_v4(), 100, Decimal::ONE, Decimal::ONE),         // 0%
            candidate(pending, 100, Decimal::ONE, Decimal::new(101, 2)),
        ];

        let stagnant = select_stagnant(cands, pending, Decimal::from(3));
        let gains: Vec<Decimal> = stagnant.iter().map(|c| c.gain_pct).collect();
        assert_eq!(gains, vec![Decimal::ZERO, Decimal::from(2)]);
    }
}
