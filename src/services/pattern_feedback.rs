use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::Store;
use crate::models::Trade;

/// Historical performance of one pattern type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternPerformance {
    pub pattern_type: String,
    pub timeframe: String,
    pub sample_size: usize,
    pub win_rate: Decimal,
    /// Scales raw detector confidence before the threshold check.
    pub confidence_multiplier: Decimal,
}

#[async_trait]
pub trait PatternFeedback: Send + Sync {
    async fn get_performance(&self, pattern_type: &str, timeframe: &str) -> anyhow::Result<PatternPerformance>;
    async fn get_min_confidence(&self) -> anyhow::Result<Decimal>;
}

/// Fixed multiplier and threshold.
#[derive(Debug, Clone)]
pub struct StaticFeedback {
    pub multiplier: Decimal,
    pub min_confidence: Decimal,
}

impl StaticFeedback {
    pub fn new(multiplier: Decimal, min_confidence: Decimal) -> Self {
        Self {
            multiplier,
            min_confidence,
        }
    }
}

#[async_trait]
impl PatternFeedback for StaticFeedback {
    async fn get_performance(&self, pattern_type: &str, timeframe: &str) -> anyhow::Result<PatternPerformance> {
        Ok(PatternPerformance {
            pattern_type: pattern_type.to_string(),
            timeframe: timeframe.to_string(),
            sample_size: 0,
            win_rate: Decimal::ZERO,
            confidence_multiplier: self.multiplier,
        })
    }

    async fn get_min_confidence(&self) -> anyhow::Result<Decimal> {
        Ok(self.min_confidence)
    }
}

/// Fraction of closed trades with positive realized P&L.
pub fn win_rate(trades: &[Trade]) -> Decimal {
    let closed: Vec<Decimal> = trades.iter().filter_map(|t| t.realized_pnl).collect();
    if closed.is_empty() {
        return Decimal::ZERO;
    }
    let wins = closed.iter().filter(|p| **p > Decimal::ZERO).count();
    Decimal::from(wins as i64) / Decimal::from(closed.len() as i64)
}

/// Multiplier = win rate / 0.5, clamped to [0.5, 1.5]. Neutral (1.0) until
/// `min_samples` closed trades exist.
pub fn confidence_multiplier(win_rate: Decimal, samples: usize, min_samples: usize) -> Decimal {
    if samples < min_samples {
        return Decimal::ONE;
    }
    (win_rate * Decimal::TWO).clamp(Decimal::new(5, 1), Decimal::new(15, 1))
}

/// Feedback derived from the engine's own closed trades.
///
/// Per pattern type the multiplier follows [`confidence_multiplier`]. The
/// minimum confidence tightens by 10 points when the recent overall win rate
/// is below 40% and relaxes by 5 above 60%.
pub struct HistoricalFeedback {
    store: Arc<dyn Store>,
    base_min_confidence: Decimal,
    min_samples: usize,
    lookback: i64,
}

impl HistoricalFeedback {
    pub fn new(store: Arc<dyn Store>, base_min_confidence: Decimal) -> Self {
        Self {
            store,
            base_min_confidence,
            min_samples: 5,
            lookback: 100,
        }
    }
}

/// Trades do not record the timeframe their pattern was detected on, so the
/// multiplier is per pattern type; `timeframe` is only echoed back.
#[async_trait]
impl PatternFeedback for HistoricalFeedback {
    async fn get_performance(&self, pattern_type: &str, timeframe: &str) -> anyhow::Result<PatternPerformance> {
        let trades = self
            .store
            .closed_trades_for_pattern(pattern_type, self.lookback)
            .await?;
        let wr = win_rate(&trades);

        Ok(PatternPerformance {
            pattern_type: pattern_type.to_string(),
            timeframe: timeframe.to_string(),
            sample_size: trades.len(),
            win_rate: wr,
            confidence_multiplier: confidence_multiplier(wr, trades.len(), self.min_samples),
        })
    }

    async fn get_min_confidence(&self) -> anyhow::Result<Decimal> {
        let trades = self.store.recent_closed_trades(self.lookback).await?;
        if trades.len() < self.min_samples {
            return Ok(self.base_min_confidence);
        }

        let wr = win_rate(&trades);
        let adjusted = if wr < Decimal::new(4, 1) {
            self.base_min_confidence + Decimal::TEN
        } else if wr > Decimal::new(6, 1) {
            self.base_min_confidence - Decimal::from(5)
        } else {
            self.base_min_confidence
        };
        Ok(adjusted.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn closed(pnl: i64) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            token_id: Uuid::new_v4(),
            trade_type: "buy".into(),
            amount: Decimal::ONE,
            price: Decimal::ONE,
            total_value: Decimal::ONE,
            pattern_id: None,
            pattern_type: Some("double_bottom".into()),
            reason: None,
            exit_price: Some(Decimal::ONE),
            realized_pnl: Some(Decimal::from(pnl)),
            closed_at: Some(Utc::now()),
            executed_at: Utc::now(),
        }
    }

    #[test]
    fn test_win_rate_basic() {
        let trades: Vec<Trade> = [10, -5, 20, -3, 15].into_iter().map(closed).collect();
        // 3 wins / 5 trades
        assert_eq!(win_rate(&trades), Decimal::new(6, 1));
    }

    #[test]
    fn test_win_rate_empty() {
        assert_eq!(win_rate(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_multiplier_clamped_and_neutral_below_samples() {
        assert_eq!(confidence_multiplier(Decimal::ONE, 3, 5), Decimal::ONE);
        assert_eq!(confidence_multiplier(Decimal::ONE, 10, 5), Decimal::new(15, 1));
        assert_eq!(confidence_multiplier(Decimal::ZERO, 10, 5), Decimal::new(5, 1));
        assert_eq!(confidence_multiplier(Decimal::new(6, 1), 10, 5), Decimal::new(12, 1));
    }

    #[tokio::test]
    async fn test_historical_multiplier_ignores_timeframe() {
        use crate::db::MemoryStore;
        use crate::models::{NewTrade, TradeType};

        let store = MemoryStore::new();
        for pnl in [10, 20, -5, 15, 5] {
            let trade = store
                .insert_trade(NewTrade {
                    portfolio_id: Uuid::new_v4(),
                    token_id: Uuid::new_v4(),
                    trade_type: TradeType::Buy,
                    amount: Decimal::ONE,
                    price: Decimal::ONE,
                    pattern_id: None,
                    pattern_type: Some("double_bottom".into()),
                    reason: None,
                })
                .await
                .unwrap();
            store
                .close_trade(trade.id, Decimal::ONE, Decimal::from(pnl), Utc::now())
                .await
                .unwrap();
        }
        let feedback = HistoricalFeedback::new(Arc::new(store), Decimal::from(60));

        let hourly = feedback.get_performance("double_bottom", "1h").await.unwrap();
        let daily = feedback.get_performance("double_bottom", "1d").await.unwrap();

        // 4 wins / 5: 0.8 × 2 clamped to 1.5 on both timeframes
        assert_eq!(hourly.confidence_multiplier, Decimal::new(15, 1));
        assert_eq!(daily.confidence_multiplier, hourly.confidence_multiplier);
        assert_eq!(daily.timeframe, "1d");
        assert_eq!(daily.sample_size, 5);
    }

    #[tokio::test]
    async fn test_static_feedback() {
        let feedback = StaticFeedback::new(Decimal::ONE, Decimal::from(60));
        let perf = feedback.get_performance("double_bottom", "1h").await.unwrap();
        assert_eq!(perf.confidence_multiplier, Decimal::ONE);
        assert_eq!(feedback.get_min_confidence().await.unwrap(), Decimal::from(60));
    }
}
