use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Token, Trade, TradingSignal};

// ---------------------------------------------------------------------------
// Inbound: pattern / alert source
// ---------------------------------------------------------------------------

/// Events published by the pattern/alert source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum MarketEvent {
    #[serde(rename = "pattern_detected")]
    PatternDetected(PatternDetected),

    #[serde(rename = "alert_triggered")]
    AlertTriggered(AlertTriggered),
}

impl MarketEvent {
    pub fn token_id(&self) -> Uuid {
        match self {
            MarketEvent::PatternDetected(p) => p.token_id,
            MarketEvent::AlertTriggered(a) => a.token_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDetected {
    pub id: Uuid,
    pub token_id: Uuid,
    pub pattern_type: String,
    /// Raw detector confidence, 0–100.
    pub confidence: Decimal,
    pub timeframe: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertTriggered {
    pub token_id: Uuid,
    pub alert_type: String,
    pub confidence: Decimal,
}

// ---------------------------------------------------------------------------
// Outbound: event sink
// ---------------------------------------------------------------------------

/// Notifications emitted by the decision engine for downstream transport.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum EngineEvent {
    #[serde(rename = "trade_executed")]
    TradeExecuted(TradeExecuted),

    #[serde(rename = "stats_update")]
    StatsUpdate(StatsUpdate),
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeExecuted {
    pub trade: Trade,
    pub signal: TradingSignal,
    pub token: Token,
    pub portfolio_id: Uuid,
    pub stats: StatsUpdate,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsUpdate {
    pub portfolio_id: Uuid,
    pub total_value: Decimal,
    pub total_pnl: Decimal,
    pub total_trades: u64,
    pub today_trades: u64,
    pub active_positions: usize,
    pub timestamp: DateTime<Utc>,
}
