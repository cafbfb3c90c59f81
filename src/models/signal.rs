use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::TradeType;

/// A trading decision produced by signal evaluation, consumed by execution.
/// Never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub token_id: Uuid,
    pub action: TradeType,
    /// Adjusted confidence, 0–100.
    pub confidence: Decimal,
    /// Quote the decision was made at (token's current price).
    pub price: Decimal,
    /// Human-readable explanation.
    pub reason: String,
    /// Originating pattern, if any.
    pub pattern_id: Option<Uuid>,
    pub pattern_type: Option<String>,
}
