pub mod event;
pub mod portfolio;
pub mod position;
pub mod signal;
pub mod token;
pub mod trade;

pub use event::{AlertTriggered, EngineEvent, MarketEvent, PatternDetected, StatsUpdate, TradeExecuted};
pub use portfolio::Portfolio;
pub use position::{NewPosition, Position};
pub use signal::TradingSignal;
pub use token::{PricePoint, Token};
pub use trade::{NewTrade, Trade};

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TradeType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeType {
    Buy,
    Sell,
}

impl TradeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeType::Buy => "buy",
            TradeType::Sell => "sell",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "buy" => Some(TradeType::Buy),
            "sell" => Some(TradeType::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for TradeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
