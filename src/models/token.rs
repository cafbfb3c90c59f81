use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Database row for tokens table.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Token {
    pub id: Uuid,
    pub symbol: String,
    pub current_price: Decimal,
    pub volume_24h: Decimal,
    pub updated_at: DateTime<Utc>,
}

/// One sample of a token's price history. Sequences are ascending in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, FromRow)]
pub struct PricePoint {
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    pub fn new(price: Decimal, volume: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            price,
            volume,
            timestamp,
        }
    }
}
