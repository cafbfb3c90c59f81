use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::PricePoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotLevels {
    pub pivot: Decimal,
    pub r1: Decimal,
    pub r2: Decimal,
    pub r3: Decimal,
    pub s1: Decimal,
    pub s2: Decimal,
    pub s3: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotPoints {
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub classic: PivotLevels,
    pub fibonacci: PivotLevels,
    pub camarilla: PivotLevels,
}

/// Pivot points over the trailing `lookback` samples: high and low of the
/// window, close = last price.
pub fn pivot_points(data: &[PricePoint], lookback: usize) -> Option<PivotPoints> {
    let window = &data[data.len().saturating_sub(lookback.max(1))..];
    let close = window.last()?.price;
    let high = window.iter().map(|p| p.price).max()?;
    let low = window.iter().map(|p| p.price).min()?;

    let pivot = (high + low + close) / dec!(3);
    let range = high - low;

    let classic = PivotLevels {
        pivot,
        r1: dec!(2) * pivot - low,
        r2: pivot + range,
        r3: high + dec!(2) * (pivot - low),
        s1: dec!(2) * pivot - high,
        s2: pivot - range,
        s3: low - dec!(2) * (high - pivot),
    };

    let fibonacci = PivotLevels {
        pivot,
        r1: pivot + range * dec!(0.382),
        r2: pivot + range * dec!(0.618),
        r3: pivot + range,
        s1: pivot - range * dec!(0.382),
        s2: pivot - range * dec!(0.618),
        s3: pivot - range,
    };

    let cam = range * dec!(1.1);
    let camarilla = PivotLevels {
        pivot,
        r1: close + cam / dec!(12),
        r2: close + cam / dec!(6),
        r3: close + cam / dec!(4),
        s1: close - cam / dec!(12),
        s2: close - cam / dec!(6),
        s3: close - cam / dec!(4),
    };

    Some(PivotPoints {
        high,
        low,
        close,
        classic,
        fibonacci,
        camarilla,
    })
}
