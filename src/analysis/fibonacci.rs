use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::models::PricePoint;

/// Retracement ratios followed by extension ratios.
pub const FIB_RATIOS: [Decimal; 10] = [
    dec!(0),
    dec!(0.236),
    dec!(0.382),
    dec!(0.5),
    dec!(0.618),
    dec!(0.786),
    dec!(1),
    dec!(1.272),
    dec!(1.618),
    dec!(2.618),
];

const ENTRY_RATIOS: [Decimal; 3] = [dec!(0.382), dec!(0.5), dec!(0.618)];
const STOP_RATIO: Decimal = dec!(0.786);
const STOP_BUFFER: Decimal = dec!(0.02);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciLevel {
    pub ratio: Decimal,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FibonacciAnalysis {
    pub trend: Trend,
    pub high: Decimal,
    pub low: Decimal,
    pub levels: Vec<FibonacciLevel>,
    /// The .382 / .5 / .618 retracements.
    pub entry_levels: Vec<Decimal>,
    /// Extension levels (ratio > 1).
    pub targets: Vec<Decimal>,
    /// 2% beyond the .786 retracement.
    pub stop_loss: Decimal,
}

impl FibonacciAnalysis {
    pub fn level(&self, ratio: Decimal) -> Option<Decimal> {
        self.levels.iter().find(|l| l.ratio == ratio).map(|l| l.price)
    }
}

/// Fibonacci retracements and extensions over the series' high–low range.
///
/// Trend is up when the last price is at or above the first. In an uptrend
/// retracements are measured down from the high and extensions project up
/// from the low; a downtrend mirrors both. `None` for fewer than two samples
/// or a flat range.
pub fn fibonacci_levels(data: &[PricePoint]) -> Option<FibonacciAnalysis> {
    let (first, last) = match data {
        [first, .., last] => (first.price, last.price),
        _ => return None,
    };

    let high = data.iter().map(|p| p.price).max()?;
    let low = data.iter().map(|p| p.price).min()?;
    let range = high - low;
    if range.is_zero() {
        return None;
    }

    let trend = if last >= first { Trend::Up } else { Trend::Down };

    let price_at = |ratio: Decimal| -> Decimal {
        let is_extension = ratio > Decimal::ONE;
        let price = match (trend, is_extension) {
            (Trend::Up, false) => high - range * ratio,
            (Trend::Up, true) => low + range * ratio,
            (Trend::Down, false) => low + range * ratio,
            (Trend::Down, true) => high - range * ratio,
        };
        price.max(Decimal::ZERO)
    };

    let levels: Vec<FibonacciLevel> = FIB_RATIOS
        .iter()
        .map(|&ratio| FibonacciLevel {
            ratio,
            price: price_at(ratio),
        })
        .collect();

    let entry_levels = ENTRY_RATIOS.iter().map(|&r| price_at(r)).collect();
    let targets = FIB_RATIOS
        .iter()
        .filter(|&&r| r > Decimal::ONE)
        .map(|&r| price_at(r))
        .collect();

    let stop_anchor = price_at(STOP_RATIO);
    let stop_loss = match trend {
        Trend::Up => stop_anchor * (Decimal::ONE - STOP_BUFFER),
        Trend::Down => stop_anchor * (Decimal::ONE + STOP_BUFFER),
    };

    Some(FibonacciAnalysis {
        trend,
        high,
        low,
        levels,
        entry_levels,
        targets,
        stop_loss,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn test_uptrend_retracements() {
        let data = series_i64(&[10, 12, 15, 20]);
        let fib = fibonacci_levels(&data).unwrap();

        assert_eq!(fib.trend, Trend::Up);
        assert_eq!(fib.high, Decimal::from(20));
        assert_eq!(fib.low, Decimal::from(10));
        assert_eq!(fib.level(dec!(0.5)), Some(Decimal::from(15)));
        assert_eq!(fib.level(dec!(0.618)), Some(dec!(13.82)));
        assert_eq!(fib.level(dec!(0)), Some(Decimal::from(20)));
        assert_eq!(fib.level(dec!(1)), Some(Decimal::from(10)));
    }

    #[test]
    fn test_uptrend_extensions_and_stop() {
        let data = series_i64(&[10, 12, 15, 20]);
        let fib = fibonacci_levels(&data).unwrap();

        assert_eq!(fib.targets, vec![dec!(22.72), dec!(26.18), dec!(36.18)]);
        assert_eq!(fib.entry_levels, vec![dec!(16.18), dec!(15), dec!(13.82)]);
        // .786 retracement = 12.14, minus 2%
        assert_eq!(fib.stop_loss, dec!(12.14) * dec!(0.98));
    }

    #[test]
    fn test_downtrend_mirrors() {
        let data = series_i64(&[20, 15, 12, 10]);
        let fib = fibonacci_levels(&data).unwrap();

        assert_eq!(fib.trend, Trend::Down);
        assert_eq!(fib.level(dec!(0.5)), Some(Decimal::from(15)));
        assert_eq!(fib.level(dec!(0.618)), Some(dec!(16.18)));
        assert_eq!(fib.level(dec!(1.272)), Some(dec!(7.28)));
        assert!(fib.stop_loss > fib.level(dec!(0.786)).unwrap());
    }

    #[test]
    fn test_insufficient_or_flat_data() {
        assert!(fibonacci_levels(&series_i64(&[10])).is_none());
        assert!(fibonacci_levels(&series_i64(&[10, 10, 10])).is_none());
    }
}
