//! Technical analysis over a token's price/volume history.
//!
//! Pure computation: every function takes an ascending-time slice of
//! [`PricePoint`]s and returns plain values. Inputs longer than
//! [`AnalyzerConfig::max_samples`] are cut to the most recent samples so a
//! single call stays cheap enough to run inline on the runtime. Too-short
//! inputs produce an empty or neutral result, never an error.

pub mod fibonacci;
pub mod levels;
pub mod patterns;
pub mod pivots;
pub mod signal;

pub use fibonacci::{FibonacciAnalysis, FibonacciLevel, Trend};
pub use levels::{LevelType, PriceLevel};
pub use patterns::{ChartPattern, ChartPatternType, Direction};
pub use pivots::{PivotLevels, PivotPoints};
pub use signal::{EntryExitSignal, SignalAction, TrailingStop};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;

use crate::models::PricePoint;

/// Tunables for the analyzer. Defaults match the production thresholds.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Inputs are cut to this many most-recent samples.
    pub max_samples: usize,
    /// Minimum samples for support/resistance detection.
    pub level_min_samples: usize,
    /// A price within this fraction of a level counts as a touch.
    pub touch_tolerance: Decimal,
    /// Same-type levels closer than this fraction are merged.
    pub merge_tolerance: Decimal,
    pub max_levels: usize,
    /// Samples used for the pivot high/low/close.
    pub pivot_lookback: usize,
    /// Trailing window scanned by the chart-pattern detectors.
    pub pattern_window: usize,
    pub pattern_min_samples: usize,
    /// "Near a level" tolerance for the composite signal.
    pub proximity_tolerance: Decimal,
    /// Fallback stop/target distance in percent.
    pub default_band_pct: Decimal,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            max_samples: 1_000,
            level_min_samples: 5,
            touch_tolerance: dec!(0.015),
            merge_tolerance: dec!(0.02),
            max_levels: 10,
            pivot_lookback: 24,
            pattern_window: 50,
            pattern_min_samples: 30,
            proximity_tolerance: dec!(0.02),
            default_band_pct: dec!(5),
        }
    }
}

/// Everything the analyzer knows about one price series.
#[derive(Debug, Clone, Serialize)]
pub struct TechnicalAnalysis {
    pub sample_count: usize,
    pub current_price: Option<Decimal>,
    pub support_resistance: Vec<PriceLevel>,
    pub fibonacci: Option<FibonacciAnalysis>,
    pub pivots: Option<PivotPoints>,
    pub patterns: Vec<ChartPattern>,
    pub signal: EntryExitSignal,
}

/// Stateless analyzer service. Construct once and share.
#[derive(Debug, Clone, Default)]
pub struct TechnicalAnalyzer {
    config: AnalyzerConfig,
}

impl TechnicalAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    fn recent<'a>(&self, data: &'a [PricePoint]) -> &'a [PricePoint] {
        let start = data.len().saturating_sub(self.config.max_samples);
        &data[start..]
    }

    pub fn support_resistance(&self, data: &[PricePoint]) -> Vec<PriceLevel> {
        levels::find_levels(self.recent(data), &self.config)
    }

    pub fn fibonacci_levels(&self, data: &[PricePoint]) -> Option<FibonacciAnalysis> {
        fibonacci::fibonacci_levels(self.recent(data))
    }

    pub fn pivot_points(&self, data: &[PricePoint]) -> Option<PivotPoints> {
        pivots::pivot_points(self.recent(data), self.config.pivot_lookback)
    }

    pub fn detect_patterns(&self, data: &[PricePoint]) -> Vec<ChartPattern> {
        patterns::detect_patterns(self.recent(data), &self.config)
    }

    pub fn entry_exit_signal(&self, data: &[PricePoint]) -> EntryExitSignal {
        let data = self.recent(data);
        let Some(last) = data.last() else {
            return EntryExitSignal::neutral(Decimal::ZERO);
        };
        let levels = self.support_resistance(data);
        let fib = self.fibonacci_levels(data);
        let patterns = self.detect_patterns(data);
        signal::entry_exit_signal(last.price, &levels, fib.as_ref(), &patterns, &self.config)
    }

    pub fn trailing_stop(
        &self,
        current_price: Decimal,
        previous_highest: Option<Decimal>,
        trail_pct: Decimal,
    ) -> TrailingStop {
        signal::trailing_stop(current_price, previous_highest, trail_pct)
    }

    /// Full report; each component is computed once.
    pub fn analyze(&self, data: &[PricePoint]) -> TechnicalAnalysis {
        let data = self.recent(data);
        let current_price = data.last().map(|p| p.price);

        let support_resistance = levels::find_levels(data, &self.config);
        let fibonacci = fibonacci::fibonacci_levels(data);
        let pivots = pivots::pivot_points(data, self.config.pivot_lookback);
        let patterns = patterns::detect_patterns(data, &self.config);
        let signal = match current_price {
            Some(price) => signal::entry_exit_signal(
                price,
                &support_resistance,
                fibonacci.as_ref(),
                &patterns,
                &self.config,
            ),
            None => EntryExitSignal::neutral(Decimal::ZERO),
        };

        TechnicalAnalysis {
            sample_count: data.len(),
            current_price,
            support_resistance,
            fibonacci,
            pivots,
            patterns,
            signal,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Indices of strict local maxima and minima: `prices[i]` must be strictly
/// greater (or smaller) than every neighbour within `radius`.
pub(crate) fn local_extrema(prices: &[Decimal], radius: usize) -> (Vec<usize>, Vec<usize>) {
    let mut maxima = Vec::new();
    let mut minima = Vec::new();
    if radius == 0 || prices.len() < 2 * radius + 1 {
        return (maxima, minima);
    }

    for i in radius..prices.len() - radius {
        let p = prices[i];
        let neighbours = (i - radius..=i + radius).filter(|&j| j != i);
        let (mut is_max, mut is_min) = (true, true);
        for j in neighbours {
            if prices[j] >= p {
                is_max = false;
            }
            if prices[j] <= p {
                is_min = false;
            }
        }
        if is_max {
            maxima.push(i);
        } else if is_min {
            minima.push(i);
        }
    }

    (maxima, minima)
}

/// `|a - b| / |b| <= tolerance`; exact equality when `b` is zero.
pub(crate) fn within(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    if b.is_zero() {
        return a.is_zero();
    }
    ((a - b) / b).abs() <= tolerance
}

pub(crate) fn mean(values: &[Decimal]) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    values.iter().copied().sum::<Decimal>() / Decimal::from(values.len() as u64)
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use crate::models::PricePoint;

    /// Unit-volume series from raw prices, one sample per hour.
    pub fn series(prices: &[Decimal]) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint::new(p, Decimal::ONE, start + Duration::hours(i as i64)))
            .collect()
    }

    pub fn series_i64(prices: &[i64]) -> Vec<PricePoint> {
        let prices: Vec<Decimal> = prices.iter().map(|&p| Decimal::from(p)).collect();
        series(&prices)
    }

    /// Linear interpolation through `pivots`, `steps` samples per leg.
    pub fn zigzag(pivots: &[i64], steps: usize) -> Vec<PricePoint> {
        let mut prices = vec![Decimal::from(pivots[0])];
        for pair in pivots.windows(2) {
            let (from, to) = (Decimal::from(pair[0]), Decimal::from(pair[1]));
            for k in 1..=steps {
                let frac = Decimal::from(k as u64) / Decimal::from(steps as u64);
                prices.push(from + (to - from) * frac);
            }
        }
        series(&prices)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_local_extrema_five_point_window() {
        let prices: Vec<Decimal> = [5, 6, 10, 6, 5, 6, 10, 6, 5]
            .iter()
            .map(|&p| Decimal::from(p))
            .collect();
        let (maxima, minima) = local_extrema(&prices, 2);
        assert_eq!(maxima, vec![2, 6]);
        assert_eq!(minima, vec![4]);
    }

    #[test]
    fn test_local_extrema_plateau_is_not_extremum() {
        let prices: Vec<Decimal> = [1, 2, 5, 5, 2, 1].iter().map(|&p| Decimal::from(p)).collect();
        let (maxima, _) = local_extrema(&prices, 2);
        assert!(maxima.is_empty());
    }

    #[test]
    fn test_recent_caps_input() {
        let analyzer = TechnicalAnalyzer::new(AnalyzerConfig {
            max_samples: 10,
            ..AnalyzerConfig::default()
        });
        let data = series_i64(&(1..=100).collect::<Vec<_>>());
        let report = analyzer.analyze(&data);
        assert_eq!(report.sample_count, 10);
        assert_eq!(report.current_price, Some(Decimal::from(100)));
        // Low of the capped window, not of the full series
        assert_eq!(report.fibonacci.unwrap().low, Decimal::from(91));
    }

    #[test]
    fn test_analyze_empty_is_neutral() {
        let report = TechnicalAnalyzer::default().analyze(&[]);
        assert_eq!(report.sample_count, 0);
        assert!(report.support_resistance.is_empty());
        assert!(report.fibonacci.is_none());
        assert!(report.pivots.is_none());
        assert!(report.patterns.is_empty());
        assert_eq!(report.signal.action, SignalAction::Hold);
    }
}
