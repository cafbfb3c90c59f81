use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::levels::{nearest_resistance_above, nearest_support_below};
use super::{within, AnalyzerConfig, ChartPattern, Direction, FibonacciAnalysis, LevelType, PriceLevel, Trend};

const BASE_CONFIDENCE: Decimal = dec!(50);
const MAX_CONFIDENCE: Decimal = dec!(95);
const LEVEL_WEIGHT: Decimal = dec!(10);
const FIB_WEIGHT: Decimal = dec!(10);
const PATTERN_WEIGHT: Decimal = dec!(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

/// Composite recommendation with a complete trade plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryExitSignal {
    pub action: SignalAction,
    pub confidence: Decimal,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub risk_reward: Decimal,
    pub reasons: Vec<String>,
}

impl EntryExitSignal {
    pub fn neutral(price: Decimal) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: Decimal::ZERO,
            entry_price: price,
            stop_loss: price,
            take_profit: price,
            risk_reward: Decimal::ZERO,
            reasons: vec!["insufficient data".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrailingStop {
    pub stop_price: Decimal,
    pub highest_price: Decimal,
    pub triggered: bool,
}

/// Score the current price against levels, Fibonacci entries and patterns.
///
/// Each side accumulates +10 for a nearby support (bull) or resistance
/// (bear), +10 for sitting on a Fibonacci entry level in the trend's
/// direction, and +15 for the strongest matching pattern. The larger side
/// wins; ties hold. Stop and target come from the winning pattern, then the
/// nearest level, then a default band, so the plan is always complete.
pub fn entry_exit_signal(
    current: Decimal,
    levels: &[PriceLevel],
    fib: Option<&FibonacciAnalysis>,
    patterns: &[ChartPattern],
    config: &AnalyzerConfig,
) -> EntryExitSignal {
    if current <= Decimal::ZERO {
        return EntryExitSignal::neutral(current);
    }

    let tol = config.proximity_tolerance;
    let mut bull = Decimal::ZERO;
    let mut bear = Decimal::ZERO;
    let mut reasons = Vec::new();

    if let Some(level) = levels
        .iter()
        .find(|l| l.level_type == LevelType::Support && within(current, l.price, tol))
    {
        bull += LEVEL_WEIGHT;
        reasons.push(format!("near support {}", level.price.round_dp(6)));
    }
    if let Some(level) = levels
        .iter()
        .find(|l| l.level_type == LevelType::Resistance && within(current, l.price, tol))
    {
        bear += LEVEL_WEIGHT;
        reasons.push(format!("near resistance {}", level.price.round_dp(6)));
    }

    if let Some(fib) = fib {
        if fib.entry_levels.iter().any(|&l| within(current, l, tol)) {
            match fib.trend {
                Trend::Up => bull += FIB_WEIGHT,
                Trend::Down => bear += FIB_WEIGHT,
            }
            reasons.push("at fibonacci entry level".into());
        }
    }

    // Patterns arrive sorted by confidence; take the strongest of each side.
    let bullish = patterns.iter().find(|p| p.direction == Direction::Bullish);
    let bearish = patterns.iter().find(|p| p.direction == Direction::Bearish);
    if let Some(p) = bullish {
        bull += PATTERN_WEIGHT;
        reasons.push(format!("{} pattern", p.pattern_type));
    }
    if let Some(p) = bearish {
        bear += PATTERN_WEIGHT;
        reasons.push(format!("{} pattern", p.pattern_type));
    }

    let (action, score) = if bull > bear {
        (SignalAction::Buy, bull)
    } else if bear > bull {
        (SignalAction::Sell, bear)
    } else {
        (SignalAction::Hold, Decimal::ZERO)
    };

    let confidence = (BASE_CONFIDENCE + score).min(MAX_CONFIDENCE);
    let band = config.default_band_pct / Decimal::ONE_HUNDRED;

    let (stop_loss, take_profit) = match action {
        SignalAction::Sell => {
            let stop = bearish
                .map(|p| p.stop_loss)
                .filter(|&s| s > current)
                .or_else(|| nearest_resistance_above(levels, current).map(|l| l.price))
                .unwrap_or(current * (Decimal::ONE + band));
            let target = bearish
                .map(|p| p.target_price)
                .filter(|&t| t < current)
                .or_else(|| nearest_support_below(levels, current).map(|l| l.price))
                .unwrap_or(current * (Decimal::ONE - band));
            (stop, target)
        }
        SignalAction::Buy | SignalAction::Hold => {
            let pattern = if action == SignalAction::Buy { bullish } else { None };
            let stop = pattern
                .map(|p| p.stop_loss)
                .filter(|&s| s < current)
                .or_else(|| nearest_support_below(levels, current).map(|l| l.price))
                .unwrap_or(current * (Decimal::ONE - band));
            let target = pattern
                .map(|p| p.target_price)
                .filter(|&t| t > current)
                .or_else(|| nearest_resistance_above(levels, current).map(|l| l.price))
                .unwrap_or(current * (Decimal::ONE + band));
            (stop, target)
        }
    };

    let risk = (current - stop_loss).abs();
    let risk_reward = if risk.is_zero() {
        Decimal::ZERO
    } else {
        ((take_profit - current).abs() / risk).round_dp(2)
    };

    if reasons.is_empty() {
        reasons.push("no confluence".into());
    }

    EntryExitSignal {
        action,
        confidence,
        entry_price: current,
        stop_loss,
        take_profit,
        risk_reward,
        reasons,
    }
}

/// Stateless trailing-stop step. Callers persist `highest_price` between
/// calls and pass it back as `previous_highest`.
pub fn trailing_stop(
    current: Decimal,
    previous_highest: Option<Decimal>,
    trail_pct: Decimal,
) -> TrailingStop {
    let highest_price = previous_highest.map_or(current, |h| h.max(current));
    let stop_price = highest_price * (Decimal::ONE - trail_pct / Decimal::ONE_HUNDRED);
    TrailingStop {
        stop_price,
        highest_price,
        triggered: current <= stop_price,
    }
}

#[cfg(test)]
mod tests {
    use super::super::{ChartPatternType, FibonacciLevel};
    use super::*;

    fn level(price: i64, level_type: LevelType) -> PriceLevel {
        PriceLevel {
            price: Decimal::from(price),
            strength: dec!(50),
            touches: 2,
            level_type,
        }
    }

    fn bullish_pattern(target: i64, stop: i64) -> ChartPattern {
        ChartPattern {
            pattern_type: ChartPatternType::DoubleBottom,
            direction: Direction::Bullish,
            confidence: dec!(70),
            entry_price: Decimal::from(100),
            target_price: Decimal::from(target),
            stop_loss: Decimal::from(stop),
            risk_reward: dec!(2),
        }
    }

    #[test]
    fn test_no_inputs_holds_with_default_band() {
        let sig = entry_exit_signal(dec!(100), &[], None, &[], &AnalyzerConfig::default());
        assert_eq!(sig.action, SignalAction::Hold);
        assert_eq!(sig.confidence, dec!(50));
        assert_eq!(sig.stop_loss, dec!(95));
        assert_eq!(sig.take_profit, dec!(105));
        assert_eq!(sig.risk_reward, Decimal::ONE);
    }

    #[test]
    fn test_support_and_pattern_buy_uses_pattern_plan() {
        let levels = vec![level(99, LevelType::Support), level(120, LevelType::Resistance)];
        let patterns = vec![bullish_pattern(112, 96)];
        let sig = entry_exit_signal(dec!(100), &levels, None, &patterns, &AnalyzerConfig::default());

        assert_eq!(sig.action, SignalAction::Buy);
        // 50 + 10 (support) + 15 (pattern)
        assert_eq!(sig.confidence, dec!(75));
        assert_eq!(sig.stop_loss, dec!(96));
        assert_eq!(sig.take_profit, dec!(112));
        assert_eq!(sig.risk_reward, dec!(3));
    }

    #[test]
    fn test_level_fallback_when_pattern_plan_invalid() {
        let levels = vec![level(99, LevelType::Support), level(120, LevelType::Resistance)];
        // Stop above price is unusable; falls back to nearest support
        let patterns = vec![bullish_pattern(112, 101)];
        let sig = entry_exit_signal(dec!(100), &levels, None, &patterns, &AnalyzerConfig::default());

        assert_eq!(sig.stop_loss, dec!(99));
        assert_eq!(sig.take_profit, dec!(112));
    }

    #[test]
    fn test_resistance_sell_and_confidence_cap() {
        let levels = vec![level(101, LevelType::Resistance), level(80, LevelType::Support)];
        let fib = FibonacciAnalysis {
            trend: Trend::Down,
            high: dec!(120),
            low: dec!(80),
            levels: vec![FibonacciLevel { ratio: dec!(0.5), price: dec!(100) }],
            entry_levels: vec![dec!(100)],
            targets: vec![],
            stop_loss: dec!(125),
        };
        let sig = entry_exit_signal(dec!(100), &levels, Some(&fib), &[], &AnalyzerConfig::default());

        assert_eq!(sig.action, SignalAction::Sell);
        assert_eq!(sig.confidence, dec!(70));
        assert_eq!(sig.stop_loss, dec!(101));
        assert_eq!(sig.take_profit, dec!(80));
        assert_eq!(sig.risk_reward, dec!(20));
    }

    #[test]
    fn test_trailing_stop_ratchets() {
        let s1 = trailing_stop(dec!(100), None, dec!(10));
        assert_eq!(s1.highest_price, dec!(100));
        assert_eq!(s1.stop_price, dec!(90));
        assert!(!s1.triggered);

        let s2 = trailing_stop(dec!(120), Some(s1.highest_price), dec!(10));
        assert_eq!(s2.stop_price, dec!(108));

        // Pullback keeps the high, then triggers at the stop
        let s3 = trailing_stop(dec!(110), Some(s2.highest_price), dec!(10));
        assert_eq!(s3.highest_price, dec!(120));
        assert!(!s3.triggered);
        let s4 = trailing_stop(dec!(108), Some(s3.highest_price), dec!(10));
        assert!(s4.triggered);
    }
}
