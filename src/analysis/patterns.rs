use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{local_extrema, mean, AnalyzerConfig};
use crate::models::PricePoint;

/// Relative change over the window above which a peak/valley series counts
/// as rising (or below its negation, falling).
const TREND_THRESHOLD: Decimal = dec!(0.02);
/// Relative spread below which a series counts as horizontal.
const FLAT_THRESHOLD: Decimal = dec!(0.01);
/// Maximum slope difference for two trendlines to count as parallel.
const PARALLEL_THRESHOLD: Decimal = dec!(0.01);
const STOP_BUFFER: Decimal = dec!(0.02);
const MAX_CONFIDENCE: Decimal = dec!(95);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartPatternType {
    AscendingTriangle,
    DescendingTriangle,
    SymmetricalTriangle,
    RisingWedge,
    FallingWedge,
    ChannelUp,
    ChannelDown,
    HeadAndShoulders,
    DoubleTop,
    DoubleBottom,
}

impl ChartPatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartPatternType::AscendingTriangle => "ascending_triangle",
            ChartPatternType::DescendingTriangle => "descending_triangle",
            ChartPatternType::SymmetricalTriangle => "symmetrical_triangle",
            ChartPatternType::RisingWedge => "rising_wedge",
            ChartPatternType::FallingWedge => "falling_wedge",
            ChartPatternType::ChannelUp => "channel_up",
            ChartPatternType::ChannelDown => "channel_down",
            ChartPatternType::HeadAndShoulders => "head_and_shoulders",
            ChartPatternType::DoubleTop => "double_top",
            ChartPatternType::DoubleBottom => "double_bottom",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            ChartPatternType::AscendingTriangle
            | ChartPatternType::FallingWedge
            | ChartPatternType::ChannelUp
            | ChartPatternType::DoubleBottom => Direction::Bullish,
            ChartPatternType::DescendingTriangle
            | ChartPatternType::RisingWedge
            | ChartPatternType::ChannelDown
            | ChartPatternType::HeadAndShoulders
            | ChartPatternType::DoubleTop => Direction::Bearish,
            ChartPatternType::SymmetricalTriangle => Direction::Neutral,
        }
    }
}

impl fmt::Display for ChartPatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected geometric pattern with its trade plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPattern {
    pub pattern_type: ChartPatternType,
    pub direction: Direction,
    pub confidence: Decimal,
    pub entry_price: Decimal,
    pub target_price: Decimal,
    pub stop_loss: Decimal,
    pub risk_reward: Decimal,
}

/// Peaks and valleys of the trailing window, in time order.
struct Swings {
    current: Decimal,
    peaks: Vec<(usize, Decimal)>,
    valleys: Vec<(usize, Decimal)>,
}

impl Swings {
    fn peak_prices(&self) -> Vec<Decimal> {
        self.peaks.iter().map(|&(_, p)| p).collect()
    }

    fn valley_prices(&self) -> Vec<Decimal> {
        self.valleys.iter().map(|&(_, p)| p).collect()
    }

    fn has_two_each(&self) -> bool {
        self.peaks.len() >= 2 && self.valleys.len() >= 2
    }

    /// Confidence bonus for well-formed structures with extra swings.
    fn swing_bonus(&self) -> Decimal {
        let extra = (self.peaks.len() + self.valleys.len()).saturating_sub(4);
        (Decimal::from(extra as u64) * dec!(3)).min(dec!(15))
    }
}

type Detector = fn(&Swings) -> Option<ChartPattern>;

const DETECTORS: [Detector; 9] = [
    ascending_triangle,
    descending_triangle,
    symmetrical_triangle,
    rising_wedge,
    falling_wedge,
    channel,
    head_and_shoulders,
    double_top,
    double_bottom,
];

/// Run every detector over the trailing `pattern_window` samples and return
/// the matches sorted by confidence, highest first.
pub fn detect_patterns(data: &[PricePoint], config: &AnalyzerConfig) -> Vec<ChartPattern> {
    if data.len() < config.pattern_min_samples {
        return Vec::new();
    }

    let window = &data[data.len().saturating_sub(config.pattern_window)..];
    let prices: Vec<Decimal> = window.iter().map(|p| p.price).collect();
    let Some(&current) = prices.last() else {
        return Vec::new();
    };
    if current <= Decimal::ZERO {
        return Vec::new();
    }

    let (maxima, minima) = local_extrema(&prices, 2);
    let swings = Swings {
        current,
        peaks: maxima.iter().map(|&i| (i, prices[i])).collect(),
        valleys: minima.iter().map(|&i| (i, prices[i])).collect(),
    };

    let mut found: Vec<ChartPattern> = DETECTORS.iter().filter_map(|d| d(&swings)).collect();
    found.sort_by(|a, b| b.confidence.cmp(&a.confidence));
    found
}

// ---------------------------------------------------------------------------
// Geometry helpers
// ---------------------------------------------------------------------------

/// Relative change from first to last element.
fn slope(series: &[Decimal]) -> Option<Decimal> {
    let (first, last) = match series {
        [first, .., last] if !first.is_zero() => (*first, *last),
        _ => return None,
    };
    Some((last - first) / first)
}

fn is_flat(series: &[Decimal]) -> bool {
    let avg = mean(series);
    if series.len() < 2 || avg.is_zero() {
        return false;
    }
    let (Some(max), Some(min)) = (series.iter().max(), series.iter().min()) else {
        return false;
    };
    (*max - *min) / avg < FLAT_THRESHOLD
}

fn rising(s: Decimal) -> bool {
    s > TREND_THRESHOLD
}

fn falling(s: Decimal) -> bool {
    s < -TREND_THRESHOLD
}

/// Assemble a pattern, forcing stop and target onto the correct sides of
/// the entry so the risk-reward ratio is always defined and non-negative.
fn build(
    pattern_type: ChartPatternType,
    base_confidence: Decimal,
    swings: &Swings,
    target: Decimal,
    stop: Decimal,
) -> ChartPattern {
    let entry = swings.current;
    let direction = pattern_type.direction();
    let band = dec!(0.05);

    let (target, stop) = match direction {
        Direction::Bearish => (
            if target < entry { target } else { entry * (Decimal::ONE - band) },
            if stop > entry { stop } else { entry * (Decimal::ONE + band) },
        ),
        Direction::Bullish | Direction::Neutral => (
            if target > entry { target } else { entry * (Decimal::ONE + band) },
            if stop < entry { stop } else { entry * (Decimal::ONE - band) },
        ),
    };

    let risk = (entry - stop).abs();
    let reward = (target - entry).abs();
    let risk_reward = if risk.is_zero() {
        Decimal::ZERO
    } else {
        (reward / risk).round_dp(2)
    };

    ChartPattern {
        pattern_type,
        direction,
        confidence: (base_confidence + swings.swing_bonus()).min(MAX_CONFIDENCE),
        entry_price: entry,
        target_price: target.max(Decimal::ZERO),
        stop_loss: stop,
        risk_reward,
    }
}

fn below(price: Decimal) -> Decimal {
    price * (Decimal::ONE - STOP_BUFFER)
}

fn above(price: Decimal) -> Decimal {
    price * (Decimal::ONE + STOP_BUFFER)
}

// ---------------------------------------------------------------------------
// Detectors
// ---------------------------------------------------------------------------

/// Flat resistance, rising support.
fn ascending_triangle(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    if !is_flat(&peaks) || !rising(slope(&valleys)?) {
        return None;
    }
    let resistance = mean(&peaks);
    let height = resistance - valleys[0];
    let last_valley = *valleys.last()?;
    Some(build(
        ChartPatternType::AscendingTriangle,
        dec!(70),
        s,
        resistance + height,
        below(last_valley),
    ))
}

/// Flat support, falling resistance.
fn descending_triangle(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    if !is_flat(&valleys) || !falling(slope(&peaks)?) {
        return None;
    }
    let support = mean(&valleys);
    let height = peaks[0] - support;
    let last_peak = *peaks.last()?;
    Some(build(
        ChartPatternType::DescendingTriangle,
        dec!(70),
        s,
        support - height,
        above(last_peak),
    ))
}

/// Falling resistance meeting rising support.
fn symmetrical_triangle(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    if !falling(slope(&peaks)?) || !rising(slope(&valleys)?) {
        return None;
    }
    let height = peaks[0] - valleys[0];
    let last_valley = *valleys.last()?;
    Some(build(
        ChartPatternType::SymmetricalTriangle,
        dec!(60),
        s,
        s.current + height,
        below(last_valley),
    ))
}

/// Both lines rising, support steeper than resistance.
fn rising_wedge(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    let (tp, tv) = (slope(&peaks)?, slope(&valleys)?);
    if !rising(tp) || !rising(tv) || tv - tp < PARALLEL_THRESHOLD {
        return None;
    }
    let last_peak = *peaks.last()?;
    Some(build(
        ChartPatternType::RisingWedge,
        dec!(65),
        s,
        valleys[0],
        above(last_peak),
    ))
}

/// Both lines falling, resistance steeper than support.
fn falling_wedge(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    let (tp, tv) = (slope(&peaks)?, slope(&valleys)?);
    if !falling(tp) || !falling(tv) || tv - tp < PARALLEL_THRESHOLD {
        return None;
    }
    let last_valley = *valleys.last()?;
    Some(build(
        ChartPatternType::FallingWedge,
        dec!(65),
        s,
        peaks[0],
        below(last_valley),
    ))
}

/// Parallel rising or falling trendlines.
fn channel(s: &Swings) -> Option<ChartPattern> {
    if !s.has_two_each() {
        return None;
    }
    let (peaks, valleys) = (s.peak_prices(), s.valley_prices());
    let (tp, tv) = (slope(&peaks)?, slope(&valleys)?);
    if (tp - tv).abs() >= PARALLEL_THRESHOLD {
        return None;
    }
    let last_peak = *peaks.last()?;
    let last_valley = *valleys.last()?;
    let width = (last_peak - last_valley).abs();

    if rising(tp) && rising(tv) {
        Some(build(
            ChartPatternType::ChannelUp,
            dec!(60),
            s,
            s.current + width,
            below(last_valley),
        ))
    } else if falling(tp) && falling(tv) {
        Some(build(
            ChartPatternType::ChannelDown,
            dec!(60),
            s,
            s.current - width,
            above(last_peak),
        ))
    } else {
        None
    }
}

/// Three most recent peaks: a head at least 2% above two shoulders that
/// sit within 3% of each other, neckline from the valleys in between.
fn head_and_shoulders(s: &Swings) -> Option<ChartPattern> {
    if s.peaks.len() < 3 {
        return None;
    }
    let n = s.peaks.len();
    let (li, left) = s.peaks[n - 3];
    let (_, head) = s.peaks[n - 2];
    let (ri, right) = s.peaks[n - 1];

    let shoulder_max = left.max(right);
    if head <= above(shoulder_max) {
        return None;
    }
    if (left - right).abs() / shoulder_max > dec!(0.03) {
        return None;
    }

    let neck: Vec<Decimal> = s
        .valleys
        .iter()
        .filter(|&&(i, _)| i > li && i < ri)
        .map(|&(_, p)| p)
        .collect();
    if neck.is_empty() {
        return None;
    }
    let neckline = mean(&neck);

    Some(build(
        ChartPatternType::HeadAndShoulders,
        dec!(75),
        s,
        neckline - (head - neckline),
        above(right),
    ))
}

/// Two matching highs (within 2%) with a valley at least 3% below them.
fn double_top(s: &Swings) -> Option<ChartPattern> {
    if s.peaks.len() < 2 {
        return None;
    }
    let n = s.peaks.len();
    let (i1, p1) = s.peaks[n - 2];
    let (i2, p2) = s.peaks[n - 1];
    if (p1 - p2).abs() / p1.max(p2) > dec!(0.02) {
        return None;
    }
    let top = (p1 + p2) / Decimal::TWO;
    let valley = s
        .valleys
        .iter()
        .filter(|&&(i, _)| i > i1 && i < i2)
        .map(|&(_, p)| p)
        .min()?;
    if valley > top * dec!(0.97) {
        return None;
    }
    Some(build(
        ChartPatternType::DoubleTop,
        dec!(70),
        s,
        valley - (top - valley),
        above(p1.max(p2)),
    ))
}

/// Two matching lows (within 2%) with a peak at least 3% above them.
fn double_bottom(s: &Swings) -> Option<ChartPattern> {
    if s.valleys.len() < 2 {
        return None;
    }
    let n = s.valleys.len();
    let (i1, v1) = s.valleys[n - 2];
    let (i2, v2) = s.valleys[n - 1];
    if v1.min(v2).is_zero() || (v1 - v2).abs() / v1.min(v2) > dec!(0.02) {
        return None;
    }
    let bottom = (v1 + v2) / Decimal::TWO;
    let peak = s
        .peaks
        .iter()
        .filter(|&&(i, _)| i > i1 && i < i2)
        .map(|&(_, p)| p)
        .max()?;
    if peak < bottom * dec!(1.03) {
        return None;
    }
    Some(build(
        ChartPatternType::DoubleBottom,
        dec!(70),
        s,
        peak + (peak - bottom),
        below(v1.min(v2)),
    ))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    fn detect(pivots: &[i64], steps: usize) -> Vec<ChartPattern> {
        detect_patterns(&zigzag(pivots, steps), &AnalyzerConfig::default())
    }

    fn find(found: &[ChartPattern], t: ChartPatternType) -> Option<&ChartPattern> {
        found.iter().find(|p| p.pattern_type == t)
    }

    #[test]
    fn test_too_few_samples() {
        assert!(detect(&[90, 100, 93, 100], 3).is_empty());
    }

    #[test]
    fn test_ascending_triangle() {
        let found = detect(&[90, 100, 93, 100, 96, 100, 98], 6);
        let p = find(&found, ChartPatternType::AscendingTriangle).expect("ascending triangle");

        assert_eq!(p.direction, Direction::Bullish);
        assert_eq!(p.entry_price, Decimal::from(98));
        // Resistance 100, first valley 93 → target 107
        assert_eq!(p.target_price, Decimal::from(107));
        assert_eq!(p.stop_loss, dec!(96) * dec!(0.98));
        assert!(p.risk_reward > Decimal::ZERO);
    }

    #[test]
    fn test_double_bottom() {
        let found = detect(&[100, 90, 97, 90, 99], 8);
        let p = find(&found, ChartPatternType::DoubleBottom).expect("double bottom");

        assert_eq!(p.direction, Direction::Bullish);
        assert_eq!(p.target_price, Decimal::from(104));
        assert_eq!(p.stop_loss, dec!(88.2));
    }

    #[test]
    fn test_head_and_shoulders() {
        let found = detect(&[90, 100, 92, 108, 92, 100, 88], 6);
        let p = find(&found, ChartPatternType::HeadAndShoulders).expect("head and shoulders");

        assert_eq!(p.direction, Direction::Bearish);
        // Neckline 92, head 108 → target 76
        assert_eq!(p.target_price, Decimal::from(76));
        assert_eq!(p.stop_loss, dec!(102));
        assert!(p.stop_loss > p.entry_price);
    }

    #[test]
    fn test_channel_up() {
        // Peaks and valleys both climb ~10% with the same slope
        let found = detect(&[100, 110, 104, 115, 109, 121, 114], 6);
        assert!(find(&found, ChartPatternType::ChannelUp).is_some());
        assert!(find(&found, ChartPatternType::RisingWedge).is_none());
    }

    #[test]
    fn test_sorted_by_confidence() {
        let found = detect(&[90, 100, 92, 108, 92, 100, 88], 6);
        assert!(found.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn test_bearish_plan_sides_enforced() {
        let swings = Swings {
            current: Decimal::from(100),
            peaks: vec![],
            valleys: vec![],
        };
        // Target above entry and stop below entry are both wrong for a bearish setup
        let p = build(
            ChartPatternType::DoubleTop,
            dec!(70),
            &swings,
            Decimal::from(110),
            Decimal::from(90),
        );
        assert_eq!(p.target_price, Decimal::from(95));
        assert_eq!(p.stop_loss, Decimal::from(105));
        assert_eq!(p.risk_reward, Decimal::ONE);
    }
}
