use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use patternbot::analysis::{AnalyzerConfig, SignalAction, TechnicalAnalyzer, Trend};
use patternbot::db::{MemoryStore, Store};
use patternbot::models::PricePoint;

fn series(prices: &[Decimal]) -> Vec<PricePoint> {
    let start = Utc::now() - Duration::hours(prices.len() as i64);
    prices
        .iter()
        .enumerate()
        .map(|(i, &p)| PricePoint::new(p, Decimal::from(1_000), start + Duration::hours(i as i64)))
        .collect()
}

/// Oscillates between 90 and 110 on a ten-sample cycle.
fn zigzag(len: usize) -> Vec<PricePoint> {
    let prices: Vec<Decimal> = (0..len)
        .map(|i| {
            let phase = (i % 10) as i64;
            let offset = if phase <= 5 { phase * 4 } else { (10 - phase) * 4 };
            Decimal::from(90 + offset)
        })
        .collect();
    series(&prices)
}

#[test]
fn test_short_series_yields_empty_components() {
    let analyzer = TechnicalAnalyzer::default();
    let data = series(&[dec!(10), dec!(12), dec!(11), dec!(13)]);

    assert!(analyzer.support_resistance(&data).is_empty());
    assert!(analyzer.detect_patterns(&data).is_empty());

    let report = analyzer.analyze(&data);
    assert_eq!(report.sample_count, 4);
    assert_eq!(report.current_price, Some(dec!(13)));
    assert!(report.support_resistance.is_empty());
}

#[test]
fn test_fibonacci_over_rising_series() {
    let analyzer = TechnicalAnalyzer::default();
    let data = series(&[dec!(10), dec!(12), dec!(15), dec!(20)]);

    let fib = analyzer.fibonacci_levels(&data).expect("fibonacci");
    assert_eq!(fib.trend, Trend::Up);
    assert_eq!(fib.high, dec!(20));
    assert_eq!(fib.low, dec!(10));
    assert_eq!(fib.level(dec!(0.5)), Some(dec!(15)));
    assert_eq!(fib.level(dec!(0.618)), Some(dec!(13.82)));
    assert_eq!(fib.entry_levels, vec![dec!(16.18), dec!(15), dec!(13.82)]);
}

#[test]
fn test_full_report_on_oscillating_series() {
    let analyzer = TechnicalAnalyzer::default();
    let data = zigzag(60);
    let report = analyzer.analyze(&data);

    assert_eq!(report.sample_count, 60);
    assert!(!report.support_resistance.is_empty());
    assert!(report.support_resistance.len() <= analyzer.config().max_levels);
    for level in &report.support_resistance {
        assert!(level.strength <= Decimal::ONE_HUNDRED);
        assert!(level.touches >= 1);
    }

    let pivots = report.pivots.expect("pivots");
    assert_eq!(pivots.high, dec!(110));
    assert_eq!(pivots.low, dec!(90));
    assert!(pivots.classic.s1 < pivots.classic.pivot);
    assert!(pivots.classic.pivot < pivots.classic.r1);

    let signal = report.signal;
    let current = report.current_price.expect("price");
    assert!(signal.confidence >= dec!(50) && signal.confidence <= dec!(95));
    assert_eq!(signal.entry_price, current);
    match signal.action {
        SignalAction::Sell => {
            assert!(signal.stop_loss > current);
            assert!(signal.take_profit < current);
        }
        SignalAction::Buy | SignalAction::Hold => {
            assert!(signal.stop_loss < current);
            assert!(signal.take_profit > current);
        }
    }
}

#[test]
fn test_input_capped_to_most_recent_samples() {
    let analyzer = TechnicalAnalyzer::new(AnalyzerConfig {
        max_samples: 20,
        ..AnalyzerConfig::default()
    });
    let mut prices: Vec<Decimal> = vec![dec!(500); 40];
    prices.extend(zigzag(20).iter().map(|p| p.price));

    let report = analyzer.analyze(&series(&prices));
    assert_eq!(report.sample_count, 20);
    // The early spike is outside the window
    assert_eq!(report.fibonacci.expect("fibonacci").high, dec!(110));
}

#[test]
fn test_trailing_stop_ratchets_and_triggers() {
    let analyzer = TechnicalAnalyzer::default();

    let first = analyzer.trailing_stop(dec!(100), None, dec!(10));
    assert_eq!(first.highest_price, dec!(100));
    assert_eq!(first.stop_price, dec!(90));
    assert!(!first.triggered);

    let higher = analyzer.trailing_stop(dec!(120), Some(first.highest_price), dec!(10));
    assert_eq!(higher.stop_price, dec!(108));

    let fall = analyzer.trailing_stop(dec!(108), Some(higher.highest_price), dec!(10));
    assert_eq!(fall.highest_price, dec!(120));
    assert!(fall.triggered);
}

#[tokio::test]
async fn test_analysis_over_stored_history() {
    let store = MemoryStore::new();
    let token = store.insert_token("ZIG", dec!(90));
    store.push_price_points(token.id, &zigzag(80));

    let history = store.price_history(token.id, 50).await.unwrap();
    assert_eq!(history.len(), 50);
    assert!(history.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let report = TechnicalAnalyzer::default().analyze(&history);
    assert_eq!(report.sample_count, 50);
    assert!(report.fibonacci.is_some());
}
