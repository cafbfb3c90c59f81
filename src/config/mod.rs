use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

use crate::analysis::AnalyzerConfig;
use crate::execution::engine::EngineConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres URL. When unset the process runs against the in-memory store.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_json: bool,

    // Sizing and mode hysteresis
    pub trade_unit: Decimal,
    pub sell_only_enter_units: Decimal,
    pub sell_only_exit_units: Decimal,

    // Exit bands (percent)
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub sell_only_take_profit_pct: Decimal,
    pub cash_generation_pct: Decimal,
    pub stagnant_max_gain_pct: Decimal,

    // Signal evaluation
    pub strong_bullish_confidence: Decimal,
    pub take_profit_confidence_factor: Decimal,
    pub min_confidence: Decimal,

    // Scheduling
    pub monitor_interval_secs: u64,
    pub reconcile_interval_secs: u64,
    pub startup_timeout_secs: u64,

    // Channels
    pub signal_queue_capacity: usize,
    pub event_broadcast_capacity: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            trade_unit: env_or("TRADE_UNIT", Decimal::from(500)),
            sell_only_enter_units: env_or("SELL_ONLY_ENTER_UNITS", Decimal::ONE),
            sell_only_exit_units: env_or("SELL_ONLY_EXIT_UNITS", Decimal::TWO),

            stop_loss_pct: env_or("STOP_LOSS_PCT", Decimal::from(8)),
            take_profit_pct: env_or("TAKE_PROFIT_PCT", Decimal::from(15)),
            sell_only_take_profit_pct: env_or("SELL_ONLY_TAKE_PROFIT_PCT", Decimal::from(5)),
            cash_generation_pct: env_or("CASH_GENERATION_PCT", Decimal::TWO),
            stagnant_max_gain_pct: env_or("STAGNANT_MAX_GAIN_PCT", Decimal::from(3)),

            strong_bullish_confidence: env_or("STRONG_BULLISH_CONFIDENCE", Decimal::from(80)),
            take_profit_confidence_factor: env_or(
                "TAKE_PROFIT_CONFIDENCE_FACTOR",
                Decimal::new(8, 1),
            ),
            min_confidence: env_or("MIN_CONFIDENCE", Decimal::from(60)),

            monitor_interval_secs: env_or("MONITOR_INTERVAL_SECS", 30),
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", 60),
            startup_timeout_secs: env_or("STARTUP_TIMEOUT_SECS", 10),

            signal_queue_capacity: env_or("SIGNAL_QUEUE_CAPACITY", 500),
            event_broadcast_capacity: env_or("EVENT_BROADCAST_CAPACITY", 256),
        })
    }

    /// Engine thresholds derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            trade_unit: self.trade_unit,
            sell_only_enter_cash: self.trade_unit * self.sell_only_enter_units,
            sell_only_exit_cash: self.trade_unit * self.sell_only_exit_units,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            sell_only_take_profit_pct: self.sell_only_take_profit_pct,
            cash_generation_pct: self.cash_generation_pct,
            stagnant_max_gain_pct: self.stagnant_max_gain_pct,
            strong_bullish_confidence: self.strong_bullish_confidence,
            take_profit_confidence_factor: self.take_profit_confidence_factor,
            ..EngineConfig::default()
        }
    }

    pub fn analyzer_config(&self) -> AnalyzerConfig {
        AnalyzerConfig::default()
    }
}

/// Parse an env var, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, "Unparseable config value, using default");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_or_default_when_unset() {
        let v: u64 = env_or("PATTERNBOT_TEST_SURELY_UNSET", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn test_engine_config_hysteresis_band() {
        let mut config = AppConfig::from_env().expect("default config");
        config.trade_unit = Decimal::from(500);
        config.sell_only_enter_units = Decimal::ONE;
        config.sell_only_exit_units = Decimal::TWO;

        let engine = config.engine_config();
        assert_eq!(engine.sell_only_enter_cash, Decimal::from(500));
        assert_eq!(engine.sell_only_exit_cash, Decimal::from(1_000));
    }
}
