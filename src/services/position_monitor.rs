use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::execution::DecisionEngine;

/// Run the position monitor loop. Every tick sweeps all enabled portfolios
/// through the exit rules and writes back their valuations. A failed
/// portfolio is logged inside the sweep; the loop itself never stops.
pub async fn run_position_monitor(engine: Arc<DecisionEngine>, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    // An overrunning sweep delays the next tick instead of bursting.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(interval_secs, "Position monitor started");

    loop {
        ticker.tick().await;

        let enabled = engine.enabled_portfolios().len();
        if enabled == 0 {
            tracing::debug!("Position monitor: no enabled portfolios");
            continue;
        }

        let start = Instant::now();
        let sold = engine.monitor_positions().await;
        let elapsed = start.elapsed();
        histogram!("monitor_sweep_seconds").record(elapsed.as_secs_f64());

        if sold > 0 {
            tracing::info!(portfolios = enabled, sold, elapsed_ms = elapsed.as_millis() as u64, "Monitor sweep closed positions");
        } else {
            tracing::debug!(portfolios = enabled, elapsed_ms = elapsed.as_millis() as u64, "Monitor sweep complete");
        }
    }
}
