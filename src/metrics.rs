use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // Pre-register counters so they appear even before the first increment.
    counter!("market_events_total").absolute(0);
    counter!("market_events_dropped").absolute(0);
    counter!("signals_generated").absolute(0);
    counter!("trades_executed").absolute(0);
    counter!("sells_rejected").absolute(0);
    counter!("rebalance_sales").absolute(0);

    gauge!("enabled_portfolios").set(0.0);
    gauge!("open_positions").set(0.0);

    histogram!("monitor_sweep_seconds").record(0.0);

    handle
}
