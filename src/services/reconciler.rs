use std::sync::Arc;

use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::execution::DecisionEngine;

/// Periodically align the engine's enabled-portfolio set with the persisted
/// auto-trading flags. Store failures are logged and retried next tick.
pub async fn run_reconciler(engine: Arc<DecisionEngine>, interval_secs: u64) {
    let mut ticker = interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        match engine.reconcile_enabled().await {
            Ok((0, 0)) => tracing::debug!("Reconciler: enabled set unchanged"),
            Ok((added, removed)) => {
                tracing::info!(added, removed, "Reconciler updated enabled portfolios")
            }
            Err(e) => tracing::error!(error = %e, "Reconciler: failed to load enabled portfolios"),
        }
    }
}
