use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use patternbot::analysis::TechnicalAnalyzer;
use patternbot::api::router::create_router;
use patternbot::config::AppConfig;
use patternbot::db::{self, MemoryStore, PgStore, Store};
use patternbot::execution::{DecisionEngine, LimitsRiskGate, PaperExchange, RiskLimits};
use patternbot::models::EngineEvent;
use patternbot::services::{
    position_monitor, reconciler, signal_listener, BroadcastSink, HistoricalFeedback, SignalIntake,
};
use patternbot::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);
    let metrics_handle = patternbot::metrics::init_metrics();
    let addr = format!("{}:{}", config.host, config.port);

    let store: Arc<dyn Store> = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, running on the in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // --- Engine and its collaborators ---
    let (events_tx, _) = broadcast::channel::<EngineEvent>(config.event_broadcast_capacity.max(1));
    let events = BroadcastSink::new(events_tx);

    let risk_limits = RiskLimits {
        stop_loss_pct: config.stop_loss_pct,
        take_profit_pct: config.take_profit_pct,
        ..RiskLimits::default()
    };

    let engine = Arc::new(DecisionEngine::new(
        store.clone(),
        Arc::new(HistoricalFeedback::new(store.clone(), config.min_confidence)),
        Arc::new(LimitsRiskGate::new(store.clone(), risk_limits)),
        Arc::new(PaperExchange),
        Arc::new(events.clone()),
        config.engine_config(),
    ));

    // A slow store degrades startup rather than blocking it; the reconciler
    // picks the portfolios up later.
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);
    match tokio::time::timeout(startup_timeout, engine.reconcile_enabled()).await {
        Ok(Ok((loaded, _))) => tracing::info!(portfolios = loaded, "Enabled portfolios loaded"),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Failed to load enabled portfolios, starting degraded")
        }
        Err(_) => tracing::warn!(
            timeout_secs = config.startup_timeout_secs,
            "Timed out loading enabled portfolios, starting degraded"
        ),
    }

    // --- Background loops ---
    let monitor_engine = engine.clone();
    let monitor_interval = config.monitor_interval_secs;
    tokio::spawn(async move {
        position_monitor::run_position_monitor(monitor_engine, monitor_interval).await;
    });

    let reconcile_engine = engine.clone();
    let reconcile_interval = config.reconcile_interval_secs;
    tokio::spawn(async move {
        reconciler::run_reconciler(reconcile_engine, reconcile_interval).await;
    });

    let (intake, signal_rx) = SignalIntake::channel(config.signal_queue_capacity);
    let listener_engine = engine.clone();
    tokio::spawn(async move {
        signal_listener::run_signal_listener(signal_rx, listener_engine).await;
    });

    tracing::info!(
        trade_unit = %config.trade_unit,
        monitor_interval_secs = config.monitor_interval_secs,
        queue_capacity = config.signal_queue_capacity,
        "Decision engine running"
    );

    let state = AppState {
        engine,
        analyzer: TechnicalAnalyzer::new(config.analyzer_config()),
        store,
        intake,
        events,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env());
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
