use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(handlers::system::health_check))
        .route("/metrics", get(handlers::system::render_metrics));

    let api = Router::new()
        // Pattern / alert intake
        .route("/api/events", post(handlers::events::publish))
        // Portfolios
        .route(
            "/api/portfolios/:id/auto-trading",
            post(handlers::portfolios::set_auto_trading),
        )
        .route("/api/portfolios/:id/stats", get(handlers::portfolios::stats))
        .route("/api/portfolios/:id/orders", post(handlers::portfolios::place_order))
        // Technical analysis
        .route("/api/tokens/:id/analysis", get(handlers::analysis::token_analysis))
        // Event stream
        .route("/ws", get(handlers::ws::handler));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    public
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
