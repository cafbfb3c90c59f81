use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

/// GET /health: store connectivity plus engine status.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.store.ping().await;
    let enabled = state.engine.enabled_portfolios().len();

    if store_ok {
        (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "enabled_portfolios": enabled })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "store": "disconnected" })),
        )
    }
}

/// GET /metrics: Prometheus scrape payload.
pub async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics_handle.render(),
    )
}
