use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use crate::errors::AppError;
use crate::models::MarketEvent;
use crate::services::Enqueued;
use crate::AppState;

/// POST /api/events: enqueue a pattern or alert event for evaluation.
///
/// Returns 202 once queued. A full queue drops the event and answers 503.
pub async fn publish(
    State(state): State<AppState>,
    Json(event): Json<MarketEvent>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let token_id = event.token_id();
    match state.intake.publish(event) {
        Enqueued::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "success": true, "token_id": token_id })),
        )),
        Enqueued::Dropped => Err(AppError::Unavailable("signal queue full, event dropped".into())),
        Enqueued::Closed => Err(AppError::Unavailable("signal listener stopped".into())),
    }
}
