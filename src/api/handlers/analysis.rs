use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::analysis::TechnicalAnalysis;
use crate::errors::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AnalysisParams {
    pub limit: Option<usize>,
}

/// GET /api/tokens/:id/analysis?limit=N: full technical report over the
/// token's most recent price history.
pub async fn token_analysis(
    State(state): State<AppState>,
    Path(token_id): Path<Uuid>,
    Query(params): Query<AnalysisParams>,
) -> Result<Json<ApiResponse<TechnicalAnalysis>>, AppError> {
    if state.store.get_token(token_id).await?.is_none() {
        return Err(AppError::NotFound(format!("token {token_id} not found")));
    }

    let max = state.analyzer.config().max_samples;
    let limit = params.limit.unwrap_or(200).clamp(1, max);
    let history = state.store.price_history(token_id, limit as i64).await?;

    Ok(Json(ApiResponse::ok(state.analyzer.analyze(&history))))
}
