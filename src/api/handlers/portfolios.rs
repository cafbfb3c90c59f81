use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::ApiResponse;
use crate::errors::AppError;
use crate::execution::OrderRequest;
use crate::models::{Portfolio, StatsUpdate, Trade};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct AutoTradingToggle {
    pub enabled: bool,
}

/// POST /api/portfolios/:id/auto-trading
pub async fn set_auto_trading(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<AutoTradingToggle>,
) -> Result<Json<ApiResponse<Portfolio>>, AppError> {
    let portfolio = if body.enabled {
        state.engine.enable_portfolio(id).await?
    } else {
        state.engine.disable_portfolio(id).await?
    };
    Ok(Json(ApiResponse::ok(portfolio)))
}

/// GET /api/portfolios/:id/stats
pub async fn stats(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<StatsUpdate>>, AppError> {
    let stats = state.engine.portfolio_stats(id).await?;
    Ok(Json(ApiResponse::ok(stats)))
}

/// POST /api/portfolios/:id/orders: risk-gated manual order.
pub async fn place_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<OrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Trade>>), AppError> {
    let trade = state.engine.place_order(id, &request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(trade))))
}
