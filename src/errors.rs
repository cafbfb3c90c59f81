use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Engine-level failures. None of these are fatal to the process; callers
/// log them and carry on with the next portfolio or tick.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("portfolio {0} not found")]
    PortfolioNotFound(Uuid),

    #[error("token {0} not found")]
    TokenNotFound(Uuid),

    #[error("position {0} not found")]
    PositionNotFound(Uuid),

    #[error("portfolio {0} is not enabled for auto-trading")]
    PortfolioNotEnabled(Uuid),

    #[error("invalid price {price} for token {token_id}")]
    InvalidPrice { token_id: Uuid, price: Decimal },

    #[error("open position already exists for token {0}")]
    DuplicatePosition(Uuid),

    #[error("insufficient cash: need {required}, have {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("sell already in flight for position {0}")]
    SellInFlight(Uuid),

    #[error("position {0} is already closed")]
    PositionClosed(Uuid),

    #[error("rejected by risk gate: {0}")]
    RiskRejected(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EngineError {
    /// Logic-guard outcomes: the request was refused, nothing failed.
    pub fn is_guard(&self) -> bool {
        matches!(
            self,
            EngineError::DuplicatePosition(_)
                | EngineError::InsufficientFunds { .. }
                | EngineError::SellInFlight(_)
                | EngineError::PositionClosed(_)
                | EngineError::RiskRejected(_)
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".into())
            }
        };

        (
            status,
            Json(ErrorBody {
                success: false,
                error: message,
            }),
        )
            .into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::PortfolioNotFound(_)
            | EngineError::TokenNotFound(_)
            | EngineError::PositionNotFound(_) => AppError::NotFound(e.to_string()),
            EngineError::PortfolioNotEnabled(_)
            | EngineError::InvalidPrice { .. }
            | EngineError::RiskRejected(_) => AppError::BadRequest(e.to_string()),
            EngineError::DuplicatePosition(_)
            | EngineError::InsufficientFunds { .. }
            | EngineError::SellInFlight(_)
            | EngineError::PositionClosed(_) => AppError::Conflict(e.to_string()),
            EngineError::Store(inner) => AppError::Internal(inner),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Internal(e.into())
    }
}
