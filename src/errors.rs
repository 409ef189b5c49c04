use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Ingestion validation
// ---------------------------------------------------------------------------

/// A trade record that can never enter a window.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("missing market identifier (condition_id)")]
    MissingConditionId,

    #[error("missing outcome index")]
    MissingOutcomeIndex,

    #[error("missing wallet address")]
    MissingWallet,

    #[error("missing or unknown side: {0:?}")]
    InvalidSide(Option<String>),

    #[error("missing timestamp")]
    MissingTimestamp,

    #[error("price {0:?} outside (0, 1]")]
    InvalidPrice(Option<Decimal>),

    #[error("no positive size or USD notional")]
    InvalidSize,
}

impl IngestError {
    /// Stable label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestError::MissingConditionId => "missing_condition_id",
            IngestError::MissingOutcomeIndex => "missing_outcome_index",
            IngestError::MissingWallet => "missing_wallet",
            IngestError::InvalidSide(_) => "invalid_side",
            IngestError::MissingTimestamp => "missing_timestamp",
            IngestError::InvalidPrice(_) => "invalid_price",
            IngestError::InvalidSize => "invalid_size",
        }
    }
}

// ---------------------------------------------------------------------------
// Alert store
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("corrupt alert row: {0}")]
    Decode(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

// ---------------------------------------------------------------------------
// Engine routing
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] IngestError),

    #[error("engine shard {0} has stopped")]
    ShardClosed(usize),
}

// ---------------------------------------------------------------------------
// HTTP API
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),
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
            AppError::Store(e) => {
                tracing::error!("Alert store error: {e:?}");
                (StatusCode::SERVICE_UNAVAILABLE, "Alert store unavailable".into())
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
