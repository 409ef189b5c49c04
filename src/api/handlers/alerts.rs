use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::consensus::StatsSnapshot;
use crate::errors::AppError;
use crate::models::{Alert, Side, WindowKey};
use crate::AppState;

use super::ApiResponse;

const DEFAULT_LIMIT: usize = 20;
const MAX_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

pub async fn recent(
    State(state): State<AppState>,
    Query(q): Query<RecentQuery>,
) -> Result<Json<ApiResponse<Vec<Alert>>>, AppError> {
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let alerts = state.store.recent(limit).await?;
    Ok(Json(ApiResponse::ok(alerts)))
}

pub async fn latest(
    State(state): State<AppState>,
    Path((condition_id, outcome, side)): Path<(String, i32, String)>,
) -> Result<Json<ApiResponse<Alert>>, AppError> {
    let side = Side::from_api_str(&side)
        .ok_or_else(|| AppError::BadRequest(format!("unknown side: {side}")))?;
    let key = WindowKey::new(condition_id, outcome, side);

    match state.store.lookup_latest(&key).await? {
        Some(alert) => Ok(Json(ApiResponse::ok(alert))),
        None => Err(AppError::NotFound(format!("no alert for {key}"))),
    }
}

#[derive(Debug, Serialize)]
pub struct SuppressionSummary {
    pub stats: StatsSnapshot,
    pub min_consensus: usize,
    pub window_min: i64,
    pub cooldown_min: i64,
    pub min_total_position_usd: rust_decimal::Decimal,
}

pub async fn suppressions(State(state): State<AppState>) -> Json<ApiResponse<SuppressionSummary>> {
    let c = &state.consensus;
    Json(ApiResponse::ok(SuppressionSummary {
        stats: state.stats.snapshot(),
        min_consensus: c.min_consensus,
        window_min: c.window.num_minutes(),
        cooldown_min: c.cooldown.num_minutes(),
        min_total_position_usd: c.min_total_position_usd,
    }))
}
