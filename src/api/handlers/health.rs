use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let eligible_wallets = state.registry.len_eligible();

    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "eligible_wallets": eligible_wallets })),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Health check: alert store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "store": "disconnected" })),
            )
        }
    }
}
