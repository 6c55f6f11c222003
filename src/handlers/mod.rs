pub mod deposits;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::health::check_health;
use crate::ports::ScanCursorRepository;
use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let last_scan = match state.scan_cursor.load().await {
        Ok(cursor) => cursor.and_then(|c| c.last_successful_scan),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read scan cursor for health check");
            None
        }
    };

    let health = check_health(&state.checkers, last_scan, state.started_at).await;
    let status_code = if health.status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(health))
}
