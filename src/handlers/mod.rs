pub mod brcode;
pub mod charges;
pub mod transactions;
pub mod webhooks;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let Some(pool) = &state.db else {
        // Memory-backed deployments (tests, local dev) have no pool to probe.
        return (
            StatusCode::OK,
            Json(json!({ "status": "healthy", "db": "not configured" })),
        );
    };

    let db_status = match sqlx::query("SELECT 1").execute(pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    let status_code = if db_status == "connected" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if db_status == "connected" { "healthy" } else { "unhealthy" },
            "db": db_status,
            "db_pool": {
                "active_connections": pool.size(),
                "idle_connections": pool.num_idle() as u32,
                "max_connections": pool.options().get_max_connections(),
            },
        })),
    )
}
