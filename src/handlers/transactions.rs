//! Read-only transaction projections for billing/reporting UIs, plus the
//! terminal-transition entry point the external expiration sweep calls.

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let transaction = state
        .store
        .transaction(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
    Ok(Json(transaction))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let limit = pagination.limit.unwrap_or(50).clamp(1, 200);
    let offset = pagination.offset.unwrap_or(0).max(0);
    let transactions = state.store.list_transactions(limit, offset).await?;
    Ok(Json(transactions))
}

pub async fn status_counts(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let counts = state.store.status_counts().await?;
    Ok(Json(counts))
}

#[derive(Debug, Deserialize)]
pub struct ExpireStaleBody {
    /// Pending transactions created more than this many minutes ago are
    /// cancelled.
    pub older_than_minutes: i64,
}

pub async fn expire_stale(
    State(state): State<AppState>,
    Json(body): Json<ExpireStaleBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.older_than_minutes <= 0 {
        return Err(AppError::Validation(
            "older_than_minutes must be positive".to_string(),
        ));
    }
    let cutoff = Utc::now() - Duration::minutes(body.older_than_minutes);
    let expired = state.store.expire_stale_pending(cutoff).await?;
    Ok(Json(json!({ "expired": expired })))
}
