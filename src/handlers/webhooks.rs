//! Gateway webhook endpoints, one per gateway.
//!
//! Gateways re-deliver on any non-2xx, so once an event is authenticated the
//! handler answers 200 even when reconciliation could not complete: the next
//! delivery (or an explicit sweep) compensates, and an incorrect mutation is
//! worse than a dropped event. Signature failures stay 4xx.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::domain::Gateway;
use crate::error::AppError;
use crate::AppState;

async fn handle(
    state: AppState,
    gateway: Gateway,
    bot_id: i64,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    match state
        .reconciler
        .reconcile(gateway, bot_id, &headers, &body)
        .await
    {
        Ok(Some(outcome)) => Ok(Json(json!({
            "received": true,
            "status_changed": outcome.status_changed,
        }))),
        Ok(None) => Ok(Json(json!({ "received": true, "status_changed": false }))),
        Err(error @ (AppError::InvalidSignature(_) | AppError::MalformedWebhook(_))) => Err(error),
        Err(error) => {
            tracing::warn!(
                gateway = %gateway,
                bot_id,
                error = %error,
                "reconciliation failed, dropping event"
            );
            Ok(Json(json!({ "received": true, "status_changed": false })))
        }
    }
}

pub async fn mercadopago(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    handle(state, Gateway::MercadoPago, bot_id, headers, body).await
}

pub async fn stripe(
    State(state): State<AppState>,
    Path(bot_id): Path<i64>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    handle(state, Gateway::Stripe, bot_id, headers, body).await
}
