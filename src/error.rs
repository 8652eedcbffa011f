use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::domain::Gateway;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payment plan {0} not found")]
    PlanNotFound(i64),

    #[error("payment plan {0} is inactive")]
    PlanInactive(i64),

    #[error("gateway {gateway} not configured for bot {bot_id}")]
    GatewayNotConfigured { gateway: Gateway, bot_id: i64 },

    #[error("gateway call failed: {0}")]
    Gateway(String),

    #[error("charge failed: {message}")]
    ChargeFailed { transaction_id: i64, message: String },

    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("malformed webhook payload: {0}")]
    MalformedWebhook(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::PlanNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PlanInactive(_) | AppError::GatewayNotConfigured { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::Gateway(_) | AppError::ChargeFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::InvalidSignature(_)
            | AppError::MalformedWebhook(_)
            | AppError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            // A charge failure leaves a rejected transaction row behind;
            // surface its id so a user report can be matched to the audit
            // trail.
            AppError::ChargeFailed { transaction_id, .. } => Json(json!({
                "error": self.to_string(),
                "status": status.as_u16(),
                "transaction_id": transaction_id,
            })),
            _ => Json(json!({
                "error": self.to_string(),
                "status": status.as_u16(),
            })),
        };

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_client_errors() {
        let error = AppError::GatewayNotConfigured {
            gateway: Gateway::MercadoPago,
            bot_id: 7,
        };
        assert_eq!(error.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error.to_string().contains("mercadopago"));
    }

    #[test]
    fn plan_errors_map_to_4xx() {
        assert_eq!(AppError::PlanNotFound(1).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PlanInactive(1).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn gateway_failures_map_to_bad_gateway() {
        let error = AppError::ChargeFailed {
            transaction_id: 42,
            message: "card declined".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn signature_failures_map_to_bad_request() {
        let error = AppError::InvalidSignature("missing v1".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn charge_failed_response_carries_transaction_id() {
        let error = AppError::ChargeFailed {
            transaction_id: 42,
            message: "card declined".to_string(),
        };
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn database_error_response() {
        let error = AppError::Database(sqlx::Error::RowNotFound);
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
