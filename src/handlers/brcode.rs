//! Diagnostic surface over the BR Code codec for support tooling.

use axum::{extract::State, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::brcode::{self, CrcReport};
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ValidateBody {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    #[serde(flatten)]
    pub report: CrcReport,
    /// What `add_crc` would hand out for this payload.
    pub corrected_code: String,
}

pub async fn validate(Json(body): Json<ValidateBody>) -> Result<impl IntoResponse, AppError> {
    let report = brcode::validate(&body.code);
    let corrected_code = brcode::add_crc(&body.code);
    Ok(Json(ValidateResponse {
        report,
        corrected_code,
    }))
}

pub async fn stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.stats.snapshot()))
}
