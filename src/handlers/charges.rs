use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::gateways::stripe::CardData;
use crate::services::charges::{
    CardChargeRequest, CardSource, Payer, PixChargeRequest,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PayerBody {
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PixChargeBody {
    pub payment_plan_id: i64,
    pub bot_id: i64,
    #[serde(default)]
    pub contact_id: Option<i64>,
    pub payer: PayerBody,
}

pub async fn create_pix_charge(
    State(state): State<AppState>,
    Json(body): Json<PixChargeBody>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .charges
        .create_pix_charge(PixChargeRequest {
            payment_plan_id: body.payment_plan_id,
            bot_id: body.bot_id,
            contact_id: body.contact_id,
            payer: Payer {
                email: body.payer.email,
                first_name: body.payer.first_name,
            },
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "transaction": outcome.transaction,
            "pix": outcome.pix,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct CardBody {
    pub number: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub cvc: String,
}

#[derive(Debug, Deserialize)]
pub struct CardChargeBody {
    pub payment_plan_id: i64,
    pub bot_id: i64,
    #[serde(default)]
    pub contact_id: Option<i64>,
    #[serde(default)]
    pub payment_method_id: Option<String>,
    #[serde(default)]
    pub card: Option<CardBody>,
}

pub async fn create_card_charge(
    State(state): State<AppState>,
    Json(body): Json<CardChargeBody>,
) -> Result<impl IntoResponse, AppError> {
    let source = match (body.payment_method_id, body.card) {
        (Some(id), None) => CardSource::PaymentMethod(id),
        (None, Some(card)) => CardSource::Card(CardData {
            number: card.number,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
            cvc: card.cvc,
        }),
        _ => {
            return Err(AppError::Validation(
                "provide exactly one of payment_method_id or card".to_string(),
            ))
        }
    };

    let outcome = state
        .charges
        .create_card_charge(CardChargeRequest {
            payment_plan_id: body.payment_plan_id,
            bot_id: body.bot_id,
            contact_id: body.contact_id,
            source,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "transaction": outcome.transaction,
            "client_secret": outcome.client_secret,
        })),
    ))
}
