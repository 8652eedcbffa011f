//! Stripe adapter: card tokenization, PaymentIntent creation/fetch and
//! `Stripe-Signature` verification.

use std::collections::HashMap;

use bigdecimal::BigDecimal;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::gateways::credentials::Credentials;
use crate::gateways::http;

pub const DEFAULT_BASE_URL: &str = "https://api.stripe.com";
// Replay window for signed webhooks.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

pub struct StripeClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

#[derive(Debug, Clone)]
pub struct CardData {
    pub number: String,
    pub exp_month: u32,
    pub exp_year: u32,
    pub cvc: String,
}

#[derive(Debug, Clone)]
pub struct CreateCardPayment {
    pub amount: BigDecimal,
    pub currency: String,
    pub payment_method_id: String,
    pub description: String,
    /// Local transaction id, carried in the intent's metadata.
    pub external_reference: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl PaymentIntent {
    pub fn external_reference(&self) -> Option<&str> {
        self.metadata.get("external_reference").map(String::as_str)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PaymentMethodObject {
    id: String,
}

/// Webhook envelope. Like the PIX side, the embedded object is only a hint;
/// the intent is re-fetched before any state is touched.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: WebhookObject,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookObject {
    pub id: String,
}

impl WebhookEvent {
    pub fn is_payment_intent(&self) -> bool {
        self.event_type.starts_with("payment_intent.")
    }
}

fn amount_in_cents(amount: &BigDecimal) -> Result<i64, AppError> {
    let cents = (amount * BigDecimal::from(100)).with_scale(0);
    cents
        .to_string()
        .parse::<i64>()
        .map_err(|_| AppError::Internal("amount is not representable in cents".to_string()))
}

impl StripeClient {
    pub fn with_base_url(credentials: Credentials, base_url: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            base_url: base_url.into(),
            credentials,
        }
    }

    /// Tokenizes a raw card payload into a payment-method id. Only called
    /// when the caller did not supply a tokenized id of their own.
    pub async fn create_payment_method(&self, card: &CardData) -> Result<String, AppError> {
        let form = [
            ("type", "card".to_string()),
            ("card[number]", card.number.clone()),
            ("card[exp_month]", card.exp_month.to_string()),
            ("card[exp_year]", card.exp_year.to_string()),
            ("card[cvc]", card.cvc.clone()),
        ];

        let response = http::send_with_retry(
            self.http
                .post(format!("{}/v1/payment_methods", self.base_url))
                .bearer_auth(&self.credentials.access_token)
                .form(&form),
        )
        .await?;

        if !response.status().is_success() {
            return Err(http::error_for_response("stripe", response).await);
        }

        let method: PaymentMethodObject = response
            .json()
            .await
            .map_err(|e| AppError::Gateway(format!("stripe response decode failed: {e}")))?;
        Ok(method.id)
    }

    pub async fn create_payment_intent(
        &self,
        request: &CreateCardPayment,
    ) -> Result<PaymentIntent, AppError> {
        let form = [
            ("amount", amount_in_cents(&request.amount)?.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("payment_method", request.payment_method_id.clone()),
            ("description", request.description.clone()),
            ("confirm", "true".to_string()),
            ("payment_method_types[]", "card".to_string()),
            (
                "metadata[external_reference]",
                request.external_reference.clone(),
            ),
        ];

        let response = http::send_with_retry(
            self.http
                .post(format!("{}/v1/payment_intents", self.base_url))
                .bearer_auth(&self.credentials.access_token)
                .header("Idempotency-Key", Uuid::new_v4().to_string())
                .form(&form),
        )
        .await?;

        if !response.status().is_success() {
            return Err(http::error_for_response("stripe", response).await);
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| AppError::Gateway(format!("stripe response decode failed: {e}")))
    }

    pub async fn get_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, AppError> {
        let response = http::send_with_retry(
            self.http
                .get(format!("{}/v1/payment_intents/{}", self.base_url, intent_id))
                .bearer_auth(&self.credentials.access_token),
        )
        .await?;

        if !response.status().is_success() {
            return Err(http::error_for_response("stripe", response).await);
        }

        response
            .json::<PaymentIntent>()
            .await
            .map_err(|e| AppError::Gateway(format!("stripe response decode failed: {e}")))
    }
}

/// Verifies a `Stripe-Signature` header (`t=...,v1=...`) over the raw body,
/// rejecting timestamps outside the replay window.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
) -> Result<(), AppError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidSignature("Stripe-Signature missing t".to_string()))?;
    let signature = signature
        .ok_or_else(|| AppError::InvalidSignature("Stripe-Signature missing v1".to_string()))?;
    let expected = hex::decode(signature)
        .map_err(|_| AppError::InvalidSignature("v1 is not hex".to_string()))?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| AppError::InvalidSignature("t is not a timestamp".to_string()))?;
    if (Utc::now().timestamp() - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(AppError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("hmac key setup failed".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature("Stripe-Signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    pub fn sign(secret: &str, payload: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", payload, Utc::now().timestamp());
        assert!(verify_webhook_signature("whsec_test", payload, &header).is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_other", payload, Utc::now().timestamp());
        let result = verify_webhook_signature("whsec_test", payload, &header);
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn rejects_modified_payload() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", payload, Utc::now().timestamp());
        let result =
            verify_webhook_signature("whsec_test", br#"{"type":"tampered"}"#, &header);
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let header = sign("whsec_test", payload, Utc::now().timestamp() - 600);
        let result = verify_webhook_signature("whsec_test", payload, &header);
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn rejects_header_without_signature() {
        let result = verify_webhook_signature("whsec_test", b"{}", "t=1234567890");
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn amounts_convert_to_cents_exactly() {
        assert_eq!(amount_in_cents(&"29.90".parse().unwrap()).unwrap(), 2990);
        assert_eq!(amount_in_cents(&"0.01".parse().unwrap()).unwrap(), 1);
        assert_eq!(amount_in_cents(&"100".parse().unwrap()).unwrap(), 10000);
    }
}
