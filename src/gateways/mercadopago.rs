//! Mercado Pago adapter: PIX charge creation, authoritative payment fetch,
//! webhook envelope parsing and `x-signature` verification.

use chrono::{DateTime, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;
use crate::gateways::credentials::Credentials;
use crate::gateways::http;

pub const DEFAULT_BASE_URL: &str = "https://api.mercadopago.com";

type HmacSha256 = Hmac<Sha256>;

pub struct MercadoPagoClient {
    http: Client,
    base_url: String,
    credentials: Credentials,
}

#[derive(Debug, Clone)]
pub struct CreatePixPayment {
    pub amount: bigdecimal::BigDecimal,
    pub description: String,
    /// Local transaction id, echoed back by webhooks and payment fetches.
    pub external_reference: String,
    pub payer_email: String,
    pub payer_first_name: Option<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResponse {
    pub id: i64,
    pub status: String,
    #[serde(default)]
    pub status_detail: Option<String>,
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub date_of_expiration: Option<String>,
    #[serde(default)]
    pub point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PointOfInteraction {
    #[serde(default)]
    pub transaction_data: Option<TransactionData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionData {
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub qr_code_base64: Option<String>,
    #[serde(default)]
    pub ticket_url: Option<String>,
}

impl PaymentResponse {
    pub fn qr_code(&self) -> Option<&str> {
        self.point_of_interaction
            .as_ref()?
            .transaction_data
            .as_ref()?
            .qr_code
            .as_deref()
    }

    pub fn qr_code_base64(&self) -> Option<&str> {
        self.point_of_interaction
            .as_ref()?
            .transaction_data
            .as_ref()?
            .qr_code_base64
            .as_deref()
    }

    pub fn ticket_url(&self) -> Option<&str> {
        self.point_of_interaction
            .as_ref()?
            .transaction_data
            .as_ref()?
            .ticket_url
            .as_deref()
    }

    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        let raw = self.date_of_expiration.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Webhook envelope. Mercado Pago only tells us *that* a payment changed;
/// the payment object itself is always re-fetched.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    // Delivered as a string or a number depending on the notification type.
    pub id: serde_json::Value,
}

impl WebhookEvent {
    pub fn is_payment(&self) -> bool {
        self.event_type.as_deref() == Some("payment")
    }

    pub fn payment_id(&self) -> Option<String> {
        match &self.data.id {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

impl MercadoPagoClient {
    pub fn with_base_url(credentials: Credentials, base_url: impl Into<String>) -> Self {
        Self {
            http: http::client(),
            base_url: base_url.into(),
            credentials,
        }
    }

    pub async fn create_pix_payment(
        &self,
        request: &CreatePixPayment,
    ) -> Result<PaymentResponse, AppError> {
        let amount = request
            .amount
            .to_string()
            .parse::<f64>()
            .map_err(|_| AppError::Internal("amount is not representable".to_string()))?;

        let mut payer = json!({ "email": request.payer_email });
        if let Some(first_name) = &request.payer_first_name {
            payer["first_name"] = json!(first_name);
        }

        let body = json!({
            "transaction_amount": amount,
            "description": request.description,
            "payment_method_id": "pix",
            "external_reference": request.external_reference,
            "date_of_expiration": request.expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            "payer": payer,
        });

        let response = http::send_with_retry(
            self.http
                .post(format!("{}/v1/payments", self.base_url))
                .bearer_auth(&self.credentials.access_token)
                .header("X-Idempotency-Key", Uuid::new_v4().to_string())
                .json(&body),
        )
        .await?;

        if !response.status().is_success() {
            return Err(http::error_for_response("mercadopago", response).await);
        }

        response
            .json::<PaymentResponse>()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago response decode failed: {e}")))
    }

    pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentResponse, AppError> {
        let response = http::send_with_retry(
            self.http
                .get(format!("{}/v1/payments/{}", self.base_url, payment_id))
                .bearer_auth(&self.credentials.access_token),
        )
        .await?;

        if !response.status().is_success() {
            return Err(http::error_for_response("mercadopago", response).await);
        }

        response
            .json::<PaymentResponse>()
            .await
            .map_err(|e| AppError::Gateway(format!("mercadopago response decode failed: {e}")))
    }
}

/// Verifies the `x-signature` header (`ts=...,v1=...`) against the signed
/// manifest `id:{data.id};request-id:{x-request-id};ts:{ts};`.
pub fn verify_webhook_signature(
    secret: &str,
    x_signature: &str,
    x_request_id: &str,
    data_id: &str,
) -> Result<(), AppError> {
    let mut timestamp = None;
    let mut signature = None;
    for part in x_signature.split(',') {
        match part.trim().split_once('=') {
            Some(("ts", value)) => timestamp = Some(value),
            Some(("v1", value)) => signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::InvalidSignature("x-signature missing ts".to_string()))?;
    let signature = signature
        .ok_or_else(|| AppError::InvalidSignature("x-signature missing v1".to_string()))?;
    let expected = hex::decode(signature)
        .map_err(|_| AppError::InvalidSignature("v1 is not hex".to_string()))?;

    let manifest = format!("id:{data_id};request-id:{x_request_id};ts:{timestamp};");
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("hmac key setup failed".to_string()))?;
    mac.update(manifest.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| AppError::InvalidSignature("x-signature mismatch".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateways::credentials::CredentialSource;

    fn sign(secret: &str, data_id: &str, request_id: &str, ts: &str) -> String {
        let manifest = format!("id:{data_id};request-id:{request_id};ts:{ts};");
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(manifest.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let v1 = sign("topsecret", "12345", "req-1", "1700000000");
        let header = format!("ts=1700000000,v1={v1}");
        assert!(verify_webhook_signature("topsecret", &header, "req-1", "12345").is_ok());
    }

    #[test]
    fn rejects_wrong_secret() {
        let v1 = sign("othersecret", "12345", "req-1", "1700000000");
        let header = format!("ts=1700000000,v1={v1}");
        let result = verify_webhook_signature("topsecret", &header, "req-1", "12345");
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn rejects_malformed_header() {
        let result = verify_webhook_signature("topsecret", "garbage", "req-1", "12345");
        assert!(matches!(result, Err(AppError::InvalidSignature(_))));
    }

    #[test]
    fn webhook_payment_id_handles_both_shapes() {
        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"payment","data":{"id":"123"}}"#).unwrap();
        assert_eq!(event.payment_id().as_deref(), Some("123"));
        assert!(event.is_payment());

        let event: WebhookEvent =
            serde_json::from_str(r#"{"type":"payment","data":{"id":456}}"#).unwrap();
        assert_eq!(event.payment_id().as_deref(), Some("456"));
    }

    #[tokio::test]
    async fn create_pix_payment_decodes_transaction_data() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payments")
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": 999,
                    "status": "pending",
                    "point_of_interaction": {
                        "transaction_data": {
                            "qr_code": "000201qrpayload",
                            "qr_code_base64": "aGVsbG8=",
                            "ticket_url": "https://mp.example/ticket/999"
                        }
                    }
                }"#,
            )
            .create_async()
            .await;

        let client = MercadoPagoClient::with_base_url(
            Credentials {
                access_token: "TEST-token".to_string(),
                public_key: None,
                webhook_secret: None,
                source: CredentialSource::TenantConfig,
            },
            server.url(),
        );

        let payment = client
            .create_pix_payment(&CreatePixPayment {
                amount: "29.90".parse().unwrap(),
                description: "Plano mensal".to_string(),
                external_reference: "1".to_string(),
                payer_email: "payer@example.com".to_string(),
                payer_first_name: None,
                expires_at: Utc::now(),
            })
            .await
            .unwrap();

        assert_eq!(payment.id, 999);
        assert_eq!(payment.qr_code(), Some("000201qrpayload"));
        assert_eq!(payment.ticket_url(), Some("https://mp.example/ticket/999"));
    }
}
