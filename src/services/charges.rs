//! Transaction orchestrator: synchronous charge creation against the
//! tenant's gateway.
//!
//! The invariant both entry points keep: a transaction row is created
//! `pending` before the gateway is called and is never left there when the
//! call returns. It ends either with the gateway's mapped status (at minimum
//! `processing`) or `rejected` with the error in its audit trail.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;

use crate::brcode::{self, CorrectionStats};
use crate::config::FallbackCredentials;
use crate::db::models::{GatewayArtifacts, NewTransaction, PaymentPlan, Transaction};
use crate::db::Store;
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway, PaymentMethod};
use crate::error::AppError;
use crate::gateways::credentials::resolve_credentials;
use crate::gateways::mercadopago::{CreatePixPayment, MercadoPagoClient};
use crate::gateways::stripe::{CardData, CreateCardPayment, StripeClient};
use crate::services::GatewayEndpoints;

const PIX_EXPIRATION_MINUTES: i64 = 30;

/// The QR image arrives as a base64 PNG. An undecodable payload is dropped
/// rather than stored; the text `qr_code` remains usable on its own.
fn decoded_qr_image(raw: &str) -> Option<String> {
    match BASE64.decode(raw.as_bytes()) {
        Ok(_) => Some(raw.to_string()),
        Err(error) => {
            tracing::warn!(error = %error, "gateway returned an undecodable QR image, dropping it");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct Payer {
    pub email: String,
    pub first_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PixChargeRequest {
    pub payment_plan_id: i64,
    pub bot_id: i64,
    pub contact_id: Option<i64>,
    pub payer: Payer,
}

#[derive(Debug, Clone)]
pub enum CardSource {
    /// Already tokenized on the client.
    PaymentMethod(String),
    /// Raw card payload; tokenized by the adapter before charging.
    Card(CardData),
}

#[derive(Debug, Clone)]
pub struct CardChargeRequest {
    pub payment_plan_id: i64,
    pub bot_id: i64,
    pub contact_id: Option<i64>,
    pub source: CardSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct PixData {
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct PixChargeOutcome {
    pub transaction: Transaction,
    pub pix: PixData,
}

#[derive(Debug, Clone)]
pub struct CardChargeOutcome {
    pub transaction: Transaction,
    pub client_secret: Option<String>,
}

pub struct ChargeService {
    store: Arc<dyn Store>,
    stats: Arc<CorrectionStats>,
    environment: Environment,
    fallback: FallbackCredentials,
    endpoints: GatewayEndpoints,
}

impl ChargeService {
    pub fn new(
        store: Arc<dyn Store>,
        stats: Arc<CorrectionStats>,
        environment: Environment,
        fallback: FallbackCredentials,
        endpoints: GatewayEndpoints,
    ) -> Self {
        Self {
            store,
            stats,
            environment,
            fallback,
            endpoints,
        }
    }

    async fn load_active_plan(&self, plan_id: i64, bot_id: i64) -> Result<PaymentPlan, AppError> {
        let plan = self
            .store
            .payment_plan(plan_id)
            .await?
            .ok_or(AppError::PlanNotFound(plan_id))?;
        if !plan.active {
            return Err(AppError::PlanInactive(plan_id));
        }
        if plan.bot_id != bot_id {
            return Err(AppError::Validation(format!(
                "payment plan {plan_id} does not belong to bot {bot_id}"
            )));
        }
        Ok(plan)
    }

    /// The status a transaction lands in after a successful synchronous
    /// call. The gateway may still report its own `pending` for a charge it
    /// just accepted; locally that charge is in flight, so the floor is
    /// `processing`.
    fn post_charge_status(mapped: CanonicalStatus) -> CanonicalStatus {
        if mapped == CanonicalStatus::Pending {
            CanonicalStatus::Processing
        } else {
            mapped
        }
    }

    async fn reject_with_error(&self, transaction_id: i64, message: &str) -> Result<(), AppError> {
        tracing::error!(transaction_id, error = message, "gateway call failed, rejecting transaction");
        self.store
            .advance_status(
                transaction_id,
                CanonicalStatus::Rejected,
                None,
                AuditEntry::new("charge.error", json!({ "error": message })),
            )
            .await?;
        Ok(())
    }

    pub async fn create_pix_charge(
        &self,
        request: PixChargeRequest,
    ) -> Result<PixChargeOutcome, AppError> {
        let plan = self
            .load_active_plan(request.payment_plan_id, request.bot_id)
            .await?;

        // Resolve before writing anything: a misconfigured tenant fails
        // without leaving a transaction row behind.
        let credentials = resolve_credentials(
            self.store.as_ref(),
            request.bot_id,
            Gateway::MercadoPago,
            self.environment,
            &self.fallback,
        )
        .await?;

        let transaction = self
            .store
            .insert_transaction(
                NewTransaction {
                    bot_id: request.bot_id,
                    contact_id: request.contact_id,
                    payment_plan_id: plan.id,
                    payment_cycle_id: None,
                    amount: plan.price.clone(),
                    currency: "BRL".to_string(),
                    gateway: Gateway::MercadoPago,
                    payment_method: PaymentMethod::Pix,
                },
                AuditEntry::new(
                    "charge.create",
                    json!({ "plan_id": plan.id, "plan_title": plan.title, "payer_email": request.payer.email }),
                ),
            )
            .await?;

        let expires_at = Utc::now() + Duration::minutes(PIX_EXPIRATION_MINUTES);
        let client = MercadoPagoClient::with_base_url(credentials, &self.endpoints.mercadopago);
        let payment = match client
            .create_pix_payment(&CreatePixPayment {
                amount: plan.price.clone(),
                description: plan.title.clone(),
                external_reference: transaction.id.to_string(),
                payer_email: request.payer.email.clone(),
                payer_first_name: request.payer.first_name.clone(),
                expires_at,
            })
            .await
        {
            Ok(payment) => payment,
            Err(error) => {
                let message = error.to_string();
                self.reject_with_error(transaction.id, &message).await?;
                return Err(AppError::ChargeFailed {
                    transaction_id: transaction.id,
                    message,
                });
            }
        };

        // Banks reject QR codes with a bad CRC trailer, so the payload is
        // corrected unconditionally before it reaches anyone.
        let qr_code = payment.qr_code().map(|raw| {
            let report = brcode::validate(raw);
            self.stats.record(self.environment, !report.crc_valid);
            if !report.crc_valid {
                tracing::warn!(
                    transaction_id = transaction.id,
                    crc_received = ?report.crc_received,
                    crc_calculated = ?report.crc_calculated,
                    "gateway returned PIX payload with invalid CRC, correcting"
                );
            }
            brcode::add_crc(raw)
        });

        let pix = PixData {
            qr_code,
            qr_code_base64: payment.qr_code_base64().and_then(decoded_qr_image),
            ticket_url: payment.ticket_url().map(str::to_string),
            expires_at: payment.expiration().or(Some(expires_at)),
        };

        let transaction = self
            .store
            .attach_gateway_result(
                transaction.id,
                GatewayArtifacts {
                    gateway_transaction_id: Some(payment.id.to_string()),
                    gateway_payment_id: Some(payment.id.to_string()),
                    gateway_status: Some(payment.status.clone()),
                    qr_code: pix.qr_code.clone(),
                    qr_code_base64: pix.qr_code_base64.clone(),
                    ticket_url: pix.ticket_url.clone(),
                    pix_expires_at: pix.expires_at,
                },
                AuditEntry::new(
                    "mercadopago.create_payment",
                    json!({
                        "payment_id": payment.id,
                        "status": payment.status,
                        "status_detail": payment.status_detail,
                    }),
                ),
            )
            .await?;

        let mapped = CanonicalStatus::from_mercadopago(&payment.status);
        let advance = self
            .store
            .advance_status(
                transaction.id,
                Self::post_charge_status(mapped),
                Some(&payment.status),
                AuditEntry::new("charge.status", json!({ "gateway_status": payment.status })),
            )
            .await?;

        tracing::info!(
            transaction_id = advance.transaction.id,
            bot_id = request.bot_id,
            status = %advance.transaction.status,
            "PIX charge created"
        );

        Ok(PixChargeOutcome {
            transaction: advance.transaction,
            pix,
        })
    }

    pub async fn create_card_charge(
        &self,
        request: CardChargeRequest,
    ) -> Result<CardChargeOutcome, AppError> {
        let plan = self
            .load_active_plan(request.payment_plan_id, request.bot_id)
            .await?;

        let credentials = resolve_credentials(
            self.store.as_ref(),
            request.bot_id,
            Gateway::Stripe,
            self.environment,
            &self.fallback,
        )
        .await?;

        let transaction = self
            .store
            .insert_transaction(
                NewTransaction {
                    bot_id: request.bot_id,
                    contact_id: request.contact_id,
                    payment_plan_id: plan.id,
                    payment_cycle_id: None,
                    amount: plan.price.clone(),
                    currency: "BRL".to_string(),
                    gateway: Gateway::Stripe,
                    payment_method: PaymentMethod::CreditCard,
                },
                AuditEntry::new(
                    "charge.create",
                    json!({ "plan_id": plan.id, "plan_title": plan.title }),
                ),
            )
            .await?;

        let client = StripeClient::with_base_url(credentials, &self.endpoints.stripe);

        let payment_method_id = match &request.source {
            CardSource::PaymentMethod(id) => id.clone(),
            CardSource::Card(card) => match client.create_payment_method(card).await {
                Ok(id) => id,
                Err(error) => {
                    let message = error.to_string();
                    self.reject_with_error(transaction.id, &message).await?;
                    return Err(AppError::ChargeFailed {
                        transaction_id: transaction.id,
                        message,
                    });
                }
            },
        };

        let intent = match client
            .create_payment_intent(&CreateCardPayment {
                amount: plan.price.clone(),
                currency: "BRL".to_string(),
                payment_method_id,
                description: plan.title.clone(),
                external_reference: transaction.id.to_string(),
            })
            .await
        {
            Ok(intent) => intent,
            Err(error) => {
                let message = error.to_string();
                self.reject_with_error(transaction.id, &message).await?;
                return Err(AppError::ChargeFailed {
                    transaction_id: transaction.id,
                    message,
                });
            }
        };

        let transaction = self
            .store
            .attach_gateway_result(
                transaction.id,
                GatewayArtifacts {
                    gateway_transaction_id: Some(intent.id.clone()),
                    gateway_payment_id: Some(intent.id.clone()),
                    gateway_status: Some(intent.status.clone()),
                    ..Default::default()
                },
                AuditEntry::new(
                    "stripe.create_payment_intent",
                    json!({ "intent_id": intent.id, "status": intent.status }),
                ),
            )
            .await?;

        let mapped = CanonicalStatus::from_stripe(&intent.status);
        let advance = self
            .store
            .advance_status(
                transaction.id,
                Self::post_charge_status(mapped),
                Some(&intent.status),
                AuditEntry::new("charge.status", json!({ "gateway_status": intent.status })),
            )
            .await?;

        tracing::info!(
            transaction_id = advance.transaction.id,
            bot_id = request.bot_id,
            status = %advance.transaction.status,
            "card charge created"
        );

        Ok(CardChargeOutcome {
            transaction: advance.transaction,
            client_secret: intent.client_secret,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_base64_images_pass_through() {
        assert_eq!(decoded_qr_image("aGVsbG8=").as_deref(), Some("aGVsbG8="));
        assert_eq!(decoded_qr_image("").as_deref(), Some(""));
    }

    #[test]
    fn undecodable_images_are_dropped() {
        assert_eq!(decoded_qr_image("not base64!!!"), None);
        assert_eq!(decoded_qr_image("aGVsbG8"), None); // bad padding
    }

    #[test]
    fn successful_charges_never_stay_pending() {
        assert_eq!(
            ChargeService::post_charge_status(CanonicalStatus::Pending),
            CanonicalStatus::Processing
        );
        assert_eq!(
            ChargeService::post_charge_status(CanonicalStatus::Approved),
            CanonicalStatus::Approved
        );
    }
}
