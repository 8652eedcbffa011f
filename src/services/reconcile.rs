//! Webhook reconciler.
//!
//! Gateways deliver events at least once, out of order, and concurrently. An
//! event is only a hint that something changed: the payment object is always
//! re-fetched from the gateway before any state is touched, and the status
//! write is a compare-and-set on the state-machine partial order. Events that
//! resolve to no local transaction are logged and dropped, not errors.

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{json, Value};

use crate::config::FallbackCredentials;
use crate::db::models::Transaction;
use crate::db::Store;
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway};
use crate::error::AppError;
use crate::gateways::credentials::resolve_credentials;
use crate::gateways::mercadopago::{self, MercadoPagoClient};
use crate::gateways::stripe::{self, StripeClient};
use crate::services::GatewayEndpoints;

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub transaction: Transaction,
    pub status_changed: bool,
    /// True only on the write that moved the row from non-approved to
    /// approved. One-time side effects (group access, receipts) key off this
    /// flag and nothing else.
    pub newly_approved: bool,
}

pub struct WebhookReconciler {
    store: Arc<dyn Store>,
    environment: Environment,
    fallback: FallbackCredentials,
    endpoints: GatewayEndpoints,
}

impl WebhookReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        environment: Environment,
        fallback: FallbackCredentials,
        endpoints: GatewayEndpoints,
    ) -> Self {
        Self {
            store,
            environment,
            fallback,
            endpoints,
        }
    }

    pub async fn reconcile(
        &self,
        gateway: Gateway,
        bot_id: i64,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<ReconcileOutcome>, AppError> {
        match gateway {
            Gateway::MercadoPago => self.reconcile_mercadopago(bot_id, headers, body).await,
            Gateway::Stripe => self.reconcile_stripe(bot_id, headers, body).await,
        }
    }

    async fn reconcile_mercadopago(
        &self,
        bot_id: i64,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<ReconcileOutcome>, AppError> {
        let event: mercadopago::WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedWebhook(e.to_string()))?;

        if !event.is_payment() {
            tracing::debug!(bot_id, event_type = ?event.event_type, "ignoring non-payment webhook");
            return Ok(None);
        }
        let payment_id = event
            .payment_id()
            .ok_or_else(|| AppError::MalformedWebhook("event carries no data.id".to_string()))?;

        let credentials = resolve_credentials(
            self.store.as_ref(),
            bot_id,
            Gateway::MercadoPago,
            self.environment,
            &self.fallback,
        )
        .await?;

        // Mercado Pago signs notifications when a webhook secret is set up;
        // verify whenever the tenant has one.
        if let Some(secret) = credentials.webhook_secret.as_deref() {
            let x_signature = headers
                .get("x-signature")
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    AppError::InvalidSignature("missing x-signature header".to_string())
                })?;
            let x_request_id = headers
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            mercadopago::verify_webhook_signature(secret, x_signature, x_request_id, &payment_id)?;
        }

        let client = MercadoPagoClient::with_base_url(credentials, &self.endpoints.mercadopago);
        let payment = client.get_payment(&payment_id).await?;

        let Some(transaction_id) = payment
            .external_reference
            .as_deref()
            .and_then(|r| r.parse::<i64>().ok())
        else {
            tracing::info!(bot_id, payment_id = %payment_id, "payment carries no usable external reference, dropping event");
            return Ok(None);
        };

        let Some(transaction) = self.store.transaction(transaction_id).await? else {
            tracing::info!(bot_id, transaction_id, "webhook references unknown transaction, dropping event");
            return Ok(None);
        };
        if transaction.bot_id != bot_id {
            tracing::warn!(
                bot_id,
                transaction_id,
                owner_bot_id = transaction.bot_id,
                "webhook route does not own this transaction, dropping event"
            );
            return Ok(None);
        }

        let mapped = CanonicalStatus::from_mercadopago(&payment.status);
        self.apply(
            transaction,
            mapped,
            &payment.status,
            "webhook.mercadopago",
            json!({
                "payment_id": payment.id,
                "status": payment.status,
                "status_detail": payment.status_detail,
            }),
        )
        .await
        .map(Some)
    }

    async fn reconcile_stripe(
        &self,
        bot_id: i64,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Option<ReconcileOutcome>, AppError> {
        let credentials = resolve_credentials(
            self.store.as_ref(),
            bot_id,
            Gateway::Stripe,
            self.environment,
            &self.fallback,
        )
        .await?;

        // Stripe always signs; an unverifiable event never touches state.
        let secret = credentials.webhook_secret.clone().ok_or_else(|| {
            AppError::InvalidSignature("no stripe webhook secret configured for bot".to_string())
        })?;
        let header = headers
            .get("stripe-signature")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::InvalidSignature("missing Stripe-Signature header".to_string())
            })?;
        stripe::verify_webhook_signature(&secret, body, header)?;

        let event: stripe::WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| AppError::MalformedWebhook(e.to_string()))?;
        if !event.is_payment_intent() {
            tracing::debug!(bot_id, event_type = %event.event_type, "ignoring non-intent webhook");
            return Ok(None);
        }

        let client = StripeClient::with_base_url(credentials, &self.endpoints.stripe);
        let intent = client.get_payment_intent(&event.data.object.id).await?;

        let Some(transaction_id) = intent
            .external_reference()
            .and_then(|r| r.parse::<i64>().ok())
        else {
            tracing::info!(bot_id, intent_id = %intent.id, "intent carries no usable external reference, dropping event");
            return Ok(None);
        };

        let Some(transaction) = self.store.transaction(transaction_id).await? else {
            tracing::info!(bot_id, transaction_id, "webhook references unknown transaction, dropping event");
            return Ok(None);
        };
        if transaction.bot_id != bot_id {
            tracing::warn!(
                bot_id,
                transaction_id,
                owner_bot_id = transaction.bot_id,
                "webhook route does not own this transaction, dropping event"
            );
            return Ok(None);
        }

        let mapped = CanonicalStatus::from_stripe(&intent.status);
        self.apply(
            transaction,
            mapped,
            &intent.status,
            "webhook.stripe",
            json!({ "intent_id": intent.id, "status": intent.status }),
        )
        .await
        .map(Some)
    }

    /// Applies the mapped status under the store's compare-and-set. Exactly
    /// one of any number of concurrent identical deliveries observes
    /// `status_changed == true`; every delivery leaves an audit echo.
    async fn apply(
        &self,
        transaction: Transaction,
        mapped: CanonicalStatus,
        raw_status: &str,
        source: &str,
        echo: Value,
    ) -> Result<ReconcileOutcome, AppError> {
        let current = transaction.canonical_status();

        if !current.allows_transition(mapped) {
            // Duplicate or out-of-order delivery: status stays put, the echo
            // is still recorded.
            self.store
                .append_audit(
                    transaction.id,
                    AuditEntry::new(
                        source,
                        json!({ "stale_or_duplicate": true, "gateway_status": raw_status, "echo": echo }),
                    ),
                )
                .await?;
            tracing::debug!(
                transaction_id = transaction.id,
                current = %current,
                incoming = %mapped,
                "webhook did not advance status"
            );
            return Ok(ReconcileOutcome {
                transaction,
                status_changed: false,
                newly_approved: false,
            });
        }

        let advance = self
            .store
            .advance_status(
                transaction.id,
                mapped,
                Some(raw_status),
                AuditEntry::new(source, echo),
            )
            .await?;

        if !advance.changed {
            // A concurrent delivery won the compare-and-set between our read
            // and our write.
            self.store
                .append_audit(
                    transaction.id,
                    AuditEntry::new(
                        source,
                        json!({ "duplicate": true, "gateway_status": raw_status }),
                    ),
                )
                .await?;
        }

        let newly_approved = advance.changed && mapped == CanonicalStatus::Approved;
        if newly_approved {
            tracing::info!(
                transaction_id = advance.transaction.id,
                "transaction approved, one-time fulfillment unlocked"
            );
        }

        Ok(ReconcileOutcome {
            transaction: advance.transaction,
            status_changed: advance.changed,
            newly_approved,
        })
    }
}
