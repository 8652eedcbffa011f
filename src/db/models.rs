use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::domain::{AuditEntry, CanonicalStatus, Gateway, PaymentMethod};

/// A payment transaction. Created `pending` before any gateway call, mutated
/// only by the charge orchestrator and the webhook reconciler, never deleted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub bot_id: i64,
    pub contact_id: Option<i64>,
    pub payment_plan_id: i64,
    pub payment_cycle_id: Option<i64>,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: String,
    pub gateway_transaction_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    /// Raw status string from the gateway, preserved verbatim for audit.
    pub gateway_status: Option<String>,
    pub status: String,
    pub payment_method: String,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
    pub pix_expires_at: Option<DateTime<Utc>>,
    /// JSON array of [`AuditEntry`] values, append-only.
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn canonical_status(&self) -> CanonicalStatus {
        CanonicalStatus::parse(&self.status).unwrap_or(CanonicalStatus::Pending)
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        serde_json::from_value(self.metadata.clone()).unwrap_or_default()
    }
}

/// Fields the orchestrator knows before the gateway has been called.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub bot_id: i64,
    pub contact_id: Option<i64>,
    pub payment_plan_id: i64,
    pub payment_cycle_id: Option<i64>,
    pub amount: BigDecimal,
    pub currency: String,
    pub gateway: Gateway,
    pub payment_method: PaymentMethod,
}

/// Normalized artifacts of a successful synchronous gateway call.
#[derive(Debug, Clone, Default)]
pub struct GatewayArtifacts {
    pub gateway_transaction_id: Option<String>,
    pub gateway_payment_id: Option<String>,
    pub gateway_status: Option<String>,
    pub qr_code: Option<String>,
    pub qr_code_base64: Option<String>,
    pub ticket_url: Option<String>,
    pub pix_expires_at: Option<DateTime<Utc>>,
}

/// Result of a compare-and-set status write. `changed == false` means the
/// transition was a no-op (already applied, or not forward progress), which
/// is the gate that keeps one-time side effects one-time.
#[derive(Debug, Clone)]
pub struct StatusAdvance {
    pub transaction: Transaction,
    pub changed: bool,
}

/// Per-tenant gateway credentials. At most one row is active per
/// (bot, gateway, environment) triple.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub id: i64,
    pub bot_id: i64,
    pub gateway: String,
    pub environment: String,
    pub access_token: Option<String>,
    pub public_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub webhook_url: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only collaborator row; plan CRUD lives outside this core.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentPlan {
    pub id: i64,
    pub bot_id: i64,
    pub title: String,
    pub price: BigDecimal,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
