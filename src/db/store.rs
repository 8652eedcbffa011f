//! Persistence seam for the payment core.
//!
//! The orchestrator and the reconciler talk to this trait, not to a concrete
//! engine. [`PgStore`](super::pg::PgStore) is the production implementation;
//! [`MemoryStore`](super::memory::MemoryStore) backs tests and local
//! development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::models::{
    GatewayArtifacts, GatewayConfig, NewTransaction, PaymentPlan, StatusAdvance, Transaction,
};
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway};
use crate::error::AppError;

#[async_trait]
pub trait Store: Send + Sync {
    async fn payment_plan(&self, id: i64) -> Result<Option<PaymentPlan>, AppError>;

    async fn active_gateway_config(
        &self,
        bot_id: i64,
        gateway: Gateway,
        environment: Environment,
    ) -> Result<Option<GatewayConfig>, AppError>;

    /// Activates one config and deactivates its (bot, gateway, environment)
    /// siblings in a single atomic statement.
    async fn activate_gateway_config(&self, config_id: i64) -> Result<(), AppError>;

    async fn insert_transaction(
        &self,
        new: NewTransaction,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError>;

    async fn transaction(&self, id: i64) -> Result<Option<Transaction>, AppError>;

    async fn list_transactions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, AppError>;

    /// Stores the normalized response of the synchronous gateway call and
    /// appends its audit excerpt. Does not touch the status column.
    async fn attach_gateway_result(
        &self,
        id: i64,
        artifacts: GatewayArtifacts,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError>;

    /// Compare-and-set status write on the state-machine partial order. Only
    /// forward progress is written; concurrent identical advances resolve to
    /// exactly one `changed == true`.
    async fn advance_status(
        &self,
        id: i64,
        to: CanonicalStatus,
        gateway_status: Option<&str>,
        audit: AuditEntry,
    ) -> Result<StatusAdvance, AppError>;

    /// Appends an audit entry without touching status or `updated_at`.
    async fn append_audit(&self, id: i64, audit: AuditEntry) -> Result<(), AppError>;

    /// Terminal transition for the external expiration sweep: cancels
    /// `pending` transactions created before the cutoff. Returns the number
    /// of rows moved.
    async fn expire_stale_pending(&self, older_than: DateTime<Utc>) -> Result<u64, AppError>;

    /// Reporting projection: transaction count per canonical status.
    async fn status_counts(&self) -> Result<HashMap<String, i64>, AppError>;
}
