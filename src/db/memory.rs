//! In-memory [`Store`] used by the integration tests and local development.
//! A single mutex over the whole table set gives the same
//! one-winner-per-advance guarantee the Postgres conditional update does.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::db::models::{
    GatewayArtifacts, GatewayConfig, NewTransaction, PaymentPlan, StatusAdvance, Transaction,
};
use crate::db::store::Store;
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway};
use crate::error::AppError;

#[derive(Default)]
struct Inner {
    next_transaction_id: i64,
    transactions: HashMap<i64, Transaction>,
    plans: HashMap<i64, PaymentPlan>,
    gateway_configs: Vec<GatewayConfig>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_plan(&self, plan: PaymentPlan) {
        self.inner.lock().await.plans.insert(plan.id, plan);
    }

    pub async fn add_gateway_config(&self, config: GatewayConfig) {
        self.inner.lock().await.gateway_configs.push(config);
    }
}

fn push_audit(metadata: &mut Value, audit: &AuditEntry) {
    if let Value::Array(entries) = metadata {
        entries.push(audit.to_value());
    } else {
        *metadata = Value::Array(vec![audit.to_value()]);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn payment_plan(&self, id: i64) -> Result<Option<PaymentPlan>, AppError> {
        Ok(self.inner.lock().await.plans.get(&id).cloned())
    }

    async fn active_gateway_config(
        &self,
        bot_id: i64,
        gateway: Gateway,
        environment: Environment,
    ) -> Result<Option<GatewayConfig>, AppError> {
        Ok(self
            .inner
            .lock()
            .await
            .gateway_configs
            .iter()
            .find(|c| {
                c.active
                    && c.bot_id == bot_id
                    && c.gateway == gateway.as_str()
                    && c.environment == environment.as_str()
            })
            .cloned())
    }

    async fn activate_gateway_config(&self, config_id: i64) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let target = inner
            .gateway_configs
            .iter()
            .find(|c| c.id == config_id)
            .map(|c| (c.bot_id, c.gateway.clone(), c.environment.clone()))
            .ok_or_else(|| AppError::NotFound(format!("gateway config {config_id}")))?;

        for config in inner.gateway_configs.iter_mut() {
            if config.bot_id == target.0
                && config.gateway == target.1
                && config.environment == target.2
            {
                config.active = config.id == config_id;
                config.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn insert_transaction(
        &self,
        new: NewTransaction,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError> {
        let mut inner = self.inner.lock().await;
        inner.next_transaction_id += 1;
        let id = inner.next_transaction_id;
        let now = Utc::now();

        let transaction = Transaction {
            id,
            bot_id: new.bot_id,
            contact_id: new.contact_id,
            payment_plan_id: new.payment_plan_id,
            payment_cycle_id: new.payment_cycle_id,
            amount: new.amount,
            currency: new.currency,
            gateway: new.gateway.as_str().to_string(),
            gateway_transaction_id: None,
            gateway_payment_id: None,
            gateway_status: None,
            status: CanonicalStatus::Pending.as_str().to_string(),
            payment_method: new.payment_method.as_str().to_string(),
            qr_code: None,
            qr_code_base64: None,
            ticket_url: None,
            pix_expires_at: None,
            metadata: Value::Array(vec![audit.to_value()]),
            created_at: now,
            updated_at: now,
        };

        inner.transactions.insert(id, transaction.clone());
        Ok(transaction)
    }

    async fn transaction(&self, id: i64) -> Result<Option<Transaction>, AppError> {
        Ok(self.inner.lock().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        let inner = self.inner.lock().await;
        let mut all: Vec<Transaction> = inner.transactions.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn attach_gateway_result(
        &self,
        id: i64,
        artifacts: GatewayArtifacts,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError> {
        let mut inner = self.inner.lock().await;
        let transaction = inner
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        if artifacts.gateway_transaction_id.is_some() {
            transaction.gateway_transaction_id = artifacts.gateway_transaction_id;
        }
        if artifacts.gateway_payment_id.is_some() {
            transaction.gateway_payment_id = artifacts.gateway_payment_id;
        }
        if artifacts.gateway_status.is_some() {
            transaction.gateway_status = artifacts.gateway_status;
        }
        if artifacts.qr_code.is_some() {
            transaction.qr_code = artifacts.qr_code;
        }
        if artifacts.qr_code_base64.is_some() {
            transaction.qr_code_base64 = artifacts.qr_code_base64;
        }
        if artifacts.ticket_url.is_some() {
            transaction.ticket_url = artifacts.ticket_url;
        }
        if artifacts.pix_expires_at.is_some() {
            transaction.pix_expires_at = artifacts.pix_expires_at;
        }
        push_audit(&mut transaction.metadata, &audit);
        transaction.updated_at = Utc::now();

        Ok(transaction.clone())
    }

    async fn advance_status(
        &self,
        id: i64,
        to: CanonicalStatus,
        gateway_status: Option<&str>,
        audit: AuditEntry,
    ) -> Result<StatusAdvance, AppError> {
        let mut inner = self.inner.lock().await;
        let transaction = inner
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;

        let from = transaction.canonical_status();
        if !from.allows_transition(to) {
            return Ok(StatusAdvance {
                transaction: transaction.clone(),
                changed: false,
            });
        }

        transaction.status = to.as_str().to_string();
        if let Some(raw) = gateway_status {
            transaction.gateway_status = Some(raw.to_string());
        }
        push_audit(&mut transaction.metadata, &audit);
        transaction.updated_at = Utc::now();

        Ok(StatusAdvance {
            transaction: transaction.clone(),
            changed: true,
        })
    }

    async fn append_audit(&self, id: i64, audit: AuditEntry) -> Result<(), AppError> {
        let mut inner = self.inner.lock().await;
        let transaction = inner
            .transactions
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
        push_audit(&mut transaction.metadata, &audit);
        Ok(())
    }

    async fn expire_stale_pending(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        let mut inner = self.inner.lock().await;
        let mut moved = 0;
        for transaction in inner.transactions.values_mut() {
            if transaction.canonical_status() == CanonicalStatus::Pending
                && transaction.created_at < older_than
            {
                transaction.status = CanonicalStatus::Cancelled.as_str().to_string();
                push_audit(
                    &mut transaction.metadata,
                    &AuditEntry::new(
                        "expiration_sweep",
                        serde_json::json!({ "cutoff": older_than.to_rfc3339() }),
                    ),
                );
                transaction.updated_at = Utc::now();
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn status_counts(&self) -> Result<HashMap<String, i64>, AppError> {
        let inner = self.inner.lock().await;
        let mut counts = HashMap::new();
        for transaction in inner.transactions.values() {
            *counts.entry(transaction.status.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }
}
