use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db::models::{
    GatewayArtifacts, GatewayConfig, NewTransaction, PaymentPlan, StatusAdvance, Transaction,
};
use crate::db::queries;
use crate::db::store::Store;
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway};
use crate::error::AppError;

// Optimistic-concurrency retries before conceding the advance to the writer
// that won the race.
const CAS_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn payment_plan(&self, id: i64) -> Result<Option<PaymentPlan>, AppError> {
        Ok(queries::get_payment_plan(&self.pool, id).await?)
    }

    async fn active_gateway_config(
        &self,
        bot_id: i64,
        gateway: Gateway,
        environment: Environment,
    ) -> Result<Option<GatewayConfig>, AppError> {
        Ok(queries::get_active_gateway_config(&self.pool, bot_id, gateway, environment).await?)
    }

    async fn activate_gateway_config(&self, config_id: i64) -> Result<(), AppError> {
        Ok(queries::activate_gateway_config(&self.pool, config_id).await?)
    }

    async fn insert_transaction(
        &self,
        new: NewTransaction,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError> {
        Ok(queries::insert_transaction(&self.pool, &new, &audit).await?)
    }

    async fn transaction(&self, id: i64) -> Result<Option<Transaction>, AppError> {
        Ok(queries::get_transaction(&self.pool, id).await?)
    }

    async fn list_transactions(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Transaction>, AppError> {
        Ok(queries::list_transactions(&self.pool, limit, offset).await?)
    }

    async fn attach_gateway_result(
        &self,
        id: i64,
        artifacts: GatewayArtifacts,
        audit: AuditEntry,
    ) -> Result<Transaction, AppError> {
        queries::attach_gateway_result(&self.pool, id, &artifacts, &audit)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))
    }

    async fn advance_status(
        &self,
        id: i64,
        to: CanonicalStatus,
        gateway_status: Option<&str>,
        audit: AuditEntry,
    ) -> Result<StatusAdvance, AppError> {
        for _ in 0..CAS_ATTEMPTS {
            let current = queries::get_transaction(&self.pool, id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
            let from = current.canonical_status();

            if !from.allows_transition(to) {
                return Ok(StatusAdvance {
                    transaction: current,
                    changed: false,
                });
            }

            match queries::advance_status_cas(&self.pool, id, from, to, gateway_status, &audit)
                .await?
            {
                Some(transaction) => {
                    return Ok(StatusAdvance {
                        transaction,
                        changed: true,
                    })
                }
                // Lost the conditional write; re-read and re-evaluate.
                None => continue,
            }
        }

        let current = queries::get_transaction(&self.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("transaction {id}")))?;
        Ok(StatusAdvance {
            transaction: current,
            changed: false,
        })
    }

    async fn append_audit(&self, id: i64, audit: AuditEntry) -> Result<(), AppError> {
        Ok(queries::append_audit(&self.pool, id, &audit).await?)
    }

    async fn expire_stale_pending(&self, older_than: DateTime<Utc>) -> Result<u64, AppError> {
        Ok(queries::expire_stale_pending(&self.pool, older_than).await?)
    }

    async fn status_counts(&self) -> Result<HashMap<String, i64>, AppError> {
        Ok(queries::get_status_counts(&self.pool).await?)
    }
}
