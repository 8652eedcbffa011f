use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Result};

use crate::db::models::{
    GatewayArtifacts, GatewayConfig, NewTransaction, PaymentPlan, Transaction,
};
use crate::domain::{AuditEntry, CanonicalStatus, Environment, Gateway};

// --- Transaction queries ---

pub async fn insert_transaction(
    pool: &PgPool,
    new: &NewTransaction,
    audit: &AuditEntry,
) -> Result<Transaction> {
    sqlx::query_as::<_, Transaction>(
        r#"
        INSERT INTO transactions (
            bot_id, contact_id, payment_plan_id, payment_cycle_id,
            amount, currency, gateway, status, payment_method, metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending', $8, jsonb_build_array($9::jsonb))
        RETURNING *
        "#,
    )
    .bind(new.bot_id)
    .bind(new.contact_id)
    .bind(new.payment_plan_id)
    .bind(new.payment_cycle_id)
    .bind(&new.amount)
    .bind(&new.currency)
    .bind(new.gateway.as_str())
    .bind(new.payment_method.as_str())
    .bind(audit.to_value())
    .fetch_one(pool)
    .await
}

pub async fn get_transaction(pool: &PgPool, id: i64) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list_transactions(pool: &PgPool, limit: i64, offset: i64) -> Result<Vec<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        "SELECT * FROM transactions ORDER BY created_at DESC LIMIT $1 OFFSET $2",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn attach_gateway_result(
    pool: &PgPool,
    id: i64,
    artifacts: &GatewayArtifacts,
    audit: &AuditEntry,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET gateway_transaction_id = COALESCE($2, gateway_transaction_id),
            gateway_payment_id = COALESCE($3, gateway_payment_id),
            gateway_status = COALESCE($4, gateway_status),
            qr_code = COALESCE($5, qr_code),
            qr_code_base64 = COALESCE($6, qr_code_base64),
            ticket_url = COALESCE($7, ticket_url),
            pix_expires_at = COALESCE($8, pix_expires_at),
            metadata = metadata || jsonb_build_array($9::jsonb),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&artifacts.gateway_transaction_id)
    .bind(&artifacts.gateway_payment_id)
    .bind(&artifacts.gateway_status)
    .bind(&artifacts.qr_code)
    .bind(&artifacts.qr_code_base64)
    .bind(&artifacts.ticket_url)
    .bind(artifacts.pix_expires_at)
    .bind(audit.to_value())
    .fetch_optional(pool)
    .await
}

/// Conditional status write: succeeds only if the row still carries the
/// status the caller read. `None` means the optimistic check lost.
pub async fn advance_status_cas(
    pool: &PgPool,
    id: i64,
    from: CanonicalStatus,
    to: CanonicalStatus,
    gateway_status: Option<&str>,
    audit: &AuditEntry,
) -> Result<Option<Transaction>> {
    sqlx::query_as::<_, Transaction>(
        r#"
        UPDATE transactions
        SET status = $3,
            gateway_status = COALESCE($4, gateway_status),
            metadata = metadata || jsonb_build_array($5::jsonb),
            updated_at = NOW()
        WHERE id = $1 AND status = $2
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(from.as_str())
    .bind(to.as_str())
    .bind(gateway_status)
    .bind(audit.to_value())
    .fetch_optional(pool)
    .await
}

/// Audit-only append. Deliberately leaves `updated_at` untouched so a
/// duplicate-webhook marker does not masquerade as a state change.
pub async fn append_audit(pool: &PgPool, id: i64, audit: &AuditEntry) -> Result<()> {
    sqlx::query("UPDATE transactions SET metadata = metadata || jsonb_build_array($2::jsonb) WHERE id = $1")
        .bind(id)
        .bind(audit.to_value())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn expire_stale_pending(pool: &PgPool, older_than: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE transactions
        SET status = 'cancelled',
            metadata = metadata || jsonb_build_array(jsonb_build_object(
                'at', to_char(NOW() AT TIME ZONE 'UTC', 'YYYY-MM-DD"T"HH24:MI:SS.US"Z"'),
                'source', 'expiration_sweep',
                'data', jsonb_build_object('cutoff', $1::text)
            )),
            updated_at = NOW()
        WHERE status = 'pending' AND created_at < $1
        "#,
    )
    .bind(older_than)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn get_status_counts(pool: &PgPool) -> Result<HashMap<String, i64>> {
    let rows: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM transactions GROUP BY status")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().collect())
}

// --- Payment plan queries ---

pub async fn get_payment_plan(pool: &PgPool, id: i64) -> Result<Option<PaymentPlan>> {
    sqlx::query_as::<_, PaymentPlan>("SELECT * FROM payment_plans WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

// --- Gateway config queries ---

pub async fn get_active_gateway_config(
    pool: &PgPool,
    bot_id: i64,
    gateway: Gateway,
    environment: Environment,
) -> Result<Option<GatewayConfig>> {
    sqlx::query_as::<_, GatewayConfig>(
        r#"
        SELECT * FROM gateway_configs
        WHERE bot_id = $1 AND gateway = $2 AND environment = $3 AND active
        "#,
    )
    .bind(bot_id)
    .bind(gateway.as_str())
    .bind(environment.as_str())
    .fetch_optional(pool)
    .await
}

/// Single-statement activation: the target becomes active, every sibling of
/// the same (bot, gateway, environment) triple is deactivated.
pub async fn activate_gateway_config(pool: &PgPool, config_id: i64) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE gateway_configs gc
        SET active = (gc.id = $1), updated_at = NOW()
        FROM gateway_configs target
        WHERE target.id = $1
          AND gc.bot_id = target.bot_id
          AND gc.gateway = target.gateway
          AND gc.environment = target.environment
        "#,
    )
    .bind(config_id)
    .execute(pool)
    .await?;
    Ok(())
}
