pub mod brcode;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod gateways;
pub mod handlers;
pub mod services;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::brcode::CorrectionStats;
use crate::config::FallbackCredentials;
use crate::db::Store;
use crate::domain::Environment;
use crate::services::{ChargeService, GatewayEndpoints, WebhookReconciler};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub charges: Arc<ChargeService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub stats: Arc<CorrectionStats>,
    /// Present when backed by Postgres; health reporting uses it.
    pub db: Option<sqlx::PgPool>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        environment: Environment,
        fallback: FallbackCredentials,
        endpoints: GatewayEndpoints,
        db: Option<sqlx::PgPool>,
    ) -> Self {
        let stats = Arc::new(CorrectionStats::new());
        let charges = Arc::new(ChargeService::new(
            store.clone(),
            stats.clone(),
            environment,
            fallback.clone(),
            endpoints.clone(),
        ));
        let reconciler = Arc::new(WebhookReconciler::new(
            store.clone(),
            environment,
            fallback,
            endpoints,
        ));
        Self {
            store,
            charges,
            reconciler,
            stats,
            db,
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/charges/pix", post(handlers::charges::create_pix_charge))
        .route("/charges/card", post(handlers::charges::create_card_charge))
        .route(
            "/webhooks/mercadopago/:bot_id",
            post(handlers::webhooks::mercadopago),
        )
        .route("/webhooks/stripe/:bot_id", post(handlers::webhooks::stripe))
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions),
        )
        .route(
            "/transactions/status-counts",
            get(handlers::transactions::status_counts),
        )
        .route(
            "/transactions/expire-stale",
            post(handlers::transactions::expire_stale),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route("/brcode/validate", post(handlers::brcode::validate))
        .route("/brcode/stats", get(handlers::brcode::stats))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
