//! Per-tenant gateway credential resolution.
//!
//! Order: the active `gateway_configs` row for the exact
//! (bot, gateway, environment) triple, then the process-wide env fallback.
//! No other tenant's credentials are ever considered; with neither source
//! usable the charge fails before any external call.

use crate::config::FallbackCredentials;
use crate::db::Store;
use crate::domain::{Environment, Gateway};
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    TenantConfig,
    EnvFallback,
}

#[derive(Debug, Clone)]
pub struct Credentials {
    /// Mercado Pago access token or Stripe secret key.
    pub access_token: String,
    pub public_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub source: CredentialSource,
}

pub async fn resolve_credentials(
    store: &dyn Store,
    bot_id: i64,
    gateway: Gateway,
    environment: Environment,
    fallback: &FallbackCredentials,
) -> Result<Credentials, AppError> {
    if let Some(config) = store
        .active_gateway_config(bot_id, gateway, environment)
        .await?
    {
        if let Some(token) = config.access_token.filter(|t| !t.is_empty()) {
            return Ok(Credentials {
                access_token: token,
                public_key: config.public_key,
                webhook_secret: config.webhook_secret,
                source: CredentialSource::TenantConfig,
            });
        }
        tracing::warn!(
            bot_id,
            gateway = %gateway,
            "active gateway config has empty credentials, trying env fallback"
        );
    }

    let credentials = match gateway {
        Gateway::MercadoPago => fallback
            .mercadopago_access_token
            .clone()
            .map(|token| Credentials {
                access_token: token,
                public_key: None,
                webhook_secret: fallback.mercadopago_webhook_secret.clone(),
                source: CredentialSource::EnvFallback,
            }),
        Gateway::Stripe => fallback.stripe_secret_key.clone().map(|token| Credentials {
            access_token: token,
            public_key: fallback.stripe_public_key.clone(),
            webhook_secret: fallback.stripe_webhook_secret.clone(),
            source: CredentialSource::EnvFallback,
        }),
    };

    match credentials {
        Some(credentials) => {
            tracing::debug!(bot_id, gateway = %gateway, "using env fallback credentials");
            Ok(credentials)
        }
        None => Err(AppError::GatewayNotConfigured { gateway, bot_id }),
    }
}
