use std::env;

use dotenvy::dotenv;

use crate::domain::Environment;

/// Process-wide gateway credentials used when a bot has no active
/// `gateway_configs` row. A missing fallback is not an error here; credential
/// resolution reports "gateway not configured" at charge time instead.
#[derive(Debug, Clone, Default)]
pub struct FallbackCredentials {
    pub mercadopago_access_token: Option<String>,
    pub mercadopago_webhook_secret: Option<String>,
    pub stripe_secret_key: Option<String>,
    pub stripe_public_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub environment: Environment,
    pub fallback: FallbackCredentials,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let environment = match env::var("PAYMENT_ENVIRONMENT") {
            Ok(value) => Environment::parse(&value).ok_or_else(|| {
                anyhow::anyhow!("PAYMENT_ENVIRONMENT must be 'sandbox' or 'production'")
            })?,
            Err(_) => Environment::Sandbox,
        };

        Ok(Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            environment,
            fallback: FallbackCredentials {
                mercadopago_access_token: env::var("MERCADOPAGO_ACCESS_TOKEN").ok(),
                mercadopago_webhook_secret: env::var("MERCADOPAGO_WEBHOOK_SECRET").ok(),
                stripe_secret_key: env::var("STRIPE_SECRET_KEY").ok(),
                stripe_public_key: env::var("STRIPE_PUBLIC_KEY").ok(),
                stripe_webhook_secret: env::var("STRIPE_WEBHOOK_SECRET").ok(),
            },
        })
    }
}
