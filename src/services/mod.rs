pub mod charges;
pub mod reconcile;

pub use charges::ChargeService;
pub use reconcile::{ReconcileOutcome, WebhookReconciler};

use crate::gateways::{mercadopago, stripe};

/// Base URLs the adapters talk to. Production defaults; tests point these at
/// a local mock server.
#[derive(Debug, Clone)]
pub struct GatewayEndpoints {
    pub mercadopago: String,
    pub stripe: String,
}

impl Default for GatewayEndpoints {
    fn default() -> Self {
        Self {
            mercadopago: mercadopago::DEFAULT_BASE_URL.to_string(),
            stripe: stripe::DEFAULT_BASE_URL.to_string(),
        }
    }
}
