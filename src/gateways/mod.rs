//! Gateway adapters and per-tenant credential resolution.
//!
//! Clients are built per request from resolved credentials; there is no
//! process-wide registry of gateway client instances.

pub mod credentials;
pub mod http;
pub mod mercadopago;
pub mod stripe;

pub use credentials::{resolve_credentials, CredentialSource, Credentials};
pub use mercadopago::MercadoPagoClient;
pub use stripe::StripeClient;
