//! Gateway-agnostic domain vocabulary shared by the store, the adapters and
//! the reconciliation path.

pub mod audit;
pub mod status;

pub use audit::AuditEntry;
pub use status::{CanonicalStatus, Environment, Gateway, PaymentMethod};
