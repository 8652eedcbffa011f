//! Canonical transaction status and the per-gateway mapping tables.
//!
//! Each gateway speaks its own status vocabulary; everything past the adapter
//! boundary uses [`CanonicalStatus`]. The mapping tables are total functions:
//! an unrecognized gateway string maps to `Pending` (never silently approved)
//! and is logged so a stuck transaction can be told apart from a legitimately
//! pending one.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Cancelled,
    Refunded,
}

impl CanonicalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalStatus::Pending => "pending",
            CanonicalStatus::Processing => "processing",
            CanonicalStatus::Approved => "approved",
            CanonicalStatus::Rejected => "rejected",
            CanonicalStatus::Cancelled => "cancelled",
            CanonicalStatus::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(CanonicalStatus::Pending),
            "processing" => Some(CanonicalStatus::Processing),
            "approved" => Some(CanonicalStatus::Approved),
            "rejected" => Some(CanonicalStatus::Rejected),
            "cancelled" => Some(CanonicalStatus::Cancelled),
            "refunded" => Some(CanonicalStatus::Refunded),
            _ => None,
        }
    }

    /// Terminal states admit no further status change, only audit appends.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CanonicalStatus::Rejected | CanonicalStatus::Cancelled | CanonicalStatus::Refunded
        )
    }

    /// Whether moving from `self` to `to` is forward progress on the state
    /// machine. Equal or less-advanced targets are not: a delayed `pending`
    /// webhook after an `approved` one must be a no-op on the status field.
    pub fn allows_transition(self, to: CanonicalStatus) -> bool {
        use CanonicalStatus::*;
        match (self, to) {
            (Pending, Processing | Approved | Rejected | Cancelled) => true,
            (Processing, Approved | Rejected | Cancelled) => true,
            (Approved, Refunded) => true,
            _ => false,
        }
    }

    /// Mercado Pago native statuses. Unknown inputs fail safe to `Pending`.
    pub fn from_mercadopago(raw: &str) -> Self {
        match raw {
            "pending" => CanonicalStatus::Pending,
            "in_process" | "in_mediation" => CanonicalStatus::Processing,
            "approved" | "authorized" => CanonicalStatus::Approved,
            "rejected" => CanonicalStatus::Rejected,
            "cancelled" => CanonicalStatus::Cancelled,
            "refunded" | "charged_back" => CanonicalStatus::Refunded,
            other => {
                tracing::warn!(gateway = "mercadopago", raw_status = other, "unmapped gateway status, defaulting to pending");
                CanonicalStatus::Pending
            }
        }
    }

    /// Stripe PaymentIntent statuses. Unknown inputs fail safe to `Pending`.
    pub fn from_stripe(raw: &str) -> Self {
        match raw {
            "requires_payment_method" | "requires_confirmation" => CanonicalStatus::Pending,
            "requires_action" | "processing" => CanonicalStatus::Processing,
            "requires_capture" | "succeeded" => CanonicalStatus::Approved,
            "canceled" => CanonicalStatus::Cancelled,
            other => {
                tracing::warn!(gateway = "stripe", raw_status = other, "unmapped gateway status, defaulting to pending");
                CanonicalStatus::Pending
            }
        }
    }

    pub fn from_gateway(gateway: Gateway, raw: &str) -> Self {
        match gateway {
            Gateway::MercadoPago => Self::from_mercadopago(raw),
            Gateway::Stripe => Self::from_stripe(raw),
        }
    }
}

impl fmt::Display for CanonicalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gateway {
    MercadoPago,
    Stripe,
}

impl Gateway {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gateway::MercadoPago => "mercadopago",
            Gateway::Stripe => "stripe",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mercadopago" => Some(Gateway::MercadoPago),
            "stripe" => Some(Gateway::Stripe),
            _ => None,
        }
    }
}

impl fmt::Display for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Pix,
    CreditCard,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "pix",
            PaymentMethod::CreditCard => "credit_card",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Sandbox,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Production => "production",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sandbox" => Some(Environment::Sandbox),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [CanonicalStatus; 6] = [
        CanonicalStatus::Pending,
        CanonicalStatus::Processing,
        CanonicalStatus::Approved,
        CanonicalStatus::Rejected,
        CanonicalStatus::Cancelled,
        CanonicalStatus::Refunded,
    ];

    #[test]
    fn round_trips_through_strings() {
        for status in ALL {
            assert_eq!(CanonicalStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CanonicalStatus::parse("paid"), None);
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                if from == CanonicalStatus::Refunded || from == CanonicalStatus::Rejected || from == CanonicalStatus::Cancelled {
                    assert!(!from.allows_transition(to), "{from} -> {to} should be blocked");
                }
            }
        }
    }

    #[test]
    fn refunded_only_reachable_from_approved() {
        for from in ALL {
            let allowed = from.allows_transition(CanonicalStatus::Refunded);
            assert_eq!(allowed, from == CanonicalStatus::Approved);
        }
    }

    #[test]
    fn transitions_are_never_self_loops() {
        for status in ALL {
            assert!(!status.allows_transition(status));
        }
    }

    #[test]
    fn regressions_are_blocked() {
        assert!(!CanonicalStatus::Approved.allows_transition(CanonicalStatus::Pending));
        assert!(!CanonicalStatus::Approved.allows_transition(CanonicalStatus::Processing));
        assert!(!CanonicalStatus::Processing.allows_transition(CanonicalStatus::Pending));
    }

    #[test]
    fn mercadopago_statuses_map_onto_canonical() {
        assert_eq!(CanonicalStatus::from_mercadopago("approved"), CanonicalStatus::Approved);
        assert_eq!(CanonicalStatus::from_mercadopago("authorized"), CanonicalStatus::Approved);
        assert_eq!(CanonicalStatus::from_mercadopago("in_process"), CanonicalStatus::Processing);
        assert_eq!(CanonicalStatus::from_mercadopago("in_mediation"), CanonicalStatus::Processing);
        assert_eq!(CanonicalStatus::from_mercadopago("rejected"), CanonicalStatus::Rejected);
        assert_eq!(CanonicalStatus::from_mercadopago("cancelled"), CanonicalStatus::Cancelled);
        assert_eq!(CanonicalStatus::from_mercadopago("refunded"), CanonicalStatus::Refunded);
        assert_eq!(CanonicalStatus::from_mercadopago("charged_back"), CanonicalStatus::Refunded);
    }

    #[test]
    fn stripe_statuses_map_onto_canonical() {
        assert_eq!(CanonicalStatus::from_stripe("requires_payment_method"), CanonicalStatus::Pending);
        assert_eq!(CanonicalStatus::from_stripe("requires_confirmation"), CanonicalStatus::Pending);
        assert_eq!(CanonicalStatus::from_stripe("requires_action"), CanonicalStatus::Processing);
        assert_eq!(CanonicalStatus::from_stripe("processing"), CanonicalStatus::Processing);
        assert_eq!(CanonicalStatus::from_stripe("requires_capture"), CanonicalStatus::Approved);
        assert_eq!(CanonicalStatus::from_stripe("succeeded"), CanonicalStatus::Approved);
        assert_eq!(CanonicalStatus::from_stripe("canceled"), CanonicalStatus::Cancelled);
    }

    #[test]
    fn unknown_gateway_statuses_fail_safe_to_pending() {
        assert_eq!(CanonicalStatus::from_mercadopago("some_new_status"), CanonicalStatus::Pending);
        assert_eq!(CanonicalStatus::from_stripe("some_new_status"), CanonicalStatus::Pending);
        assert_eq!(CanonicalStatus::from_mercadopago(""), CanonicalStatus::Pending);
    }
}
