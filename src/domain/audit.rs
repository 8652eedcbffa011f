//! Append-only audit entries stored in a transaction's metadata column.
//!
//! Metadata is a JSON array of these entries. Code paths only ever append;
//! nothing overwrites the array wholesale, which is what makes gateway
//! response excerpts, webhook echoes and error messages reliable for audit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub source: String,
    pub data: Value,
}

impl AuditEntry {
    pub fn new(source: &str, data: Value) -> Self {
        Self {
            at: Utc::now(),
            source: source.to_string(),
            data,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_with_source_and_payload() {
        let entry = AuditEntry::new("webhook.mercadopago", json!({"payment_id": "123"}));
        let value = entry.to_value();
        assert_eq!(value["source"], "webhook.mercadopago");
        assert_eq!(value["data"]["payment_id"], "123");
        assert!(value["at"].is_string());
    }
}
