//! Response envelope returned for every action document

use crate::pagination::Pagination;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Record created by a `create` action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedRecord {
    pub entity_name: String,
    pub entity_id: i64,
}

/// Record changed by an `update` action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedRecord {
    /// Number of properties whose value changed
    pub count: usize,
    /// Properties submitted in `updateRecord`
    pub fields: Vec<String>,
    pub entity_name: String,
    pub entity_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteKind {
    Hard,
    Soft,
}

/// Record removed by a `delete` action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedRecord {
    #[serde(rename = "type")]
    pub kind: DeleteKind,
    pub entity_name: String,
    pub entity_id: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub data: Map<String, Value>,
    pub created: BTreeMap<String, CreatedRecord>,
    pub updates: BTreeMap<String, UpdatedRecord>,
    pub removed: BTreeMap<String, RemovedRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    pub code: u16,
    pub message: String,
    /// Milliseconds spent dispatching
    pub response_time: u64,
}

impl Default for ResponseEnvelope {
    fn default() -> Self {
        Self {
            data: Map::new(),
            created: BTreeMap::new(),
            updates: BTreeMap::new(),
            removed: BTreeMap::new(),
            pagination: None,
            code: 200,
            message: "success".to_string(),
            response_time: 0,
        }
    }
}

impl ResponseEnvelope {
    /// Empty envelope describing a failed request
    pub fn failure(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_wire_format() {
        let mut envelope = ResponseEnvelope::default();
        envelope.created.insert(
            "ada".to_string(),
            CreatedRecord {
                entity_name: "Customer".to_string(),
                entity_id: 1,
            },
        );
        envelope.removed.insert(
            "old".to_string(),
            RemovedRecord {
                kind: DeleteKind::Soft,
                entity_name: "Customer".to_string(),
                entity_id: 2,
            },
        );

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["created"]["ada"], json!({"entityName": "Customer", "entityId": 1}));
        assert_eq!(value["removed"]["old"]["type"], "soft");
        assert_eq!(value["code"], 200);
        assert_eq!(value["message"], "success");
        assert!(value.get("responseTime").is_some());
        assert!(value.get("pagination").is_none());
    }

    #[test]
    fn test_failure_envelope() {
        let value = serde_json::to_value(ResponseEnvelope::failure(404, "Not found: x")).unwrap();
        assert_eq!(value["code"], 404);
        assert_eq!(value["message"], "Not found: x");
        assert_eq!(value["data"], json!({}));
    }
}
