//! Action document parsing
//!
//! ```json
//! { "actions": { "<kind>": { "<EntityTypeName>": { "<recordKey>": { ... } } } } }
//! ```
//!
//! Kinds, entity blocks and record entries keep document order.
//! `loadOrder` additionally accepts a plain list of record keys.

use groundwork_common::{Error, Result};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of an action block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Get,
    Create,
    Update,
    Delete,
    Connect,
    /// `response` or `output`
    Response,
    LoadOrder,
}

impl ActionKind {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "get" => Ok(ActionKind::Get),
            "create" => Ok(ActionKind::Create),
            "update" => Ok(ActionKind::Update),
            "delete" => Ok(ActionKind::Delete),
            "connect" => Ok(ActionKind::Connect),
            "response" | "output" => Ok(ActionKind::Response),
            "loadOrder" => Ok(ActionKind::LoadOrder),
            other => Err(Error::UnsupportedOperation(format!(
                "Unknown action kind: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Get => "get",
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
            ActionKind::Connect => "connect",
            ActionKind::Response => "response",
            ActionKind::LoadOrder => "loadOrder",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `recordKey -> fieldMap` pair
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub key: String,
    pub fields: Map<String, Value>,
}

/// Records of one entity type inside an action
#[derive(Debug, Clone, PartialEq)]
pub struct EntityBlock {
    /// `None` for the list form of `loadOrder`
    pub entity: Option<String>,
    pub records: Vec<RecordEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub kind: ActionKind,
    pub blocks: Vec<EntityBlock>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ActionDocument {
    pub actions: Vec<Action>,
}

impl ActionDocument {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let actions = value
            .get("actions")
            .ok_or_else(|| Error::InvalidInput("Document has no \"actions\" object".to_string()))?;
        let actions = expect_object(actions, "actions")?;

        let mut document = ActionDocument::default();
        for (name, body) in actions {
            let kind = ActionKind::parse(name)?;
            let blocks = match (kind, body) {
                (ActionKind::LoadOrder, Value::Array(keys)) => load_order_list(keys)?,
                _ => entity_blocks(kind, body)?,
            };
            document.actions.push(Action { kind, blocks });
        }
        Ok(document)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

fn expect_object<'a>(value: &'a Value, context: &str) -> Result<&'a Map<String, Value>> {
    value.as_object().ok_or_else(|| {
        Error::InvalidInput(format!("{} must be an object, got {}", context, value))
    })
}

fn entity_blocks(kind: ActionKind, body: &Value) -> Result<Vec<EntityBlock>> {
    let mut blocks = Vec::new();
    for (entity, records) in expect_object(body, kind.as_str())? {
        let context = format!("{}.{}", kind, entity);
        let mut entries = Vec::new();
        for (key, fields) in expect_object(records, &context)? {
            let fields = match fields {
                Value::Object(map) => map.clone(),
                // `{"recordKey": null}` is a bare reference (loadOrder, findAll)
                Value::Null => Map::new(),
                other => {
                    return Err(Error::InvalidInput(format!(
                        "{}.{} must be an object, got {}",
                        context, key, other
                    )))
                }
            };
            entries.push(RecordEntry {
                key: key.clone(),
                fields,
            });
        }
        blocks.push(EntityBlock {
            entity: Some(entity.clone()),
            records: entries,
        });
    }
    Ok(blocks)
}

fn load_order_list(keys: &[Value]) -> Result<Vec<EntityBlock>> {
    let records = keys
        .iter()
        .map(|key| match key {
            Value::String(key) => Ok(RecordEntry {
                key: key.clone(),
                fields: Map::new(),
            }),
            other => Err(Error::InvalidInput(format!(
                "loadOrder entries must be record keys, got {}",
                other
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(vec![EntityBlock {
        entity: None,
        records,
    }])
}
