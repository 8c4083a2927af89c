//! Plain JSON serialization of records for `response` entries
//!
//! Associations are written as target ids, so cyclic graphs never recurse.

use groundwork_common::{Entity, EntityDefinition, Error, Result};
use serde_json::{Map, Value};

/// `includes` / `excludes` attribute filter
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputFilter {
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl OutputFilter {
    pub fn new(includes: Vec<String>, excludes: Vec<String>) -> Self {
        Self { includes, excludes }
    }

    /// Read `includes` and `excludes` from a response entry
    pub fn from_entry(entry: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            includes: name_list(entry.get("includes"), "includes")?,
            excludes: name_list(entry.get("excludes"), "excludes")?,
        })
    }

    pub fn allows(&self, attribute: &str) -> bool {
        (self.includes.is_empty() || self.includes.iter().any(|i| i == attribute))
            && !self.excludes.iter().any(|e| e == attribute)
    }
}

fn name_list(value: Option<&Value>, option: &str) -> Result<Vec<String>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    Error::InvalidInput(format!("{} entries must be strings, got {}", option, item))
                })
            })
            .collect(),
        Some(other) => Err(Error::InvalidInput(format!(
            "{} must be a list of attribute names, got {}",
            option, other
        ))),
    }
}

/// Serialize one record: `id`, fields, then associations
pub fn entity_to_json(entity: &Entity, definition: &EntityDefinition, filter: &OutputFilter) -> Value {
    let mut object = Map::new();

    if filter.allows("id") {
        object.insert(
            "id".to_string(),
            entity.id().map(Value::from).unwrap_or(Value::Null),
        );
    }
    for field in definition.fields.iter().filter(|f| filter.allows(&f.name)) {
        object.insert(field.name.clone(), entity.get(&field.name).to_json());
    }
    for association in definition.associations.iter().filter(|a| filter.allows(&a.name)) {
        let value = if association.is_collection() {
            Value::from(entity.linked_ids(&association.name).to_vec())
        } else {
            entity
                .linked_id(&association.name)
                .map(Value::from)
                .unwrap_or(Value::Null)
        };
        object.insert(association.name.clone(), value);
    }

    Value::Object(object)
}

pub fn entities_to_json(
    entities: &[Entity],
    definition: &EntityDefinition,
    filter: &OutputFilter,
) -> Value {
    Value::Array(
        entities
            .iter()
            .map(|entity| entity_to_json(entity, definition, filter))
            .collect(),
    )
}
