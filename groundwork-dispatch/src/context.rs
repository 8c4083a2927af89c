//! Request-scoped dispatch state

use crate::envelope::ResponseEnvelope;
use groundwork_common::db::Session;
use groundwork_common::{Entity, Error, Result};
use std::collections::HashMap;

/// Record keys of the current request mapped to the records they name
#[derive(Debug, Default)]
pub struct IdentifierTable {
    entries: HashMap<String, Vec<Entity>>,
}

impl IdentifierTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store (or replace) the records under `key`
    pub fn insert(&mut self, key: impl Into<String>, entities: Vec<Entity>) {
        self.entries.insert(key.into(), entities);
    }

    pub fn get(&self, key: &str) -> Option<&[Entity]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    /// Records under `key`, or `NotFound`
    pub fn require(&self, key: &str) -> Result<&[Entity]> {
        self.get(key)
            .ok_or_else(|| Error::NotFound(format!("No record stored under key '{}'", key)))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Replace every stored copy of `entity` with its current state
    pub fn refresh(&mut self, entity: &Entity) {
        for stored in self.entries.values_mut().flatten() {
            if stored.same_record(entity) {
                *stored = entity.clone();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Everything one dispatch call owns
pub struct RequestContext {
    pub session: Session,
    pub identifiers: IdentifierTable,
    pub envelope: ResponseEnvelope,
}

impl RequestContext {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            identifiers: IdentifierTable::new(),
            envelope: ResponseEnvelope::default(),
        }
    }
}
