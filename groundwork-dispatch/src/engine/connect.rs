use super::ActionDispatcher;
use crate::context::RequestContext;
use crate::document::RecordEntry;
use groundwork_common::{AssociationDefinition, Entity, Error, Result};
use serde_json::Value;
use tracing::debug;

/// Record keys named by one connect field (`"key"` or `["a", "b"]`)
fn reference_keys(field: &str, value: &Value) -> Result<Vec<String>> {
    let invalid = || {
        Error::InvalidInput(format!(
            "connect {}: expected a record key or a list of record keys, got {}",
            field, value
        ))
    };
    match value {
        Value::String(key) => Ok(vec![key.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

impl ActionDispatcher {
    /// `connect`: link records stored under the entry key to other stored records
    ///
    /// Every field and referenced key is checked before anything changes.
    pub(crate) async fn connect(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let registry = self.registry();
        let definition = registry.definition(entity_name)?;
        let descriptor = registry.descriptor(entity_name)?;

        let primaries = ctx.identifiers.require(&record.key)?.to_vec();
        if primaries.is_empty() {
            return Err(Error::NotFound(format!(
                "No {} stored under key '{}'",
                definition.name, record.key
            )));
        }
        if let Some(other) = primaries.iter().find(|e| e.type_name() != definition.name) {
            return Err(Error::InvalidInput(format!(
                "connect {}: '{}' holds {} records",
                definition.name,
                record.key,
                other.type_name()
            )));
        }

        let mut plan: Vec<(&AssociationDefinition, Vec<Entity>)> = Vec::new();
        for (field, value) in &record.fields {
            let association = descriptor
                .property(field)
                .and_then(|property| definition.association_mapping(&property.name))
                .ok_or_else(|| {
                    Error::InvalidField(format!(
                        "{} is not an association of {}",
                        field, definition.name
                    ))
                })?;
            let target_name = &registry.definition(&association.target)?.name;

            let mut targets = Vec::new();
            for key in reference_keys(field, value)? {
                for target in ctx.identifiers.require(&key)? {
                    if target.type_name() != target_name {
                        return Err(Error::InvalidInput(format!(
                            "{}.{} expects {} records, '{}' holds {}",
                            definition.name,
                            association.name,
                            target_name,
                            key,
                            target.type_name()
                        )));
                    }
                    targets.push(target.clone());
                }
            }
            if !association.is_collection() && targets.len() > 1 {
                return Err(Error::AmbiguousRecord(format!(
                    "{}.{} takes one {}, {} referenced",
                    definition.name,
                    association.name,
                    target_name,
                    targets.len()
                )));
            }
            plan.push((association, targets));
        }

        for mut primary in primaries {
            let mut inverse = Vec::new();
            for (association, targets) in &plan {
                if association.is_owning_side() {
                    self.link_owning(&mut primary, descriptor, association, targets, false)?;
                } else {
                    inverse.push((*association, targets));
                }
            }

            ctx.session.persist(&mut primary, false).await?;
            for (association, targets) in inverse {
                self.wire_inverse(ctx, &mut primary, association, targets).await?;
            }
            ctx.identifiers.refresh(&primary);
        }

        debug!("Connected {} '{}' ({} associations)", definition.name, record.key, plan.len());
        Ok(())
    }
}
