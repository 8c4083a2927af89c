use super::{object_option, ActionDispatcher};
use crate::binding::{EntityForm, FormMode};
use crate::context::RequestContext;
use crate::document::RecordEntry;
use crate::envelope::UpdatedRecord;
use groundwork_common::{Entity, Error, Result};
use serde_json::Value;
use tracing::debug;

impl ActionDispatcher {
    /// `update`: apply `updateRecord` to the single record matching `findBy`
    ///
    /// Collection associations are replaced, stale inverse links are removed
    /// from their owning side before new ones are wired.
    pub(crate) async fn update(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let registry = self.registry();
        let definition = registry.definition(entity_name)?;
        let descriptor = registry.descriptor(entity_name)?;

        let (Some(find_by), Some(update_record)) = (
            object_option(&record.fields, "findBy"),
            object_option(&record.fields, "updateRecord"),
        ) else {
            return Err(Error::InvalidInput(format!(
                "update {} '{}' requires findBy and updateRecord objects",
                definition.name, record.key
            )));
        };

        let mut matches = ctx
            .session
            .repository(entity_name)?
            .find_by(find_by, &[], None, None)
            .await?;
        if matches.len() != 1 {
            return Err(Error::AmbiguousRecord(format!(
                "{} records of {} match {}; supply more detail to narrow the search",
                matches.len(),
                definition.name,
                Value::Object(find_by.clone())
            )));
        }
        let mut entity: Entity = matches.remove(0);

        let bound = EntityForm::new(definition).submit(update_record, FormMode::Update)?;
        let mut count = self.apply_values(&mut entity, descriptor, &bound)?;

        let mut inverse = Vec::new();
        for submitted in &bound.associations {
            let association = definition.association_mapping(&submitted.name).ok_or_else(|| {
                Error::InvalidField(format!("{} has no association {}", definition.name, submitted.name))
            })?;
            let targets = self
                .resolve_references(ctx, association, &submitted.references)
                .await?;

            if association.is_owning_side() {
                if self.link_owning(&mut entity, descriptor, association, &targets, true)? {
                    count += 1;
                }
            } else {
                inverse.push((association, targets));
            }
        }

        for (association, targets) in inverse {
            let keep: Vec<i64> = targets.iter().filter_map(Entity::id).collect();
            let removed = self.unwire_inverse(ctx, &mut entity, association, &keep).await?;
            let added = self.wire_inverse(ctx, &mut entity, association, &targets).await?;
            if removed || added {
                count += 1;
            }
        }

        ctx.session.persist(&mut entity, false).await?;
        let entity_id = entity
            .id()
            .ok_or_else(|| Error::Internal(format!("{} row without id", definition.name)))?;
        debug!("Updated {} #{} ({} changes)", definition.name, entity_id, count);

        ctx.envelope.updates.insert(
            record.key.clone(),
            UpdatedRecord {
                count,
                fields: bound.property_names(),
                entity_name: definition.name.clone(),
                entity_id,
            },
        );
        ctx.identifiers.refresh(&entity);
        ctx.identifiers.insert(record.key.clone(), vec![entity]);
        Ok(())
    }
}
