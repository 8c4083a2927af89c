use super::{ActionDispatcher, BoxFuture};
use crate::binding::{EntityForm, FormMode};
use crate::context::RequestContext;
use crate::document::RecordEntry;
use crate::envelope::CreatedRecord;
use groundwork_common::schema::ARCHIVE_FIELD;
use groundwork_common::{Entity, Error, FieldValue, Result};
use serde_json::{Map, Value};
use tracing::debug;

impl ActionDispatcher {
    /// `create`: bind, persist and store a new record under its key
    pub(crate) async fn create(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let entity = self.create_record(ctx, entity_name, &record.fields).await?;
        let entity_id = entity
            .id()
            .ok_or_else(|| Error::Internal(format!("{} was not assigned an id", entity_name)))?;

        ctx.envelope.created.insert(
            record.key.clone(),
            CreatedRecord {
                entity_name: entity.type_name().to_string(),
                entity_id,
            },
        );
        ctx.identifiers.insert(record.key.clone(), vec![entity]);
        Ok(())
    }

    /// Create one record from submitted fields
    ///
    /// Nested association objects are found or created first. Inverse
    /// associations are wired on the owning side after the record has an id.
    pub(crate) fn create_record<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
        type_name: &'a str,
        fields: &'a Map<String, Value>,
    ) -> BoxFuture<'a, Result<Entity>> {
        Box::pin(async move {
            let registry = self.registry();
            let definition = registry.definition(type_name)?;
            let descriptor = registry.descriptor(type_name)?;

            let bound = EntityForm::new(definition).submit(fields, FormMode::Create)?;

            let mut entity = registry.instantiate(type_name)?;
            if definition.archivable {
                entity.set(ARCHIVE_FIELD, FieldValue::Boolean(false));
            }
            self.apply_values(&mut entity, descriptor, &bound)?;

            let mut inverse = Vec::new();
            for submitted in &bound.associations {
                let association = definition.association_mapping(&submitted.name).ok_or_else(|| {
                    Error::InvalidField(format!("{} has no association {}", definition.name, submitted.name))
                })?;
                let targets = self
                    .resolve_references(ctx, association, &submitted.references)
                    .await?;

                if association.is_owning_side() {
                    self.link_owning(&mut entity, descriptor, association, &targets, false)?;
                } else {
                    inverse.push((association, targets));
                }
            }

            ctx.session.persist(&mut entity, false).await?;

            for (association, targets) in inverse {
                self.wire_inverse(ctx, &mut entity, association, &targets).await?;
            }

            debug!("Created {} #{:?}", definition.name, entity.id());
            Ok(entity)
        })
    }
}
