use super::{object_option, ActionDispatcher};
use crate::context::RequestContext;
use crate::document::RecordEntry;
use crate::envelope::{DeleteKind, RemovedRecord};
use groundwork_common::schema::ARCHIVE_FIELD;
use groundwork_common::{
    AccessorArgument, AccessorKind, EntityDefinition, Error, FieldType, FieldValue, Result,
};
use serde_json::Value;
use tracing::debug;

/// Decide between soft and hard delete
///
/// An explicit `isHardDelete` wins; soft delete then requires an archivable
/// entity. Without it, archivable entities are archived when archiving is
/// enabled and removed otherwise.
pub fn delete_kind(
    definition: &EntityDefinition,
    hard_delete: Option<bool>,
    archive_enabled: bool,
) -> Result<DeleteKind> {
    match hard_delete {
        Some(true) => Ok(DeleteKind::Hard),
        Some(false) if definition.archivable => Ok(DeleteKind::Soft),
        Some(false) => Err(Error::UnsupportedOperation(format!(
            "{} has no {} field and cannot be soft deleted",
            definition.name, ARCHIVE_FIELD
        ))),
        None if definition.archivable && archive_enabled => Ok(DeleteKind::Soft),
        None => Ok(DeleteKind::Hard),
    }
}

impl ActionDispatcher {
    /// `delete`: archive or remove the record matching `findOneBy`
    pub(crate) async fn delete(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let registry = self.registry();
        let definition = registry.definition(entity_name)?;

        let criteria = object_option(&record.fields, "findOneBy").ok_or_else(|| {
            Error::InvalidInput(format!(
                "delete {} '{}' requires a findOneBy object",
                definition.name, record.key
            ))
        })?;
        let hard_delete = match record.fields.get("isHardDelete") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                FieldValue::from_json(value, FieldType::Boolean)
                    .and_then(|v| v.as_bool())
                    .ok_or_else(|| {
                        Error::InvalidInput(format!("isHardDelete must be a boolean, got {}", value))
                    })?,
            ),
        };
        let kind = delete_kind(definition, hard_delete, self.archive_enabled)?;

        let mut entity = ctx
            .session
            .repository(entity_name)?
            .find_one_by(criteria)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No {} matches {}",
                    definition.name,
                    Value::Object(criteria.clone())
                ))
            })?;
        let entity_id = entity
            .id()
            .ok_or_else(|| Error::Internal(format!("{} row without id", definition.name)))?;

        match kind {
            DeleteKind::Soft => {
                registry
                    .descriptor(entity_name)?
                    .accessor_for(ARCHIVE_FIELD, AccessorKind::Set)?
                    .apply(&mut entity, AccessorArgument::Value(&FieldValue::Boolean(true)))?;
                ctx.session.persist(&mut entity, false).await?;
                ctx.identifiers.refresh(&entity);
            }
            DeleteKind::Hard => {
                ctx.session.remove(&entity).await?;
            }
        }

        debug!("Deleted {} #{} ({:?})", definition.name, entity_id, kind);
        ctx.envelope.removed.insert(
            record.key.clone(),
            RemovedRecord {
                kind,
                entity_name: definition.name.clone(),
                entity_id,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_kind_policy() {
        let plain = EntityDefinition::new("Tag");
        let archivable = EntityDefinition::new("Customer").archivable();

        assert_eq!(delete_kind(&plain, Some(true), true).unwrap(), DeleteKind::Hard);
        assert_eq!(delete_kind(&archivable, Some(true), true).unwrap(), DeleteKind::Hard);
        assert_eq!(delete_kind(&archivable, Some(false), false).unwrap(), DeleteKind::Soft);
        assert!(matches!(
            delete_kind(&plain, Some(false), true),
            Err(Error::UnsupportedOperation(_))
        ));

        assert_eq!(delete_kind(&archivable, None, true).unwrap(), DeleteKind::Soft);
        assert_eq!(delete_kind(&archivable, None, false).unwrap(), DeleteKind::Hard);
        assert_eq!(delete_kind(&plain, None, true).unwrap(), DeleteKind::Hard);
    }
}
