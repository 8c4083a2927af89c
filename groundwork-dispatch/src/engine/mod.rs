//! Action dispatch engine
//!
//! [`ActionDispatcher::dispatch`] interprets one action document against a
//! fresh [`RequestContext`]. Actions, entity blocks and record entries run in
//! document order. The first error aborts the document and rolls back the
//! staged work; a successful document is flushed once at the end.
//!
//! The dispatcher itself holds no request state and is cheap to clone, so one
//! instance serves concurrent requests.

mod connect;
mod create;
mod delete;
mod get;
mod load_order;
mod output;
mod update;

use crate::binding::{BoundForm, Reference};
use crate::context::RequestContext;
use crate::document::{ActionDocument, ActionKind, EntityBlock};
use crate::envelope::ResponseEnvelope;
use groundwork_common::db::gateway::Criteria;
use groundwork_common::db::PersistenceGateway;
use groundwork_common::{
    AccessorArgument, AccessorKind, AssociationDefinition, Entity, EntityDefinition,
    EntityDescriptor, EntityRegistry, Error, FieldValue, Result,
};
use serde_json::{Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub use delete::delete_kind;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Stateless interpreter for action documents
#[derive(Debug, Clone)]
pub struct ActionDispatcher {
    gateway: PersistenceGateway,
    /// Deletes without `isHardDelete` archive archivable records
    archive_enabled: bool,
}

impl ActionDispatcher {
    pub fn new(gateway: PersistenceGateway, archive_enabled: bool) -> Self {
        Self {
            gateway,
            archive_enabled,
        }
    }

    pub fn gateway(&self) -> &PersistenceGateway {
        &self.gateway
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        self.gateway.registry()
    }

    pub fn archive_enabled(&self) -> bool {
        self.archive_enabled
    }

    /// Parse and dispatch a JSON document
    pub async fn dispatch_value(&self, document: &Value) -> Result<ResponseEnvelope> {
        let document = ActionDocument::from_value(document)?;
        self.dispatch(&document).await
    }

    /// Run every action of `document` in one unit of work
    pub async fn dispatch(&self, document: &ActionDocument) -> Result<ResponseEnvelope> {
        let started = Instant::now();
        let mut ctx = RequestContext::new(self.gateway.session());

        if let Err(e) = self.run(&mut ctx, document).await {
            warn!("Action document aborted: {}", e);
            if let Err(rollback) = ctx.session.rollback().await {
                warn!("Rollback failed: {}", rollback);
            }
            return Err(e);
        }

        ctx.session.flush().await?;

        let mut envelope = ctx.envelope;
        envelope.response_time = started.elapsed().as_millis() as u64;
        info!(
            "Dispatched {} actions: {} created, {} updated, {} removed ({} ms)",
            document.actions.len(),
            envelope.created.len(),
            envelope.updates.len(),
            envelope.removed.len(),
            envelope.response_time
        );
        Ok(envelope)
    }

    async fn run(&self, ctx: &mut RequestContext, document: &ActionDocument) -> Result<()> {
        for action in &document.actions {
            debug!("Processing {} action ({} blocks)", action.kind, action.blocks.len());

            for block in &action.blocks {
                for record in &block.records {
                    match action.kind {
                        ActionKind::Get => self.get(ctx, block_entity(block)?, record).await?,
                        ActionKind::Create => self.create(ctx, block_entity(block)?, record).await?,
                        ActionKind::Update => self.update(ctx, block_entity(block)?, record).await?,
                        ActionKind::Delete => self.delete(ctx, block_entity(block)?, record).await?,
                        ActionKind::Connect => {
                            self.connect(ctx, block_entity(block)?, record).await?
                        }
                        ActionKind::Response => {
                            self.respond(ctx, block_entity(block)?, record).await?
                        }
                        ActionKind::LoadOrder => {
                            self.load_order(ctx, block.entity.as_deref(), record).await?
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Apply bound field values through setter accessors
    ///
    /// Returns the number of fields whose value changed.
    fn apply_values(
        &self,
        entity: &mut Entity,
        descriptor: &EntityDescriptor,
        bound: &BoundForm,
    ) -> Result<usize> {
        let mut changed = 0;
        for (name, value) in &bound.values {
            let accessor = descriptor.accessor_for(name, AccessorKind::Set)?;
            if accessor.apply(entity, AccessorArgument::Value(value))? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Link targets through an owning association of `entity`
    ///
    /// Collections are replaced: links not in `targets` are removed first.
    /// Returns whether the links changed.
    fn link_owning(
        &self,
        entity: &mut Entity,
        descriptor: &EntityDescriptor,
        association: &AssociationDefinition,
        targets: &[Entity],
        replace: bool,
    ) -> Result<bool> {
        let mut changed = false;

        if association.is_collection() {
            if replace {
                let remove = descriptor.accessor_for(&association.name, AccessorKind::Remove)?;
                let keep: Vec<i64> = targets.iter().filter_map(Entity::id).collect();
                let stale: Vec<i64> = entity
                    .linked_ids(&association.name)
                    .iter()
                    .copied()
                    .filter(|id| !keep.contains(id))
                    .collect();
                for id in stale {
                    let id = FieldValue::Integer(id);
                    changed |= remove.apply(entity, AccessorArgument::Value(&id))?;
                }
            }
            let add = descriptor.accessor_for(&association.name, AccessorKind::Add)?;
            for target in targets {
                changed |= add.apply(entity, AccessorArgument::Entity(target))?;
            }
        } else {
            let set = descriptor.accessor_for(&association.name, AccessorKind::Set)?;
            changed |= match targets.first() {
                Some(target) => set.apply(entity, AccessorArgument::Entity(target))?,
                None => set.apply(
                    entity,
                    AccessorArgument::Value(&FieldValue::Null),
                )?,
            };
        }

        Ok(changed)
    }

    /// Wire the owning side of an inverse association on every target
    ///
    /// `entity` must be persisted. Targets whose owning side changed are
    /// persisted and refreshed in the identifier table. Returns whether any
    /// link was added.
    async fn wire_inverse(
        &self,
        ctx: &mut RequestContext,
        entity: &mut Entity,
        association: &AssociationDefinition,
        targets: &[Entity],
    ) -> Result<bool> {
        let registry = self.registry();
        let mapped_by = inverse_property(association)?;
        let owning = registry
            .definition(&association.target)?
            .association_mapping(mapped_by)
            .ok_or_else(|| {
                Error::Introspection(format!(
                    "{} has no association {}",
                    association.target, mapped_by
                ))
            })?;
        let kind = if owning.is_collection() {
            AccessorKind::Add
        } else {
            AccessorKind::Set
        };
        let accessor = registry
            .descriptor(&association.target)?
            .accessor_for(mapped_by, kind)?;

        let mut changed = false;
        for target in targets {
            let mut target = target.clone();
            if accessor.apply(&mut target, AccessorArgument::Entity(&*entity))? {
                ctx.session.persist(&mut target, false).await?;
                ctx.identifiers.refresh(&target);
                changed = true;
            }

            let target_id = target.id().ok_or_else(|| {
                Error::Internal(format!("{} target was not persisted", association.target))
            })?;
            if association.is_collection() {
                entity.add_link(association.name.clone(), target_id);
            } else {
                entity.set_link(association.name.clone(), Some(target_id));
            }
        }
        Ok(changed)
    }

    /// Detach stale targets of an inverse association of `entity`
    ///
    /// Returns whether any link was removed.
    async fn unwire_inverse(
        &self,
        ctx: &mut RequestContext,
        entity: &mut Entity,
        association: &AssociationDefinition,
        keep: &[i64],
    ) -> Result<bool> {
        let Some(entity_id) = entity.id() else {
            return Ok(false);
        };
        let stale: Vec<i64> = entity
            .linked_ids(&association.name)
            .iter()
            .copied()
            .filter(|id| !keep.contains(id))
            .collect();
        if stale.is_empty() {
            return Ok(false);
        }

        let registry = self.registry();
        let mapped_by = inverse_property(association)?;
        let descriptor = registry.descriptor(&association.target)?;
        let owning_is_collection = registry
            .definition(&association.target)?
            .association_mapping(mapped_by)
            .map(AssociationDefinition::is_collection)
            .unwrap_or(false);

        for mut target in self.load_by_ids(ctx, &association.target, &stale).await? {
            let changed = if owning_is_collection {
                descriptor
                    .accessor_for(mapped_by, AccessorKind::Remove)?
                    .apply(&mut target, AccessorArgument::Entity(&*entity))?
            } else if target.linked_id(mapped_by) == Some(entity_id) {
                descriptor
                    .accessor_for(mapped_by, AccessorKind::Set)?
                    .apply(
                        &mut target,
                        AccessorArgument::Value(&FieldValue::Null),
                    )?
            } else {
                false
            };
            if changed {
                ctx.session.persist(&mut target, false).await?;
                ctx.identifiers.refresh(&target);
            }
        }

        for id in &stale {
            if association.is_collection() {
                entity.remove_link(&association.name, *id);
            } else {
                entity.set_link(association.name.clone(), None);
            }
        }
        Ok(true)
    }

    /// Resolve submitted references to records of the association target
    ///
    /// Record keys are looked up in the identifier table first; a key that is
    /// not stored but parses as an integer is treated as an id. Nested objects
    /// are found by their scalar values or created.
    async fn resolve_references(
        &self,
        ctx: &mut RequestContext,
        association: &AssociationDefinition,
        references: &[Reference],
    ) -> Result<Vec<Entity>> {
        let target_name = self.registry().definition(&association.target)?.name.clone();
        let mut targets: Vec<Entity> = Vec::new();

        for reference in references {
            match reference {
                Reference::Id(id) => targets.push(self.find_required(ctx, &target_name, *id).await?),
                Reference::Key(key) => match ctx.identifiers.get(key) {
                    Some(stored) => targets.extend(stored.iter().cloned()),
                    None => match key.parse::<i64>() {
                        Ok(id) => targets.push(self.find_required(ctx, &target_name, id).await?),
                        Err(_) => {
                            return Err(Error::NotFound(format!(
                                "No record stored under key '{}'",
                                key
                            )))
                        }
                    },
                },
                Reference::Nested(fields) => {
                    targets.extend(self.find_or_create(ctx, &target_name, fields).await?)
                }
            }
        }

        for target in &targets {
            if target.type_name() != target_name {
                return Err(Error::InvalidInput(format!(
                    "{} expects {} records, got {}",
                    association.name,
                    target_name,
                    target.type_name()
                )));
            }
        }
        if !association.is_collection() && targets.len() > 1 {
            return Err(Error::AmbiguousRecord(format!(
                "{} takes one {}, {} referenced",
                association.name,
                target_name,
                targets.len()
            )));
        }

        Ok(targets)
    }

    /// Existing records matching a nested object, or a newly created one
    async fn find_or_create(
        &self,
        ctx: &mut RequestContext,
        type_name: &str,
        fields: &Map<String, Value>,
    ) -> Result<Vec<Entity>> {
        let definition = self.registry().definition(type_name)?;

        if let Some(criteria) = lookup_criteria(definition, fields) {
            let found = ctx
                .session
                .repository(type_name)?
                .find_by(&criteria, &[], None, None)
                .await?;
            if !found.is_empty() {
                debug!("Nested {} matched {} existing records", type_name, found.len());
                return Ok(found);
            }
        }

        let entity = self.create_record(ctx, type_name, fields).await?;
        Ok(vec![entity])
    }

    async fn find_required(&self, ctx: &mut RequestContext, type_name: &str, id: i64) -> Result<Entity> {
        ctx.session
            .repository(type_name)?
            .find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{} #{}", type_name, id)))
    }

    /// Records with the given ids, in the order of `ids`
    async fn load_by_ids(
        &self,
        ctx: &mut RequestContext,
        type_name: &str,
        ids: &[i64],
    ) -> Result<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut criteria = Criteria::new();
        criteria.insert("id".to_string(), Value::from(ids.to_vec()));
        let mut found = ctx
            .session
            .repository(type_name)?
            .find_by(&criteria, &[], None, None)
            .await?;
        found.sort_by_key(|e| {
            e.id()
                .and_then(|id| ids.iter().position(|candidate| *candidate == id))
                .unwrap_or(usize::MAX)
        });
        Ok(found)
    }
}

fn block_entity(block: &EntityBlock) -> Result<&str> {
    block
        .entity
        .as_deref()
        .ok_or_else(|| Error::InvalidInput("Action block has no entity type".to_string()))
}

fn inverse_property(association: &AssociationDefinition) -> Result<&str> {
    association.mapped_by.as_deref().ok_or_else(|| {
        Error::Internal(format!("{} is not an inverse association", association.name))
    })
}

/// Criteria for finding a nested record, when every value is a stored scalar
fn lookup_criteria(
    definition: &EntityDefinition,
    fields: &Map<String, Value>,
) -> Option<Criteria> {
    if fields.is_empty() {
        return None;
    }
    for (name, value) in fields {
        if value.is_array() || value.is_object() {
            return None;
        }
        let stored = name == "id"
            || definition.has_field(name)
            || definition
                .association_mapping(name)
                .map(AssociationDefinition::has_column)
                .unwrap_or(false);
        if !stored {
            return None;
        }
    }
    Some(fields.clone())
}

fn object_option<'a>(
    fields: &'a Map<String, Value>,
    option: &str,
) -> Option<&'a Map<String, Value>> {
    fields.get(option).and_then(Value::as_object)
}
