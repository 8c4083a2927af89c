//! Entity registry
//!
//! Holds every declared entity type together with its cached
//! [`EntityDescriptor`]. Lookups accept the type name (case-insensitive) or
//! the service/table name, so `OrderItem`, `orderitem` and `order_item` all
//! resolve to the same definition.

use crate::entity::Entity;
use crate::introspect::{describe_properties, EntityDescriptor};
use crate::schema::definition::{AssociationKind, EntityDefinition};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug)]
struct RegisteredEntity {
    definition: Arc<EntityDefinition>,
    descriptor: Arc<EntityDescriptor>,
}

/// Registry of declared entity types
#[derive(Debug, Default)]
pub struct EntityRegistry {
    /// Lower-cased type name -> entry
    entities: BTreeMap<String, RegisteredEntity>,
    /// Service name -> lower-cased type name
    services: HashMap<String, String>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions and validate it
    pub fn from_definitions(definitions: impl IntoIterator<Item = EntityDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        for definition in definitions {
            registry.register(definition)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Register a definition
    ///
    /// Returns a `Config` error if the name (or its table name) is taken or
    /// the definition declares a reserved or duplicate property.
    pub fn register(&mut self, mut definition: EntityDefinition) -> Result<()> {
        definition.ensure_archive_field();

        let key = definition.name.to_ascii_lowercase();
        let service = definition.service_name();
        if self.entities.contains_key(&key) || self.services.contains_key(&service) {
            return Err(Error::Config(format!(
                "Entity type {} is registered twice",
                definition.name
            )));
        }

        let mut seen = Vec::new();
        for name in definition
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .chain(definition.associations.iter().map(|a| a.name.as_str()))
        {
            if name.eq_ignore_ascii_case("id") {
                return Err(Error::Config(format!(
                    "{}: property name 'id' is reserved",
                    definition.name
                )));
            }
            if seen.contains(&name) {
                return Err(Error::Config(format!(
                    "{}: property {} declared twice",
                    definition.name, name
                )));
            }
            seen.push(name);
        }

        let descriptor = describe_properties(&definition);
        debug!(
            "Registered entity {} ({} properties)",
            definition.name,
            descriptor.properties().len()
        );

        self.services.insert(service, key.clone());
        self.entities.insert(
            key,
            RegisteredEntity {
                definition: Arc::new(definition),
                descriptor: Arc::new(descriptor),
            },
        );
        Ok(())
    }

    fn entry(&self, name: &str) -> Option<&RegisteredEntity> {
        self.entities
            .get(&name.to_ascii_lowercase())
            .or_else(|| {
                self.services
                    .get(name)
                    .and_then(|key| self.entities.get(key))
            })
    }

    /// Definition by type or service name
    pub fn definition(&self, name: &str) -> Result<&EntityDefinition> {
        self.entry(name)
            .map(|entry| entry.definition.as_ref())
            .ok_or_else(|| Error::NotFound(format!("Entity type {}", name)))
    }

    /// Shared handle to a definition
    pub fn definition_arc(&self, name: &str) -> Result<Arc<EntityDefinition>> {
        self.entry(name)
            .map(|entry| entry.definition.clone())
            .ok_or_else(|| Error::NotFound(format!("Entity type {}", name)))
    }

    /// Definition whose service name is exactly `service`
    pub fn by_service(&self, service: &str) -> Option<&EntityDefinition> {
        self.services
            .get(service)
            .and_then(|key| self.entities.get(key))
            .map(|entry| entry.definition.as_ref())
    }

    pub fn descriptor(&self, name: &str) -> Result<&EntityDescriptor> {
        self.entry(name)
            .map(|entry| entry.descriptor.as_ref())
            .ok_or_else(|| Error::NotFound(format!("Entity type {}", name)))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entry(name).is_some()
    }

    /// Create an empty, unsaved record of the named type
    pub fn instantiate(&self, name: &str) -> Result<Entity> {
        let definition = self.definition(name)?;
        Ok(Entity::new(definition.name.clone()))
    }

    /// All definitions, ordered by lower-cased type name
    pub fn definitions(&self) -> impl Iterator<Item = &EntityDefinition> {
        self.entities.values().map(|entry| entry.definition.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Check cross-type references and report accessor ambiguities
    ///
    /// Every association target must be registered; `mapped_by` must name an
    /// owning association on the target pointing back at this type; one-to-many
    /// associations must be mapped by a many-to-one.
    pub fn validate(&self) -> Result<()> {
        for entry in self.entities.values() {
            let definition = &entry.definition;

            for association in &definition.associations {
                let target = self.definition(&association.target).map_err(|_| {
                    Error::Config(format!(
                        "{}.{}: unknown target type {}",
                        definition.name, association.name, association.target
                    ))
                })?;

                match &association.mapped_by {
                    Some(mapped_by) => {
                        let owning = target.association_mapping(mapped_by).ok_or_else(|| {
                            Error::Config(format!(
                                "{}.{}: mapped_by {} is not an association of {}",
                                definition.name, association.name, mapped_by, target.name
                            ))
                        })?;
                        if !owning.is_owning_side()
                            || !owning.target.eq_ignore_ascii_case(&definition.name)
                        {
                            return Err(Error::Config(format!(
                                "{}.{}: {}.{} is not an owning association to {}",
                                definition.name,
                                association.name,
                                target.name,
                                mapped_by,
                                definition.name
                            )));
                        }
                    }
                    None if association.kind == AssociationKind::OneToMany => {
                        return Err(Error::Config(format!(
                            "{}.{}: one_to_many requires mapped_by",
                            definition.name, association.name
                        )));
                    }
                    None => {}
                }
            }

            for ambiguity in entry.descriptor.ambiguities() {
                warn!(
                    "Accessor {}::{} matches several properties; using {} over {}",
                    ambiguity.entity,
                    ambiguity.method,
                    ambiguity.chosen,
                    ambiguity.shadowed.join(", ")
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AssociationDefinition, FieldDefinition, FieldType};

    fn definitions() -> Vec<EntityDefinition> {
        vec![
            EntityDefinition::new("Customer")
                .field(FieldDefinition::new("name", FieldType::String))
                .association(AssociationDefinition::one_to_many("orders", "Order", "customer")),
            EntityDefinition::new("Order")
                .field(FieldDefinition::new("total", FieldType::Float))
                .association(AssociationDefinition::many_to_one("customer", "Customer").inversed_by("orders")),
            EntityDefinition::new("OrderItem")
                .field(FieldDefinition::new("quantity", FieldType::Integer)),
        ]
    }

    #[test]
    fn test_lookup_by_type_and_service_name() {
        let registry = EntityRegistry::from_definitions(definitions()).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.definition("OrderItem").unwrap().name, "OrderItem");
        assert_eq!(registry.definition("orderitem").unwrap().name, "OrderItem");
        assert_eq!(registry.definition("order_item").unwrap().name, "OrderItem");
        assert_eq!(registry.by_service("order_item").unwrap().name, "OrderItem");
        assert!(registry.by_service("OrderItem").is_none());
    }

    #[test]
    fn test_unknown_type_is_not_found() {
        let registry = EntityRegistry::from_definitions(definitions()).unwrap();

        assert!(matches!(registry.definition("Invoice"), Err(Error::NotFound(_))));
        assert!(matches!(registry.instantiate("Invoice"), Err(Error::NotFound(_))));
        assert!(matches!(registry.descriptor("Invoice"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_instantiate_creates_unsaved_record() {
        let registry = EntityRegistry::from_definitions(definitions()).unwrap();

        let entity = registry.instantiate("customer").unwrap();
        assert_eq!(entity.type_name(), "Customer");
        assert_eq!(entity.id(), None);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = EntityRegistry::new();
        registry.register(EntityDefinition::new("Customer")).unwrap();

        let result = registry.register(EntityDefinition::new("customer"));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_reserved_id_property_rejected() {
        let mut registry = EntityRegistry::new();
        let result = registry.register(
            EntityDefinition::new("Customer").field(FieldDefinition::new("id", FieldType::Integer)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_target() {
        let result = EntityRegistry::from_definitions(vec![EntityDefinition::new("Order")
            .association(AssociationDefinition::many_to_one("customer", "Customer"))]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_mapped_by() {
        let result = EntityRegistry::from_definitions(vec![
            EntityDefinition::new("Customer")
                .association(AssociationDefinition::one_to_many("orders", "Order", "buyer")),
            EntityDefinition::new("Order")
                .association(AssociationDefinition::many_to_one("customer", "Customer")),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_archivable_from_config_gets_archive_field() {
        let mut definition = EntityDefinition::new("Customer");
        definition.archivable = true;

        let registry = EntityRegistry::from_definitions(vec![definition]).unwrap();
        assert!(registry
            .definition("Customer")
            .unwrap()
            .has_field(crate::schema::ARCHIVE_FIELD));
    }
}
