//! Entity introspection
//!
//! Maps each property of an entity type to the accessor methods that operate
//! on it. Accessor names follow the usual conventions:
//!
//! | Property | Accessors |
//! |---|---|
//! | `id` | `getId` |
//! | field `name` | `getName`, `setName` |
//! | boolean field `active` | `getActive`, `setActive`, `isActive` |
//! | single association `customer` | `getCustomer`, `setCustomer` |
//! | collection `orders` | `getOrders`, `addOrder`, `removeOrder`, `hasOrder` |
//!
//! Property lookup keys are `singularize(capitalize(property))`. A method is
//! assigned to a property when `singularize(capitalize(method))` ends with
//! the key. When several keys match (`ShippingAddress` and `Address`), the
//! longest key wins and the collision is kept as an [`AccessorAmbiguity`].

use crate::entity::{Entity, FieldValue};
use crate::naming::{capitalize, ends_with, property_key, singularize};
use crate::schema::{EntityDefinition, FieldType};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Property lookup key -> accessor names
pub type PropertyMap = BTreeMap<String, Vec<String>>;

/// What an accessor does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Get,
    Set,
    Add,
    Remove,
    Has,
    Is,
}

impl AccessorKind {
    fn prefix(&self) -> &'static str {
        match self {
            AccessorKind::Get => "get",
            AccessorKind::Set => "set",
            AccessorKind::Add => "add",
            AccessorKind::Remove => "remove",
            AccessorKind::Has => "has",
            AccessorKind::Is => "is",
        }
    }

    fn from_method(method: &str) -> Option<AccessorKind> {
        // Longest prefixes first
        [
            AccessorKind::Remove,
            AccessorKind::Get,
            AccessorKind::Set,
            AccessorKind::Add,
            AccessorKind::Has,
            AccessorKind::Is,
        ]
        .into_iter()
        .find(|kind| method.starts_with(kind.prefix()))
    }
}

/// Shape of a property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyKind {
    Id,
    Field(FieldType),
    /// Single-valued association to the named type
    Single(String),
    /// Collection association to the named type
    Collection(String),
}

/// One property and the accessors assigned to it
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub name: String,
    pub key: String,
    pub kind: PropertyKind,
    pub accessors: Vec<String>,
}

/// A method name that matched more than one property key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorAmbiguity {
    pub entity: String,
    pub method: String,
    /// Key the method was assigned to
    pub chosen: String,
    /// Shorter keys that also matched
    pub shadowed: Vec<String>,
}

/// A resolved accessor
#[derive(Debug, Clone, PartialEq)]
pub struct Accessor {
    pub name: String,
    pub kind: AccessorKind,
    pub property: String,
    pub property_kind: PropertyKind,
}

/// Argument passed to a mutating accessor
#[derive(Debug, Clone, Copy)]
pub enum AccessorArgument<'a> {
    Value(&'a FieldValue),
    Entity(&'a Entity),
}

/// Result of a reading accessor
#[derive(Debug, Clone, PartialEq)]
pub enum AccessorValue {
    Value(FieldValue),
    Ids(Vec<i64>),
}

impl Accessor {
    /// Apply a set/add/remove accessor to `entity`
    ///
    /// Returns whether the entity changed.
    pub fn apply(&self, entity: &mut Entity, argument: AccessorArgument<'_>) -> Result<bool> {
        match (&self.kind, &self.property_kind) {
            (AccessorKind::Set, PropertyKind::Field(_)) => match argument {
                AccessorArgument::Value(value) => {
                    let changed = entity.get(&self.property) != value;
                    entity.set(self.property.clone(), value.clone());
                    Ok(changed)
                }
                AccessorArgument::Entity(_) => Err(Error::InvalidInput(format!(
                    "{} expects a value, not an entity",
                    self.name
                ))),
            },
            (AccessorKind::Set, PropertyKind::Single(target)) => {
                let id = self.target_id(target, argument)?;
                let changed = entity.linked_id(&self.property) != id;
                entity.set_link(self.property.clone(), id);
                Ok(changed)
            }
            (AccessorKind::Add, PropertyKind::Collection(target)) => {
                match self.target_id(target, argument)? {
                    Some(id) => Ok(entity.add_link(self.property.clone(), id)),
                    None => Ok(false),
                }
            }
            (AccessorKind::Remove, PropertyKind::Collection(target)) => {
                match self.target_id(target, argument)? {
                    Some(id) => Ok(entity.remove_link(&self.property, id)),
                    None => Ok(false),
                }
            }
            _ => Err(Error::Introspection(format!(
                "{} does not modify {}",
                self.name, self.property
            ))),
        }
    }

    /// Apply a get/is accessor
    pub fn read(&self, entity: &Entity) -> Result<AccessorValue> {
        match (&self.kind, &self.property_kind) {
            (AccessorKind::Get, PropertyKind::Id) => Ok(AccessorValue::Value(
                entity.id().map(FieldValue::Integer).unwrap_or(FieldValue::Null),
            )),
            (AccessorKind::Get | AccessorKind::Is, PropertyKind::Field(_)) => {
                Ok(AccessorValue::Value(entity.get(&self.property).clone()))
            }
            (AccessorKind::Get, PropertyKind::Single(_) | PropertyKind::Collection(_)) => {
                Ok(AccessorValue::Ids(entity.linked_ids(&self.property).to_vec()))
            }
            _ => Err(Error::Introspection(format!(
                "{} does not read {}",
                self.name, self.property
            ))),
        }
    }

    fn target_id(&self, target: &str, argument: AccessorArgument<'_>) -> Result<Option<i64>> {
        match argument {
            AccessorArgument::Entity(other) => {
                if !other.type_name().eq_ignore_ascii_case(target) {
                    return Err(Error::InvalidInput(format!(
                        "{} expects {}, got {}",
                        self.name,
                        target,
                        other.type_name()
                    )));
                }
                other.id().map(Some).ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "{} target {} has not been persisted",
                        self.name, target
                    ))
                })
            }
            AccessorArgument::Value(FieldValue::Integer(id)) => Ok(Some(*id)),
            AccessorArgument::Value(FieldValue::Null) => Ok(None),
            AccessorArgument::Value(other) => Err(Error::InvalidInput(format!(
                "{} expects a {} id, got {}",
                self.name, target, other
            ))),
        }
    }
}

/// Cached introspection result for one entity type
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    type_name: String,
    properties: Vec<PropertyDescriptor>,
    accessors: HashMap<String, Accessor>,
    ambiguities: Vec<AccessorAmbiguity>,
}

impl EntityDescriptor {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Properties in declaration order (`id` first)
    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    /// Property by name, case-insensitive
    pub fn property(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .or_else(|| self.properties.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
    }

    /// Lookup key -> accessor names
    pub fn property_map(&self) -> PropertyMap {
        self.properties
            .iter()
            .map(|p| (p.key.clone(), p.accessors.clone()))
            .collect()
    }

    pub fn ambiguities(&self) -> &[AccessorAmbiguity] {
        &self.ambiguities
    }

    /// Resolve an accessor name to its property
    pub fn resolve(&self, name: &str) -> Result<&Accessor> {
        self.accessors.get(name).ok_or_else(|| {
            Error::Introspection(format!("{} has no accessor named {}", self.type_name, name))
        })
    }

    /// The accessor of `kind` assigned to `property`
    pub fn accessor_for(&self, property: &str, kind: AccessorKind) -> Result<&Accessor> {
        let descriptor = self.property(property).ok_or_else(|| {
            Error::InvalidField(format!("{} has no property {}", self.type_name, property))
        })?;

        descriptor
            .accessors
            .iter()
            .filter_map(|name| self.accessors.get(name))
            .find(|accessor| accessor.kind == kind)
            .ok_or_else(|| {
                Error::Introspection(format!(
                    "{}::{} has no {} accessor",
                    self.type_name,
                    descriptor.name,
                    kind.prefix()
                ))
            })
    }
}

/// Method names generated for one property
fn generated_methods(name: &str, kind: &PropertyKind) -> Vec<String> {
    let upper = capitalize(name);
    match kind {
        PropertyKind::Id => vec![format!("get{}", upper)],
        PropertyKind::Field(FieldType::Boolean) => {
            let mut methods = vec![format!("get{}", upper), format!("set{}", upper)];
            // `isArchive` already reads as a predicate
            let is_predicate = name.len() > 2
                && name.starts_with("is")
                && name[2..].starts_with(|c: char| c.is_ascii_uppercase());
            if !is_predicate {
                methods.push(format!("is{}", upper));
            }
            methods
        }
        PropertyKind::Field(_) | PropertyKind::Single(_) => {
            vec![format!("get{}", upper), format!("set{}", upper)]
        }
        PropertyKind::Collection(_) => {
            let item = property_key(name);
            vec![
                format!("get{}", upper),
                format!("add{}", item),
                format!("remove{}", item),
                format!("has{}", item),
            ]
        }
    }
}

/// Build the property -> accessor mapping for a definition
pub fn describe_properties(definition: &EntityDefinition) -> EntityDescriptor {
    let mut properties: Vec<PropertyDescriptor> = Vec::new();
    let mut push = |name: &str, kind: PropertyKind| {
        properties.push(PropertyDescriptor {
            name: name.to_string(),
            key: property_key(name),
            kind,
            accessors: Vec::new(),
        });
    };

    push("id", PropertyKind::Id);
    for field in &definition.fields {
        push(&field.name, PropertyKind::Field(field.field_type));
    }
    for association in &definition.associations {
        let kind = if association.is_collection() {
            PropertyKind::Collection(association.target.clone())
        } else {
            PropertyKind::Single(association.target.clone())
        };
        push(&association.name, kind);
    }

    let methods: Vec<String> = properties
        .iter()
        .flat_map(|p| generated_methods(&p.name, &p.kind))
        .collect();

    let mut accessors = HashMap::new();
    let mut ambiguities = Vec::new();

    for method in methods {
        let method_key = singularize(&capitalize(&method));

        let mut matching: Vec<usize> = properties
            .iter()
            .enumerate()
            .filter(|(_, p)| ends_with(&method_key, &p.key))
            .map(|(index, _)| index)
            .collect();
        matching.sort_by(|a, b| properties[*b].key.len().cmp(&properties[*a].key.len()));

        let Some((&chosen, shadowed)) = matching.split_first() else {
            continue;
        };

        if !shadowed.is_empty() {
            ambiguities.push(AccessorAmbiguity {
                entity: definition.name.clone(),
                method: method.clone(),
                chosen: properties[chosen].key.clone(),
                shadowed: shadowed.iter().map(|i| properties[*i].key.clone()).collect(),
            });
        }

        let Some(kind) = AccessorKind::from_method(&method) else {
            continue;
        };

        let property = &mut properties[chosen];
        property.accessors.push(method.clone());
        accessors.insert(
            method.clone(),
            Accessor {
                name: method,
                kind,
                property: property.name.clone(),
                property_kind: property.kind.clone(),
            },
        );
    }

    EntityDescriptor {
        type_name: definition.name.clone(),
        properties,
        accessors,
        ambiguities,
    }
}
