//! # Groundwork Common Library
//!
//! Shared code for the Groundwork dispatch service and CSV importer:
//! - Naming conventions (inflection, case conversion)
//! - Declared entity schema and the entity registry
//! - Entity introspection (property to accessor mapping)
//! - Dynamic entity records
//! - Persistence gateway over SQLite
//! - Configuration loading

pub mod config;
pub mod db;
pub mod entity;
pub mod error;
pub mod introspect;
pub mod naming;
pub mod schema;

pub use entity::{Entity, FieldValue};
pub use error::{Error, Result};
pub use introspect::{Accessor, AccessorArgument, AccessorKind, EntityDescriptor};
pub use schema::{
    AssociationDefinition, AssociationKind, CustomQuery, EntityDefinition, EntityRegistry,
    FieldDefinition, FieldType,
};
