//! Declared entity schema
//!
//! Entity types are not known at compile time. Each one is described by an
//! [`EntityDefinition`] (registered in code or declared in the TOML config) and
//! kept in the process-wide [`EntityRegistry`].

pub mod definition;
pub mod registry;

pub use definition::{
    AssociationDefinition, AssociationKind, CustomQuery, EntityDefinition, FieldDefinition,
    FieldType, ARCHIVE_FIELD,
};
pub use registry::EntityRegistry;
