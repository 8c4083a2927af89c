//! Entity definitions
//!
//! Builder-style declarations of entity types, their fields and associations.
//! The same structures deserialize from `[[entity]]` tables in the TOML
//! configuration:
//!
//! ```toml
//! [[entity]]
//! name = "Customer"
//! archivable = true
//! fields = [
//!     { name = "email", type = "string", nullable = false, unique = true },
//!     { name = "signedUp", type = "datetime" },
//! ]
//! associations = [
//!     { name = "orders", kind = "one_to_many", target = "Order", mapped_by = "customer" },
//! ]
//! ```

use crate::naming::to_snake_case;
use serde::{Deserialize, Serialize};

/// Boolean field added to archivable entities; soft delete sets it to true
pub const ARCHIVE_FIELD: &str = "isArchive";

/// Primitive field types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Float,
    Boolean,
    String,
    Text,
    Date,
    Time,
    #[serde(alias = "date_time", alias = "timestamp")]
    DateTime,
}

impl FieldType {
    /// Declared SQLite column type
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::Integer | FieldType::Boolean => "INTEGER",
            FieldType::Float => "REAL",
            FieldType::String | FieldType::Text => "TEXT",
            FieldType::Date => "DATE",
            FieldType::Time => "TIME",
            FieldType::DateTime => "TIMESTAMP",
        }
    }

    /// Date, time and datetime fields
    pub fn is_temporal(&self) -> bool {
        matches!(self, FieldType::Date | FieldType::Time | FieldType::DateTime)
    }
}

fn default_nullable() -> bool {
    true
}

/// A primitive (non-association) property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDefinition {
    /// Property name (camelCase)
    pub name: String,
    /// Value type
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// NULL allowed (default: true)
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// UNIQUE constraint; used as the upsert conflict target
    #[serde(default)]
    pub unique: bool,
}

impl FieldDefinition {
    /// Create a nullable, non-unique field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            nullable: true,
            unique: false,
        }
    }

    /// Mark field as NOT NULL (required on create)
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark field as UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Storage column name
    pub fn column_name(&self) -> String {
        to_snake_case(&self.name)
    }
}

/// Association cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    ManyToOne,
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl AssociationKind {
    /// To-many associations hold a list of target ids
    pub fn is_collection(&self) -> bool {
        matches!(self, AssociationKind::OneToMany | AssociationKind::ManyToMany)
    }
}

/// A relationship from one entity type to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationDefinition {
    /// Property name (camelCase)
    pub name: String,
    pub kind: AssociationKind,
    /// Target entity type name
    pub target: String,
    /// Set on the inverse side: the owning property on the target
    #[serde(default)]
    pub mapped_by: Option<String>,
    /// Set on the owning side: the inverse property on the target
    #[serde(default)]
    pub inversed_by: Option<String>,
}

impl AssociationDefinition {
    pub fn new(name: impl Into<String>, kind: AssociationKind, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            mapped_by: None,
            inversed_by: None,
        }
    }

    pub fn many_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, AssociationKind::ManyToOne, target)
    }

    pub fn one_to_one(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, AssociationKind::OneToOne, target)
    }

    /// One-to-many is always the inverse side of a many-to-one on the target
    pub fn one_to_many(
        name: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        Self::new(name, AssociationKind::OneToMany, target).mapped_by(mapped_by)
    }

    pub fn many_to_many(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(name, AssociationKind::ManyToMany, target)
    }

    pub fn mapped_by(mut self, property: impl Into<String>) -> Self {
        self.mapped_by = Some(property.into());
        self
    }

    pub fn inversed_by(mut self, property: impl Into<String>) -> Self {
        self.inversed_by = Some(property.into());
        self
    }

    pub fn is_collection(&self) -> bool {
        self.kind.is_collection()
    }

    /// The owning side stores the link (foreign key column or join table)
    pub fn is_owning_side(&self) -> bool {
        self.mapped_by.is_none() && self.kind != AssociationKind::OneToMany
    }

    /// Owning many-to-one / one-to-one: stored as a `<name>_id` column
    pub fn has_column(&self) -> bool {
        self.is_owning_side() && !self.is_collection()
    }

    /// Owning many-to-many: stored in a join table
    pub fn has_join_table(&self) -> bool {
        self.is_owning_side() && self.kind == AssociationKind::ManyToMany
    }

    /// Foreign key column name for single-valued owning associations
    pub fn column_name(&self) -> String {
        format!("{}_id", to_snake_case(&self.name))
    }

    /// Join table name for owning many-to-many associations
    pub fn join_table_name(&self, owner_table: &str) -> String {
        format!("{}_{}", owner_table, to_snake_case(&self.name))
    }
}

/// A named, declared filter usable from `response` actions
///
/// `filter` is an SQL boolean expression over the entity's columns with `?`
/// placeholders bound positionally from the request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomQuery {
    pub name: String,
    pub filter: String,
    #[serde(default)]
    pub order_by: Option<String>,
}

/// Declared schema of one entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    /// Type name (PascalCase), also the lookup key for actions
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub associations: Vec<AssociationDefinition>,
    /// Supports soft delete through the archive field
    #[serde(default)]
    pub archivable: bool,
    #[serde(default)]
    pub custom_queries: Vec<CustomQuery>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            associations: Vec::new(),
            archivable: false,
            custom_queries: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDefinition) -> Self {
        self.fields.push(field);
        self
    }

    pub fn association(mut self, association: AssociationDefinition) -> Self {
        self.associations.push(association);
        self
    }

    /// Enable soft delete; adds the archive field
    pub fn archivable(mut self) -> Self {
        self.archivable = true;
        self.ensure_archive_field();
        self
    }

    pub fn custom_query(mut self, name: impl Into<String>, filter: impl Into<String>) -> Self {
        self.custom_queries.push(CustomQuery {
            name: name.into(),
            filter: filter.into(),
            order_by: None,
        });
        self
    }

    /// Add the archive field to archivable definitions that lack it
    pub(crate) fn ensure_archive_field(&mut self) {
        if self.archivable && self.field_mapping(ARCHIVE_FIELD).is_none() {
            self.fields
                .push(FieldDefinition::new(ARCHIVE_FIELD, FieldType::Boolean).not_null());
        }
    }

    /// Storage table name
    pub fn table_name(&self) -> String {
        to_snake_case(&self.name)
    }

    /// Service name used by the CSV importer (`<service>.csv`)
    pub fn service_name(&self) -> String {
        self.table_name()
    }

    pub fn association_names(&self) -> Vec<&str> {
        self.associations.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.association_mapping(name).is_some()
    }

    pub fn association_mapping(&self, name: &str) -> Option<&AssociationDefinition> {
        self.associations.iter().find(|a| a.name == name)
    }

    pub fn field_mapping(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.field_mapping(name).is_some()
    }

    pub fn custom_query_named(&self, name: &str) -> Option<&CustomQuery> {
        self.custom_queries.iter().find(|q| q.name == name)
    }

    /// Fields usable as an upsert conflict target
    pub fn unique_fields(&self) -> impl Iterator<Item = &FieldDefinition> {
        self.fields.iter().filter(|f| f.unique)
    }
}
