//! Persistence gateway
//!
//! Stores [`Entity`] records in the tables laid out by
//! [`schema_sync`](crate::db::schema_sync). All reads and writes of one
//! request go through a [`Session`], which lazily opens a SQLite transaction
//! (the unit of work). Nothing is visible to other connections until
//! [`Session::flush`] commits it.

use crate::db::schema_sync::{quote_ident, SchemaSync};
use crate::entity::{Entity, FieldValue, DATETIME_FORMAT, DATE_FORMAT, TIME_FORMAT};
use crate::schema::{AssociationDefinition, EntityDefinition, EntityRegistry, FieldType};
use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Field -> value filter (`{"name": "Ada", "id": [1, 2], "deletedAt": null}`)
pub type Criteria = Map<String, Value>;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

static TABLE_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("table name pattern is valid")
});

/// Sort direction for `order_by`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Parse `{"name": "ASC", "id": "desc"}` into sort keys, keeping order
pub fn parse_order_by(value: &Value) -> Result<Vec<(String, SortDirection)>> {
    let map = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        other => {
            return Err(Error::InvalidInput(format!(
                "orderBy must be an object, got {}",
                other
            )))
        }
    };

    map.iter()
        .map(|(field, direction)| {
            let direction = match direction.as_str().map(str::to_ascii_uppercase).as_deref() {
                Some("ASC") => SortDirection::Asc,
                Some("DESC") => SortDirection::Desc,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "orderBy {}: direction must be ASC or DESC",
                        field
                    )))
                }
            };
            Ok((field.clone(), direction))
        })
        .collect()
}

/// Entry point to storage: schema management and sessions
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    pool: SqlitePool,
    registry: Arc<EntityRegistry>,
}

impl PersistenceGateway {
    pub fn new(pool: SqlitePool, registry: Arc<EntityRegistry>) -> Self {
        Self { pool, registry }
    }

    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Declared metadata of an entity type
    pub fn class_metadata(&self, type_name: &str) -> Result<&EntityDefinition> {
        self.registry.definition(type_name)
    }

    /// Create every entity and join table, then add missing columns
    pub async fn sync_schema(&self) -> Result<()> {
        for definition in self.registry.definitions() {
            SchemaSync::sync_entity(&self.pool, definition).await?;
        }
        info!("Schema synchronized for {} entity types", self.registry.len());
        Ok(())
    }

    /// Open a request-scoped unit of work
    pub fn session(&self) -> Session {
        Session {
            pool: self.pool.clone(),
            registry: Arc::clone(&self.registry),
            tx: None,
        }
    }
}

/// A unit of work over one lazily opened transaction
///
/// Dropping a session without [`flush`](Session::flush) discards its work.
pub struct Session {
    pool: SqlitePool,
    registry: Arc<EntityRegistry>,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl Session {
    pub fn registry(&self) -> &Arc<EntityRegistry> {
        &self.registry
    }

    async fn connection(&mut self) -> Result<&mut SqliteConnection> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(&mut **self.tx.insert(tx))
    }

    /// Repository for one entity type
    pub fn repository(&mut self, type_name: &str) -> Result<Repository<'_>> {
        let definition = self.registry.definition_arc(type_name)?;
        Ok(Repository {
            session: self,
            definition,
        })
    }

    /// Insert or update a record
    ///
    /// New records get their id assigned. A record with a known id, or with a
    /// value for a unique field, replaces the existing row. Owned
    /// many-to-many links are rewritten from the record's links.
    pub async fn persist(&mut self, entity: &mut Entity, flush: bool) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let definition = registry.definition(entity.type_name())?;
        let table = quote_ident(&definition.table_name());

        let mut columns: Vec<String> = Vec::new();
        let mut values: Vec<FieldValue> = Vec::new();
        for field in &definition.fields {
            if let Some(value) = entity.values().get(&field.name) {
                columns.push(field.column_name());
                values.push(value.clone());
            }
        }
        for association in definition.associations.iter().filter(|a| a.has_column()) {
            if entity.links().contains_key(&association.name) {
                columns.push(association.column_name());
                values.push(
                    entity
                        .linked_id(&association.name)
                        .map(FieldValue::Integer)
                        .unwrap_or(FieldValue::Null),
                );
            }
        }

        let conflict_column = match entity.id() {
            Some(_) => Some("id".to_string()),
            None => definition
                .unique_fields()
                .find(|f| !entity.get(&f.name).is_null())
                .map(|f| f.column_name()),
        };

        if let Some(id) = entity.id() {
            columns.insert(0, "id".to_string());
            values.insert(0, FieldValue::Integer(id));
        }

        let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
        let sql = if quoted.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING id", table)
        } else {
            let placeholders = vec!["?"; quoted.len()].join(", ");
            let mut sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                quoted.join(", "),
                placeholders
            );
            if let Some(conflict) = &conflict_column {
                let updates: Vec<String> = columns
                    .iter()
                    .filter(|c| *c != "id" && *c != conflict)
                    .map(|c| format!("{0} = excluded.{0}", quote_ident(c)))
                    .collect();
                if updates.is_empty() {
                    // Touch the conflict column so RETURNING yields the existing row
                    sql.push_str(&format!(
                        " ON CONFLICT({0}) DO UPDATE SET {0} = excluded.{0}",
                        quote_ident(conflict)
                    ));
                } else {
                    sql.push_str(&format!(
                        " ON CONFLICT({}) DO UPDATE SET {}",
                        quote_ident(conflict),
                        updates.join(", ")
                    ));
                }
            }
            sql.push_str(" RETURNING id");
            sql
        };

        let conn = self.connection().await?;
        let mut query = sqlx::query(&sql);
        for value in &values {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(&mut *conn).await?;
        let id: i64 = row.try_get(0)?;
        entity.set_id(Some(id));

        let owner_table = definition.table_name();
        for association in definition.associations.iter().filter(|a| a.has_join_table()) {
            if !entity.links().contains_key(&association.name) {
                continue;
            }
            let join = quote_ident(&association.join_table_name(&owner_table));
            sqlx::query(&format!("DELETE FROM {} WHERE source_id = ?", join))
                .bind(id)
                .execute(&mut *conn)
                .await?;
            for target in entity.linked_ids(&association.name) {
                sqlx::query(&format!(
                    "INSERT OR IGNORE INTO {} (source_id, target_id) VALUES (?, ?)",
                    join
                ))
                .bind(id)
                .bind(*target)
                .execute(&mut *conn)
                .await?;
            }
        }

        debug!("Persisted {} #{}", definition.name, id);

        if flush {
            self.flush().await?;
        }
        Ok(())
    }

    /// Delete a record and every link pointing at it, then commit
    pub async fn remove(&mut self, entity: &Entity) -> Result<()> {
        let registry = Arc::clone(&self.registry);
        let definition = registry.definition(entity.type_name())?;
        let id = entity.id().ok_or_else(|| {
            Error::InvalidInput(format!("{} has not been persisted", definition.name))
        })?;

        let conn = self.connection().await?;

        for owner in registry.definitions() {
            let owner_table = owner.table_name();
            for association in &owner.associations {
                let points_here = association.target.eq_ignore_ascii_case(&definition.name);
                if association.has_join_table() {
                    let join = quote_ident(&association.join_table_name(&owner_table));
                    if owner.name == definition.name {
                        sqlx::query(&format!("DELETE FROM {} WHERE source_id = ?", join))
                            .bind(id)
                            .execute(&mut *conn)
                            .await?;
                    }
                    if points_here {
                        sqlx::query(&format!("DELETE FROM {} WHERE target_id = ?", join))
                            .bind(id)
                            .execute(&mut *conn)
                            .await?;
                    }
                } else if association.has_column() && points_here {
                    let column = quote_ident(&association.column_name());
                    sqlx::query(&format!(
                        "UPDATE {0} SET {1} = NULL WHERE {1} = ?",
                        quote_ident(&owner_table),
                        column
                    ))
                    .bind(id)
                    .execute(&mut *conn)
                    .await?;
                }
            }
        }

        sqlx::query(&format!(
            "DELETE FROM {} WHERE id = ?",
            quote_ident(&definition.table_name())
        ))
        .bind(id)
        .execute(&mut *conn)
        .await?;

        debug!("Removed {} #{}", definition.name, id);
        self.flush().await
    }

    /// Commit staged work; no-op when nothing is staged
    pub async fn flush(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }

    /// Discard staged work
    pub async fn rollback(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }

    /// Empty tables and reset their autoincrement sequences, then commit
    ///
    /// Names must be plain identifiers; tables that do not exist are skipped.
    pub async fn purge_tables(&mut self, tables: &[String]) -> Result<()> {
        for table in tables {
            if !TABLE_NAME.is_match(table) {
                return Err(Error::InvalidInput(format!("Invalid table name: {}", table)));
            }
        }

        let conn = self.connection().await?;
        let has_sequence = table_exists(&mut *conn, "sqlite_sequence").await?;

        for table in tables {
            if !table_exists(&mut *conn, table).await? {
                warn!("Purge skipped: table '{}' does not exist", table);
                continue;
            }
            let deleted = sqlx::query(&format!("DELETE FROM {}", quote_ident(table)))
                .execute(&mut *conn)
                .await?
                .rows_affected();
            if has_sequence {
                sqlx::query("DELETE FROM sqlite_sequence WHERE name = ?")
                    .bind(table)
                    .execute(&mut *conn)
                    .await?;
            }
            info!("Purged {} rows from '{}'", deleted, table);
        }

        self.flush().await
    }
}

/// Queries over one entity type
pub struct Repository<'s> {
    session: &'s mut Session,
    definition: Arc<EntityDefinition>,
}

impl<'s> Repository<'s> {
    pub fn definition(&self) -> &EntityDefinition {
        &self.definition
    }

    /// Records matching `criteria`, sorted and windowed
    pub async fn find_by(
        &mut self,
        criteria: &Criteria,
        order_by: &[(String, SortDirection)],
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Entity>> {
        let (where_sql, mut binds) = build_where(&self.definition, criteria)?;

        let mut order_terms = Vec::new();
        for (property, direction) in order_by {
            let (column, _) = criteria_column(&self.definition, property)?;
            order_terms.push(format!("{} {}", quote_ident(&column), direction.sql()));
        }
        order_terms.push("id ASC".to_string());

        let mut sql = format!(
            "{}{} ORDER BY {}",
            select_sql(&self.definition),
            where_sql,
            order_terms.join(", ")
        );
        if limit.is_some() || offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            binds.push(FieldValue::Integer(limit.unwrap_or(-1)));
            binds.push(FieldValue::Integer(offset.unwrap_or(0)));
        }

        self.fetch(&sql, &binds).await
    }

    /// First record matching `criteria` (lowest id)
    pub async fn find_one_by(&mut self, criteria: &Criteria) -> Result<Option<Entity>> {
        Ok(self.find_by(criteria, &[], Some(1), None).await?.into_iter().next())
    }

    pub async fn find(&mut self, id: i64) -> Result<Option<Entity>> {
        let mut criteria = Criteria::new();
        criteria.insert("id".to_string(), Value::from(id));
        self.find_one_by(&criteria).await
    }

    pub async fn find_all(&mut self) -> Result<Vec<Entity>> {
        self.find_by(&Criteria::new(), &[], None, None).await
    }

    pub async fn count_by(&mut self, criteria: &Criteria) -> Result<i64> {
        let (where_sql, binds) = build_where(&self.definition, criteria)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_ident(&self.definition.table_name()),
            where_sql
        );

        let conn = self.session.connection().await?;
        let mut query = sqlx::query(&sql);
        for value in &binds {
            query = bind_value(query, value);
        }
        let row = query.fetch_one(&mut *conn).await?;
        Ok(row.try_get(0)?)
    }

    /// Run a declared custom query with positional parameters
    pub async fn custom(&mut self, name: &str, params: &[Value]) -> Result<Vec<Entity>> {
        let query = self.definition.custom_query_named(name).ok_or_else(|| {
            Error::NotFound(format!("Custom query {}.{}", self.definition.name, name))
        })?;

        let order = query.order_by.clone().unwrap_or_else(|| "id ASC".to_string());
        let sql = format!(
            "{} WHERE ({}) ORDER BY {}",
            select_sql(&self.definition),
            query.filter,
            order
        );
        let binds: Vec<FieldValue> = params.iter().map(json_param).collect::<Result<_>>()?;

        self.fetch(&sql, &binds).await
    }

    async fn fetch(&mut self, sql: &str, binds: &[FieldValue]) -> Result<Vec<Entity>> {
        let registry = Arc::clone(&self.session.registry);
        let definition = Arc::clone(&self.definition);
        let conn = self.session.connection().await?;

        let mut query = sqlx::query(sql);
        for value in binds {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&mut *conn).await?;

        let mut entities = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut entity = entity_from_row(&definition, row)?;
            load_links(&mut *conn, &registry, &definition, &mut entity).await?;
            entities.push(entity);
        }
        Ok(entities)
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &FieldValue) -> SqliteQuery<'q> {
    match value {
        FieldValue::Null => query.bind(None::<i64>),
        FieldValue::Integer(i) => query.bind(*i),
        FieldValue::Float(f) => query.bind(*f),
        FieldValue::Boolean(b) => query.bind(*b as i64),
        FieldValue::String(s) => query.bind(s.clone()),
        FieldValue::Date(d) => query.bind(d.format(DATE_FORMAT).to_string()),
        FieldValue::Time(t) => query.bind(t.format(TIME_FORMAT).to_string()),
        FieldValue::DateTime(dt) => query.bind(dt.format(DATETIME_FORMAT).to_string()),
    }
}

/// Untyped custom query parameter
fn json_param(value: &Value) -> Result<FieldValue> {
    match value {
        Value::Null => Ok(FieldValue::Null),
        Value::Bool(b) => Ok(FieldValue::Integer(*b as i64)),
        Value::Number(n) => Ok(n
            .as_i64()
            .map(FieldValue::Integer)
            .or_else(|| n.as_f64().map(FieldValue::Float))
            .unwrap_or(FieldValue::Null)),
        Value::String(s) => Ok(FieldValue::String(s.clone())),
        other => Err(Error::InvalidInput(format!(
            "Custom query parameters must be scalars, got {}",
            other
        ))),
    }
}

async fn table_exists(conn: &mut SqliteConnection, table: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)",
    )
    .bind(table)
    .fetch_one(conn)
    .await?;
    Ok(exists)
}

/// `SELECT id, <fields>, <fk columns> FROM <table>`
fn select_sql(definition: &EntityDefinition) -> String {
    let mut columns = vec!["id".to_string()];
    columns.extend(definition.fields.iter().map(|f| quote_ident(&f.column_name())));
    columns.extend(
        definition
            .associations
            .iter()
            .filter(|a| a.has_column())
            .map(|a| quote_ident(&a.column_name())),
    );
    format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(&definition.table_name())
    )
}

/// Column and type used to filter or sort on a property
fn criteria_column(definition: &EntityDefinition, property: &str) -> Result<(String, FieldType)> {
    if property == "id" {
        return Ok(("id".to_string(), FieldType::Integer));
    }
    if let Some(field) = definition.field_mapping(property) {
        return Ok((field.column_name(), field.field_type));
    }
    match definition.association_mapping(property) {
        Some(association) if association.has_column() => {
            Ok((association.column_name(), FieldType::Integer))
        }
        Some(association) => Err(Error::UnsupportedOperation(format!(
            "{}.{} is not stored on {} and cannot be filtered",
            definition.name, association.name, definition.name
        ))),
        None => Err(Error::InvalidField(format!(
            "{} has no field {}",
            definition.name, property
        ))),
    }
}

fn criteria_value(
    definition: &EntityDefinition,
    property: &str,
    value: &Value,
    field_type: FieldType,
) -> Result<FieldValue> {
    // Association criteria may pass the target record itself
    let value = match value {
        Value::Object(map) if map.contains_key("id") => &map["id"],
        other => other,
    };
    FieldValue::from_json(value, field_type).ok_or_else(|| {
        Error::InvalidInput(format!(
            "{}.{}: {} is not a valid {:?} value",
            definition.name, property, value, field_type
        ))
    })
}

fn build_where(
    definition: &EntityDefinition,
    criteria: &Criteria,
) -> Result<(String, Vec<FieldValue>)> {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for (property, value) in criteria {
        let (column, field_type) = criteria_column(definition, property)?;
        let column = quote_ident(&column);

        match value {
            Value::Null => clauses.push(format!("{} IS NULL", column)),
            Value::Array(items) => {
                let values: Vec<FieldValue> = items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| criteria_value(definition, property, item, field_type))
                    .collect::<Result<_>>()?;
                if values.is_empty() {
                    clauses.push("0 = 1".to_string());
                } else {
                    clauses.push(format!(
                        "{} IN ({})",
                        column,
                        vec!["?"; values.len()].join(", ")
                    ));
                    binds.extend(values);
                }
            }
            scalar => {
                clauses.push(format!("{} = ?", column));
                binds.push(criteria_value(definition, property, scalar, field_type)?);
            }
        }
    }

    if clauses.is_empty() {
        Ok((String::new(), binds))
    } else {
        Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
    }
}

fn decode_field(row: &SqliteRow, index: usize, field_type: FieldType) -> Result<FieldValue> {
    let value = match field_type {
        FieldType::Integer => match row.try_get::<Option<i64>, _>(index) {
            Ok(v) => v.map(FieldValue::Integer),
            Err(_) => row
                .try_get::<Option<f64>, _>(index)?
                .map(|f| FieldValue::Integer(f as i64)),
        },
        FieldType::Float => match row.try_get::<Option<f64>, _>(index) {
            Ok(v) => v.map(FieldValue::Float),
            Err(_) => row
                .try_get::<Option<i64>, _>(index)?
                .map(|i| FieldValue::Float(i as f64)),
        },
        FieldType::Boolean => match row.try_get::<Option<i64>, _>(index) {
            Ok(v) => v.map(|i| FieldValue::Boolean(i != 0)),
            Err(_) => row
                .try_get::<Option<String>, _>(index)?
                .and_then(|s| FieldValue::parse_text(&s, FieldType::Boolean)),
        },
        FieldType::String | FieldType::Text => match row.try_get::<Option<String>, _>(index) {
            Ok(v) => v.map(FieldValue::String),
            Err(_) => match row.try_get::<Option<i64>, _>(index) {
                Ok(v) => v.map(|i| FieldValue::String(i.to_string())),
                Err(_) => row
                    .try_get::<Option<f64>, _>(index)?
                    .map(|f| FieldValue::String(f.to_string())),
            },
        },
        FieldType::Date | FieldType::Time | FieldType::DateTime => {
            match row.try_get::<Option<String>, _>(index) {
                Ok(v) => v.and_then(|s| FieldValue::parse_text(&s, field_type)),
                Err(_) => row
                    .try_get::<Option<i64>, _>(index)?
                    .and_then(|secs| FieldValue::parse_text(&secs.to_string(), field_type)),
            }
        }
    };
    Ok(value.unwrap_or(FieldValue::Null))
}

fn entity_from_row(definition: &EntityDefinition, row: &SqliteRow) -> Result<Entity> {
    let mut entity = Entity::new(definition.name.clone());
    entity.set_id(Some(row.try_get::<i64, _>(0)?));

    let mut index = 1;
    for field in &definition.fields {
        entity.set(field.name.clone(), decode_field(row, index, field.field_type)?);
        index += 1;
    }
    for association in definition.associations.iter().filter(|a| a.has_column()) {
        entity.set_link(association.name.clone(), row.try_get::<Option<i64>, _>(index)?);
        index += 1;
    }

    Ok(entity)
}

/// SQL returning the target ids of an association not stored on the row
fn link_sql(
    registry: &EntityRegistry,
    definition: &EntityDefinition,
    association: &AssociationDefinition,
) -> Result<String> {
    if association.has_join_table() {
        let join = association.join_table_name(&definition.table_name());
        return Ok(format!(
            "SELECT target_id FROM {} WHERE source_id = ? ORDER BY rowid",
            quote_ident(&join)
        ));
    }

    let mapped_by = association.mapped_by.as_deref().ok_or_else(|| {
        Error::Internal(format!(
            "{}.{} has no storage",
            definition.name, association.name
        ))
    })?;
    let target = registry.definition(&association.target)?;
    let owning = target.association_mapping(mapped_by).ok_or_else(|| {
        Error::Internal(format!(
            "{}.{}: mapped_by {} missing on {}",
            definition.name, association.name, mapped_by, target.name
        ))
    })?;

    if owning.has_join_table() {
        let join = owning.join_table_name(&target.table_name());
        Ok(format!(
            "SELECT source_id FROM {} WHERE target_id = ? ORDER BY rowid",
            quote_ident(&join)
        ))
    } else {
        Ok(format!(
            "SELECT id FROM {} WHERE {} = ? ORDER BY id",
            quote_ident(&target.table_name()),
            quote_ident(&owning.column_name())
        ))
    }
}

async fn load_links(
    conn: &mut SqliteConnection,
    registry: &EntityRegistry,
    definition: &EntityDefinition,
    entity: &mut Entity,
) -> Result<()> {
    let Some(id) = entity.id() else {
        return Ok(());
    };

    for association in definition.associations.iter().filter(|a| !a.has_column()) {
        let sql = link_sql(registry, definition, association)?;
        let ids: Vec<i64> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_all(&mut *conn)
            .await?;

        if association.is_collection() {
            entity.set_links(association.name.clone(), ids);
        } else {
            entity.set_link(association.name.clone(), ids.first().copied());
        }
    }
    Ok(())
}
