//! Schema Synchronization
//!
//! Derives table schemas from entity definitions and keeps the database in
//! line with them. Two phases run per table:
//! 1. **CREATE TABLE IF NOT EXISTS** - create missing tables
//! 2. **Auto-Sync** - add missing columns via ALTER TABLE
//!
//! Type and constraint drift is detected and logged but never auto-fixed,
//! except UNIQUE: a unique column on an existing table is backed by a unique
//! index so it can serve as an upsert conflict target.
//!
//! # Layout
//!
//! - entity table `snake_case(Type)`: `id INTEGER PRIMARY KEY AUTOINCREMENT`,
//!   one column per field, `<name>_id` per owning single-valued association
//! - join table `<owner table>_<association>` per owning many-to-many:
//!   `(source_id, target_id)` composite primary key

use crate::schema::{EntityDefinition, FieldType, ARCHIVE_FIELD};
use crate::Result;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

/// Quote an identifier; entity and field names may be SQL keywords (`order`)
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column definition with SQL constraints
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    /// Column name
    pub name: String,
    /// SQL type (e.g., "TEXT", "INTEGER", "REAL", "TIMESTAMP")
    pub sql_type: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// PRIMARY KEY constraint
    pub primary_key: bool,
    /// AUTOINCREMENT on an INTEGER PRIMARY KEY
    pub autoincrement: bool,
    /// UNIQUE constraint
    pub unique: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create new column definition
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            not_null: false,
            primary_key: false,
            autoincrement: false,
            unique: false,
            default_value: None,
        }
    }

    /// Mark column as PRIMARY KEY
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Mark column as AUTOINCREMENT (implies PRIMARY KEY)
    pub fn autoincrement(mut self) -> Self {
        self.primary_key = true;
        self.autoincrement = true;
        self
    }

    /// Mark column as NOT NULL
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    /// Mark column as UNIQUE
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set DEFAULT value
    pub fn default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    fn create_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.sql_type);
        if self.primary_key {
            sql.push_str(" PRIMARY KEY");
            if self.autoincrement {
                sql.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null && !self.primary_key {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default_value {
            sql.push_str(&format!(" DEFAULT {}", default));
        }
        sql
    }
}

/// Expected schema of one table
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    /// Columns in creation order
    pub columns: Vec<ColumnDefinition>,
    /// Composite primary key (join tables)
    pub composite_key: Vec<String>,
}

impl TableSchema {
    /// Entity table for a definition
    pub fn for_entity(definition: &EntityDefinition) -> Self {
        let mut columns = vec![ColumnDefinition::new("id", "INTEGER").autoincrement()];

        for field in &definition.fields {
            let mut column = ColumnDefinition::new(field.column_name(), field.field_type.sql_type());
            if !field.nullable {
                column = column.not_null();
            }
            if field.unique {
                column = column.unique();
            }
            if field.name == ARCHIVE_FIELD && field.field_type == FieldType::Boolean {
                column = column.default("0");
            }
            columns.push(column);
        }

        for association in definition.associations.iter().filter(|a| a.has_column()) {
            columns.push(ColumnDefinition::new(association.column_name(), "INTEGER"));
        }

        Self {
            name: definition.table_name(),
            columns,
            composite_key: Vec::new(),
        }
    }

    /// Join tables owned by a definition
    pub fn join_tables(definition: &EntityDefinition) -> Vec<Self> {
        let owner = definition.table_name();
        definition
            .associations
            .iter()
            .filter(|a| a.has_join_table())
            .map(|a| Self {
                name: a.join_table_name(&owner),
                columns: vec![
                    ColumnDefinition::new("source_id", "INTEGER").not_null(),
                    ColumnDefinition::new("target_id", "INTEGER").not_null(),
                ],
                composite_key: vec!["source_id".to_string(), "target_id".to_string()],
            })
            .collect()
    }

    /// CREATE TABLE IF NOT EXISTS statement
    pub fn create_sql(&self) -> String {
        let mut parts: Vec<String> = self.columns.iter().map(ColumnDefinition::create_sql).collect();
        if !self.composite_key.is_empty() {
            parts.push(format!("PRIMARY KEY ({})", self.composite_key.join(", ")));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            quote_ident(&self.name),
            parts.join(",\n    ")
        )
    }
}

/// Actual column from database introspection (PRAGMA table_info result)
#[derive(Debug, Clone)]
pub struct ActualColumn {
    /// Column ID (position in table)
    pub cid: i32,
    /// Column name
    pub name: String,
    /// SQL type from PRAGMA table_info
    pub type_name: String,
    /// NOT NULL constraint
    pub not_null: bool,
    /// DEFAULT value
    pub default_value: Option<String>,
    /// PRIMARY KEY flag
    pub pk: bool,
}

/// Schema drift detected between expected and actual schema
#[derive(Debug, Clone)]
pub enum SchemaDrift {
    /// Column missing from database
    MissingColumn {
        table: String,
        column: ColumnDefinition,
    },
    /// Column type mismatch (cannot auto-fix)
    TypeMismatch {
        table: String,
        column: String,
        expected: String,
        actual: String,
    },
    /// Constraint mismatch (cannot auto-fix)
    ConstraintMismatch {
        table: String,
        column: String,
        constraint: String,
    },
}

/// Schema introspection - read actual database schema
pub struct SchemaIntrospector;

impl SchemaIntrospector {
    /// Read actual columns using PRAGMA table_info, ordered by cid
    pub async fn introspect_table(pool: &SqlitePool, table_name: &str) -> Result<Vec<ActualColumn>> {
        let query = format!("PRAGMA table_info({})", quote_ident(table_name));
        let rows = sqlx::query(&query).fetch_all(pool).await?;

        let mut columns: Vec<ActualColumn> = rows
            .iter()
            .map(|row| ActualColumn {
                cid: row.get("cid"),
                name: row.get("name"),
                type_name: row.get("type"),
                not_null: row.get::<i32, _>("notnull") != 0,
                default_value: row.get("dflt_value"),
                pk: row.get::<i32, _>("pk") != 0,
            })
            .collect();

        columns.sort_by_key(|c| c.cid);

        Ok(columns)
    }

    /// Check if table exists
    pub async fn table_exists(pool: &SqlitePool, table_name: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sqlite_master
                WHERE type='table' AND name = ?
            )
            "#,
        )
        .bind(table_name)
        .fetch_one(pool)
        .await?;

        Ok(exists)
    }

    /// Columns covered by a single-column unique index (inline UNIQUE included)
    pub async fn unique_columns(pool: &SqlitePool, table_name: &str) -> Result<Vec<String>> {
        let columns: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT ii.name
            FROM pragma_index_list(?) AS il
            JOIN pragma_index_info(il.name) AS ii
            WHERE il."unique" = 1
            GROUP BY il.name
            HAVING COUNT(*) = 1
            "#,
        )
        .bind(table_name)
        .fetch_all(pool)
        .await?;

        Ok(columns)
    }
}

/// Schema comparison - detect drift between expected and actual
pub struct SchemaDiff;

impl SchemaDiff {
    /// Compare expected schema to actual database schema
    pub fn compare(
        table_name: &str,
        expected: &[ColumnDefinition],
        actual: &[ActualColumn],
    ) -> Vec<SchemaDrift> {
        let mut drift = Vec::new();

        for expected_col in expected {
            match actual.iter().find(|c| c.name == expected_col.name) {
                Some(actual_col) => {
                    if !Self::types_compatible(&expected_col.sql_type, &actual_col.type_name) {
                        drift.push(SchemaDrift::TypeMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            expected: expected_col.sql_type.clone(),
                            actual: actual_col.type_name.clone(),
                        });
                    }

                    if expected_col.not_null && !expected_col.primary_key && !actual_col.not_null {
                        drift.push(SchemaDrift::ConstraintMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            constraint: "NOT NULL".to_string(),
                        });
                    }

                    if expected_col.primary_key && !actual_col.pk {
                        drift.push(SchemaDrift::ConstraintMismatch {
                            table: table_name.to_string(),
                            column: expected_col.name.clone(),
                            constraint: "PRIMARY KEY".to_string(),
                        });
                    }
                }
                None => drift.push(SchemaDrift::MissingColumn {
                    table: table_name.to_string(),
                    column: expected_col.clone(),
                }),
            }
        }

        drift
    }

    /// Check if SQL types share a SQLite type affinity
    fn types_compatible(expected: &str, actual: &str) -> bool {
        let exp = expected.to_uppercase();
        let act = actual.to_uppercase();

        if exp == act {
            return true;
        }

        let integer = |t: &str| t.contains("INT");
        let text = |t: &str| t.contains("TEXT") || t.contains("CHAR") || t.contains("CLOB");
        let real = |t: &str| t.contains("REAL") || t.contains("FLOA") || t.contains("DOUB");
        let temporal = |t: &str| t.contains("DATE") || t.contains("TIME");

        (integer(&exp) && integer(&act))
            || (text(&exp) && text(&act))
            || (real(&exp) && real(&act))
            || (temporal(&exp) && (temporal(&act) || text(&act)))
    }
}

/// Schema synchronization - apply schema changes to database
pub struct SchemaSync;

impl SchemaSync {
    /// Create the table if missing, then add missing columns
    ///
    /// Type changes, constraint changes and column removal are logged and
    /// left for a manual migration.
    pub async fn sync_table(pool: &SqlitePool, schema: &TableSchema) -> Result<()> {
        let table_name = schema.name.as_str();

        if !SchemaIntrospector::table_exists(pool, table_name).await? {
            sqlx::query(&schema.create_sql()).execute(pool).await?;
            info!("Schema sync: created table '{}'", table_name);
            return Ok(());
        }

        let actual = SchemaIntrospector::introspect_table(pool, table_name).await?;
        let drift = SchemaDiff::compare(table_name, &schema.columns, &actual);

        if drift.is_empty() {
            debug!("Schema sync: '{}' columns up to date", table_name);
        }

        for change in drift {
            match change {
                SchemaDrift::MissingColumn { table, column } => {
                    Self::add_column(pool, &table, &column).await?;
                }
                SchemaDrift::TypeMismatch { table, column, expected, actual } => {
                    warn!(
                        "Type mismatch in {}.{}: expected '{}', found '{}'. Manual migration required.",
                        table, column, expected, actual
                    );
                }
                SchemaDrift::ConstraintMismatch { table, column, constraint } => {
                    warn!(
                        "Constraint mismatch in {}.{}: missing '{}'. Manual migration required.",
                        table, column, constraint
                    );
                }
            }
        }

        Self::ensure_unique_indexes(pool, schema).await
    }

    /// Back every UNIQUE column of an existing table with a unique index
    ///
    /// Fails when stored rows already hold duplicate values.
    async fn ensure_unique_indexes(pool: &SqlitePool, schema: &TableSchema) -> Result<()> {
        let existing = SchemaIntrospector::unique_columns(pool, &schema.name).await?;

        for column in schema.columns.iter().filter(|c| c.unique && !c.primary_key) {
            if existing.contains(&column.name) {
                continue;
            }

            let index = format!("uq_{}_{}", schema.name, column.name);
            let sql = format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {} ({})",
                quote_ident(&index),
                quote_ident(&schema.name),
                quote_ident(&column.name)
            );
            sqlx::query(&sql).execute(pool).await?;
            info!("Schema sync: created unique index {} on {}.{}", index, schema.name, column.name);
        }

        Ok(())
    }

    /// Add missing column to table via ALTER TABLE ADD COLUMN
    async fn add_column(pool: &SqlitePool, table: &str, column: &ColumnDefinition) -> Result<()> {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            quote_ident(table),
            quote_ident(&column.name),
            column.sql_type
        );

        // SQLite cannot add PRIMARY KEY or UNIQUE columns, nor NOT NULL without a default.
        // UNIQUE is restored by ensure_unique_indexes.
        if column.primary_key {
            warn!(
                "Cannot add PRIMARY KEY column {}.{} via ALTER TABLE; adding it unconstrained",
                table, column.name
            );
        }

        match (&column.default_value, column.not_null) {
            (Some(default), true) => sql.push_str(&format!(" NOT NULL DEFAULT {}", default)),
            (Some(default), false) => sql.push_str(&format!(" DEFAULT {}", default)),
            (None, true) => warn!(
                "Cannot add NOT NULL column {}.{} without DEFAULT value; column will be nullable",
                table, column.name
            ),
            (None, false) => {}
        }

        info!("Schema sync: adding column {}.{} ({})", table, column.name, column.sql_type);

        match sqlx::query(&sql).execute(pool).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                debug!("Column {}.{} already added", table, column.name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create or update the entity table and join tables of a definition
    pub async fn sync_entity(pool: &SqlitePool, definition: &EntityDefinition) -> Result<()> {
        Self::sync_table(pool, &TableSchema::for_entity(definition)).await?;
        for join_table in TableSchema::join_tables(definition) {
            Self::sync_table(pool, &join_table).await?;
        }
        Ok(())
    }
}
