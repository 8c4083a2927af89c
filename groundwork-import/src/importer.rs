//! CSV bulk import
//!
//! [`CsvImporter::run`] plans the configured services, then imports each
//! planned file in order through one session. Every row becomes one record:
//! headers are matched to properties, cells are coerced and assigned through
//! setter accessors, owning associations are taken from id cells, and the
//! record is wired to parents imported earlier in the run.
//!
//! Work is flushed every [`FLUSH_EVERY`] rows and at the end of each file.
//! The first format or persistence error stops the import; batches flushed
//! before it stay committed.

use crate::coerce::{coerce_cell, parse_ids, repair_utf8, CellRef};
use crate::plan::{ChildLinkSpec, ImportPlan, PlannedService};
use crate::source::ServiceFiles;
use groundwork_common::config::ServiceNode;
use groundwork_common::db::{PersistenceGateway, Session};
use groundwork_common::introspect::PropertyKind;
use groundwork_common::naming::to_camel_case;
use groundwork_common::schema::ARCHIVE_FIELD;
use groundwork_common::{
    AccessorArgument, AccessorKind, Entity, EntityDefinition, EntityDescriptor, Error, FieldType,
    FieldValue, Result,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rows persisted between flushes
pub const FLUSH_EVERY: usize = 25;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Outcome of one imported file
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub service: String,
    pub entity: String,
    pub rows: usize,
    /// Parent links wired from back-reference cells
    pub links: usize,
}

/// Outcome of a whole import run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub files: Vec<FileReport>,
    /// Tables emptied before importing
    pub purged: Vec<String>,
}

impl ImportReport {
    pub fn rows(&self) -> usize {
        self.files.iter().map(|f| f.rows).sum()
    }
}

/// Imports `<service>.csv` files from one directory
#[derive(Debug, Clone)]
pub struct CsvImporter {
    gateway: PersistenceGateway,
    directory: PathBuf,
    services: Vec<ServiceNode>,
    purge_tables: Vec<String>,
}

impl CsvImporter {
    pub fn new(
        gateway: PersistenceGateway,
        directory: impl Into<PathBuf>,
        services: Vec<ServiceNode>,
    ) -> Self {
        Self {
            gateway,
            directory: directory.into(),
            services,
            purge_tables: Vec::new(),
        }
    }

    /// Tables emptied by `run(true)`
    pub fn with_purge_tables(mut self, tables: Vec<String>) -> Self {
        self.purge_tables = tables;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Plan without importing
    pub fn plan(&self) -> Result<ImportPlan> {
        let files = ServiceFiles::discover(&self.directory)?;
        ImportPlan::build(self.gateway.registry(), &files, &self.services)
    }

    /// Import every planned service
    ///
    /// With `drop_tables` the configured purge tables are emptied first.
    pub async fn run(&self, drop_tables: bool) -> Result<ImportReport> {
        let plan = self.plan()?;
        info!(
            "Importing {} services from {}",
            plan.steps.len(),
            self.directory.display()
        );

        let mut run = ImportRun {
            importer: self,
            plan: &plan,
            session: self.gateway.session(),
            parent_ids: HashMap::new(),
        };
        let mut report = ImportReport::default();

        if drop_tables {
            if self.purge_tables.is_empty() {
                warn!("--drop-tables given but no tables are configured to purge");
            } else {
                run.session.purge_tables(&self.purge_tables).await?;
                report.purged = self.purge_tables.clone();
            }
        }

        for (index, step) in plan.steps.iter().enumerate() {
            match run.import_file(index, step).await {
                Ok(file) => report.files.push(file),
                Err(e) => {
                    warn!("Import of {} aborted: {}", step.path.display(), e);
                    if let Err(rollback) = run.session.rollback().await {
                        warn!("Rollback failed: {}", rollback);
                    }
                    return Err(e);
                }
            }
        }

        info!(
            "Import complete: {} rows from {} files",
            report.rows(),
            report.files.len()
        );
        Ok(report)
    }
}

/// What a CSV column feeds
#[derive(Debug, Clone, PartialEq)]
enum ColumnTarget {
    Id,
    Field { property: String, field_type: FieldType },
    /// Stored association: `<id>` or `<id>|<id>` for collections
    Owning { property: String, collection: bool },
    /// Inverse association, only used through child links
    Inverse,
    Ignored,
}

#[derive(Debug, Clone)]
struct Column {
    header: String,
    target: ColumnTarget,
    links: Vec<ChildLinkSpec>,
}

/// State of one `run`
///
/// Records are not kept across flushes. Only the ids of types that a later
/// step links back to are remembered, and only until that step is done.
struct ImportRun<'a> {
    importer: &'a CsvImporter,
    plan: &'a ImportPlan,
    session: Session,
    /// Parent type name -> ids imported in this run
    parent_ids: HashMap<String, HashSet<i64>>,
}

impl ImportRun<'_> {
    async fn import_file(&mut self, index: usize, step: &PlannedService) -> Result<FileReport> {
        let registry = self.importer.gateway.registry().clone();
        let definition = registry.definition(&step.type_name)?;
        let descriptor = registry.descriptor(&step.type_name)?;
        let file = step.path.display().to_string();

        let bytes = tokio::fs::read(&step.path).await?;
        let data = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(data);

        let headers: Vec<String> = reader
            .byte_headers()
            .map_err(|e| Error::Format(format!("{}: unreadable header: {}", file, e)))?
            .iter()
            .map(|header| {
                let cell = CellRef {
                    file: &file,
                    row: 1,
                    column: "",
                };
                repair_utf8(header, cell).trim().to_string()
            })
            .collect();
        let columns = self.bind_columns(&file, definition, descriptor, &headers)?;
        let track_ids = self.plan.parent_needed_after(&definition.name, index);

        let mut rows = 0;
        let mut links = 0;
        for (position, result) in reader.byte_records().enumerate() {
            let row = position as u64 + 2;
            let record = result
                .map_err(|e| Error::Format(format!("{} row {}: {}", file, row, e)))?;

            let mut entity = registry.instantiate(&definition.name)?;
            if definition.archivable {
                entity.set(ARCHIVE_FIELD, FieldValue::Boolean(false));
            }

            let mut back_references: Vec<(&ChildLinkSpec, Vec<i64>)> = Vec::new();
            for (column, raw) in columns.iter().zip(record.iter()) {
                let cell = CellRef {
                    file: &file,
                    row,
                    column: &column.header,
                };
                let text = repair_utf8(raw, cell);
                assign_cell(&mut entity, descriptor, column, &text, cell)?;

                if !column.links.is_empty() {
                    let ids = parse_ids(&text, cell);
                    for link in &column.links {
                        back_references.push((link, ids.clone()));
                    }
                }
            }

            self.session.persist(&mut entity, false).await?;
            for (link, parent_ids) in back_references {
                links += self.wire_parents(link, &entity, &parent_ids).await?;
            }

            let id = entity
                .id()
                .ok_or_else(|| Error::Internal(format!("{} row without id", definition.name)))?;
            debug!("Imported {} #{} from row {}", definition.name, id, row);
            if track_ids {
                self.parent_ids
                    .entry(definition.name.clone())
                    .or_default()
                    .insert(id);
            }

            rows += 1;
            if rows % FLUSH_EVERY == 0 {
                self.session.flush().await?;
            }
        }
        self.session.flush().await?;

        let plan = self.plan;
        self.parent_ids
            .retain(|parent_type, _| plan.parent_needed_after(parent_type, index));

        info!("Imported {} rows into {} from {}", rows, definition.name, file);
        Ok(FileReport {
            service: step.service.clone(),
            entity: definition.name.clone(),
            rows,
            links,
        })
    }

    /// Match header cells to properties
    fn bind_columns(
        &self,
        file: &str,
        definition: &EntityDefinition,
        descriptor: &EntityDescriptor,
        headers: &[String],
    ) -> Result<Vec<Column>> {
        if headers.is_empty() {
            return Err(Error::Format(format!("{}: missing header row", file)));
        }

        let mut columns: Vec<Column> = Vec::with_capacity(headers.len());
        for (index, header) in headers.iter().enumerate() {
            if header.is_empty() {
                return Err(Error::Format(format!(
                    "{}: column {} has an empty header",
                    file,
                    index + 1
                )));
            }
            if columns.iter().any(|c| c.header.eq_ignore_ascii_case(header)) {
                return Err(Error::Format(format!(
                    "{}: duplicate column '{}'",
                    file, header
                )));
            }

            let property = descriptor
                .property(header)
                .or_else(|| descriptor.property(&to_camel_case(header)));
            let (target, links) = match property {
                None => {
                    warn!(
                        "{}: column '{}' matches no property of {}, ignored",
                        file, header, definition.name
                    );
                    (ColumnTarget::Ignored, Vec::new())
                }
                Some(property) => {
                    let links: Vec<ChildLinkSpec> = self
                        .plan
                        .links_for_child(&definition.name)
                        .filter(|link| link.child_property == property.name)
                        .cloned()
                        .collect();
                    let target = match &property.kind {
                        PropertyKind::Id => ColumnTarget::Id,
                        PropertyKind::Field(field_type) => ColumnTarget::Field {
                            property: property.name.clone(),
                            field_type: *field_type,
                        },
                        PropertyKind::Single(_) | PropertyKind::Collection(_) => {
                            match definition.association_mapping(&property.name) {
                                Some(association) if association.is_owning_side() => {
                                    ColumnTarget::Owning {
                                        property: property.name.clone(),
                                        collection: association.is_collection(),
                                    }
                                }
                                _ => ColumnTarget::Inverse,
                            }
                        }
                    };
                    (target, links)
                }
            };

            columns.push(Column {
                header: header.clone(),
                target,
                links,
            });
        }

        Ok(columns)
    }

    /// Attach `child` to each imported parent named by a back-reference cell
    ///
    /// Returns the number of links added.
    async fn wire_parents(
        &mut self,
        link: &ChildLinkSpec,
        child: &Entity,
        parent_ids: &[i64],
    ) -> Result<usize> {
        let registry = self.importer.gateway.registry().clone();
        let accessor = registry
            .descriptor(&link.parent_type)?
            .accessor_for(&link.parent_property, link.parent_accessor)?;

        let mut wired = 0;
        for id in parent_ids {
            let imported = self
                .parent_ids
                .get(&link.parent_type)
                .is_some_and(|ids| ids.contains(id));
            if !imported {
                debug!(
                    "{} #{} not imported in this run, {} link skipped",
                    link.parent_type, id, link.parent_property
                );
                continue;
            }

            // An inverse parent is linked by the child's own column
            if !link.parent_owns_link {
                if child.linked_id(&link.child_property) == Some(*id) {
                    wired += 1;
                }
                continue;
            }

            let Some(mut parent) = self.session.repository(&link.parent_type)?.find(*id).await?
            else {
                continue;
            };
            if accessor.apply(&mut parent, AccessorArgument::Entity(child))? {
                wired += 1;
                self.session.persist(&mut parent, false).await?;
            }
        }
        Ok(wired)
    }
}

/// Store one cell on the record
fn assign_cell(
    entity: &mut Entity,
    descriptor: &EntityDescriptor,
    column: &Column,
    text: &str,
    cell: CellRef<'_>,
) -> Result<()> {
    match &column.target {
        ColumnTarget::Id => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(());
            }
            match text.parse::<i64>() {
                Ok(id) => entity.set_id(Some(id)),
                Err(_) => warn!(
                    "{} row {}: '{}' is not an id, a new id is assigned",
                    cell.file, cell.row, text
                ),
            }
        }
        ColumnTarget::Field {
            property,
            field_type,
        } => {
            let value = coerce_cell(text, *field_type, cell);
            descriptor
                .accessor_for(property, AccessorKind::Set)?
                .apply(entity, AccessorArgument::Value(&value))?;
        }
        ColumnTarget::Owning {
            property,
            collection: true,
        } => {
            let add = descriptor.accessor_for(property, AccessorKind::Add)?;
            entity.set_links(property.clone(), Vec::new());
            for id in parse_ids(text, cell) {
                add.apply(entity, AccessorArgument::Value(&FieldValue::Integer(id)))?;
            }
        }
        ColumnTarget::Owning {
            property,
            collection: false,
        } => {
            let ids = parse_ids(text, cell);
            if ids.len() > 1 {
                warn!(
                    "{} row {} column '{}': single association names {} ids, using {}",
                    cell.file,
                    cell.row,
                    cell.column,
                    ids.len(),
                    ids[0]
                );
            }
            let value = ids
                .first()
                .map(|id| FieldValue::Integer(*id))
                .unwrap_or(FieldValue::Null);
            descriptor
                .accessor_for(property, AccessorKind::Set)?
                .apply(entity, AccessorArgument::Value(&value))?;
        }
        ColumnTarget::Inverse | ColumnTarget::Ignored => {}
    }
    Ok(())
}
