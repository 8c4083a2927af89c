use super::ActionDispatcher;
use crate::context::RequestContext;
use crate::document::RecordEntry;
use crate::output::{entities_to_json, entity_to_json, OutputFilter};
use crate::pagination::calculate_pagination;
use groundwork_common::db::gateway::{parse_order_by, Criteria, SortDirection};
use groundwork_common::introspect::{AccessorValue, PropertyKind};
use groundwork_common::{AccessorKind, Entity, EntityDefinition, Error, FieldValue, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use tracing::debug;

/// How a `response` entry selects its records
#[derive(Debug, Clone, PartialEq)]
enum RequestShape {
    /// `"recordKey"` or `"recordKey.association[.association]"`
    Getter(String),
    Find(i64),
    FindOneBy(Criteria),
    FindAll,
    FindBy(Criteria),
    Custom { name: String, params: Vec<Value> },
}

const SHAPES: [&str; 6] = ["getter", "find", "findOneBy", "findAll", "findBy", "custom"];

impl RequestShape {
    fn from_entry(entry: &Map<String, Value>) -> Result<Self> {
        let present: Vec<&str> = SHAPES
            .iter()
            .copied()
            .filter(|shape| entry.contains_key(*shape))
            .collect();
        let shape = match present.as_slice() {
            [shape] => *shape,
            [] => {
                return Err(Error::InvalidInput(format!(
                    "response entry needs one of {}",
                    SHAPES.join(", ")
                )))
            }
            several => {
                return Err(Error::InvalidInput(format!(
                    "response entry has several request shapes: {}",
                    several.join(", ")
                )))
            }
        };

        let value = &entry[shape];
        let invalid = |expected: &str| {
            Error::InvalidInput(format!("{} must be {}, got {}", shape, expected, value))
        };
        match shape {
            "getter" => value
                .as_str()
                .filter(|path| !path.is_empty())
                .map(|path| RequestShape::Getter(path.to_string()))
                .ok_or_else(|| invalid("a record key path")),
            "find" => value
                .as_i64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .map(RequestShape::Find)
                .ok_or_else(|| invalid("an id")),
            "findOneBy" => value
                .as_object()
                .map(|c| RequestShape::FindOneBy(c.clone()))
                .ok_or_else(|| invalid("an object")),
            "findBy" => value
                .as_object()
                .map(|c| RequestShape::FindBy(c.clone()))
                .ok_or_else(|| invalid("an object")),
            "findAll" => Ok(RequestShape::FindAll),
            _ => match value {
                Value::String(name) => Ok(RequestShape::Custom {
                    name: name.clone(),
                    params: Vec::new(),
                }),
                Value::Object(call) => {
                    let name = call
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| invalid("{name, params}"))?;
                    let params = match call.get("params") {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(params)) => params.clone(),
                        Some(_) => return Err(invalid("{name, params: [...]}")),
                    };
                    Ok(RequestShape::Custom {
                        name: name.to_string(),
                        params,
                    })
                }
                _ => Err(invalid("a query name or {name, params}")),
            },
        }
    }
}

fn optional_integer(entry: &Map<String, Value>, option: &str) -> Result<Option<i64>> {
    match entry.get(option) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(Some)
            .ok_or_else(|| {
                Error::InvalidInput(format!("{} must be an integer, got {}", option, value))
            }),
    }
}

/// Records selected by an entry
enum Selection {
    One(Option<Entity>),
    Many(Vec<Entity>),
}

impl ActionDispatcher {
    /// `response` / `output`: serialize the selected records into `data`
    pub(crate) async fn respond(
        &self,
        ctx: &mut RequestContext,
        entity_name: &str,
        record: &RecordEntry,
    ) -> Result<()> {
        let entry = &record.fields;
        let shape = RequestShape::from_entry(entry)?;
        let filter = OutputFilter::from_entry(entry)?;
        let order_by = parse_order_by(entry.get("orderBy").unwrap_or(&Value::Null))?;
        let limit = optional_integer(entry, "limit")?;
        let page = optional_integer(entry, "page")?.unwrap_or(1);

        let mut type_name = self.registry().definition(entity_name)?.name.clone();

        let selection = match shape {
            RequestShape::Getter(path) => {
                let (resolved, entities) = self.follow_getter(ctx, &type_name, &path).await?;
                type_name = resolved;
                let definition = self.registry().definition(&type_name)?;
                let entities = sort_in_memory(definition, entities, &order_by)?;
                Selection::Many(page_in_memory(ctx, entities, limit, page)?)
            }
            RequestShape::Find(id) => {
                Selection::One(ctx.session.repository(&type_name)?.find(id).await?)
            }
            RequestShape::FindOneBy(criteria) => {
                let mut repository = ctx.session.repository(&type_name)?;
                let found = repository.find_by(&criteria, &order_by, Some(1), None).await?;
                Selection::One(found.into_iter().next())
            }
            RequestShape::FindAll => Selection::Many(
                self.find_paged(ctx, &type_name, &Criteria::new(), &order_by, limit, page)
                    .await?,
            ),
            RequestShape::FindBy(criteria) => Selection::Many(
                self.find_paged(ctx, &type_name, &criteria, &order_by, limit, page)
                    .await?,
            ),
            RequestShape::Custom { name, params } => {
                let entities = ctx
                    .session
                    .repository(&type_name)?
                    .custom(&name, &params)
                    .await?;
                let definition = self.registry().definition(&type_name)?;
                let entities = sort_in_memory(definition, entities, &order_by)?;
                Selection::Many(page_in_memory(ctx, entities, limit, page)?)
            }
        };

        let definition = self.registry().definition(&type_name)?;
        let data = match selection {
            Selection::One(entity) => entity
                .map(|e| entity_to_json(&e, definition, &filter))
                .unwrap_or(Value::Null),
            Selection::Many(entities) => entities_to_json(&entities, definition, &filter),
        };

        debug!("response '{}' ({})", record.key, type_name);
        ctx.envelope.data.insert(record.key.clone(), data);
        Ok(())
    }

    /// `find_by` windowed by `limit`/`page` in the store, setting pagination
    async fn find_paged(
        &self,
        ctx: &mut RequestContext,
        type_name: &str,
        criteria: &Criteria,
        order_by: &[(String, SortDirection)],
        limit: Option<i64>,
        page: i64,
    ) -> Result<Vec<Entity>> {
        let mut repository = ctx.session.repository(type_name)?;
        let Some(limit) = limit else {
            return repository.find_by(criteria, order_by, None, None).await;
        };

        let total = repository.count_by(criteria).await?;
        let pagination = calculate_pagination(total, page, limit)?;
        let entities = repository
            .find_by(criteria, order_by, Some(pagination.limit), Some(pagination.offset))
            .await?;
        ctx.envelope.pagination = Some(pagination);
        Ok(entities)
    }

    /// Resolve `recordKey[.association...]` through `get*` accessors
    ///
    /// Returns the type reached at the end of the path and its records.
    async fn follow_getter(
        &self,
        ctx: &mut RequestContext,
        block_type: &str,
        path: &str,
    ) -> Result<(String, Vec<Entity>)> {
        let registry = self.registry();
        let mut segments = path.split('.');
        let key = segments.next().unwrap_or_default();

        let mut entities = ctx.identifiers.require(key)?.to_vec();
        let mut type_name = entities
            .first()
            .map(|e| e.type_name().to_string())
            .unwrap_or_else(|| block_type.to_string());

        // Reload so links staged later in the request are visible
        let ids: Vec<i64> = entities.iter().filter_map(Entity::id).collect();
        if !ids.is_empty() && ids.len() == entities.len() {
            entities = self.load_by_ids(ctx, &type_name, &ids).await?;
        }

        for segment in segments {
            let accessor = registry
                .descriptor(&type_name)?
                .accessor_for(segment, AccessorKind::Get)?;
            let target = match &accessor.property_kind {
                PropertyKind::Single(target) | PropertyKind::Collection(target) => target.clone(),
                _ => {
                    return Err(Error::InvalidField(format!(
                        "{}.{} is not an association",
                        type_name, segment
                    )))
                }
            };

            let mut ids: Vec<i64> = Vec::new();
            for entity in &entities {
                if let AccessorValue::Ids(linked) = accessor.read(entity)? {
                    for id in linked {
                        if !ids.contains(&id) {
                            ids.push(id);
                        }
                    }
                }
            }

            entities = self.load_by_ids(ctx, &target, &ids).await?;
            type_name = registry.definition(&target)?.name.clone();
        }

        Ok((type_name, entities))
    }
}

/// Order an already loaded selection the way `find_by` orders in SQL
///
/// NULL sorts first ascending; ties fall back to ascending id.
fn sort_in_memory(
    definition: &EntityDefinition,
    mut entities: Vec<Entity>,
    order_by: &[(String, SortDirection)],
) -> Result<Vec<Entity>> {
    if order_by.is_empty() {
        return Ok(entities);
    }

    for (property, _) in order_by {
        let sortable = property == "id"
            || definition.field_mapping(property).is_some()
            || definition
                .association_mapping(property)
                .is_some_and(|a| a.has_column());
        if !sortable {
            return Err(Error::InvalidField(format!(
                "{} cannot be ordered by {}",
                definition.name, property
            )));
        }
    }

    entities.sort_by(|a, b| {
        order_by
            .iter()
            .map(|(property, direction)| {
                let ordering = compare_values(&sort_value(a, property), &sort_value(b, property));
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| a.id().cmp(&b.id()))
    });
    Ok(entities)
}

fn sort_value(entity: &Entity, property: &str) -> FieldValue {
    if property == "id" {
        return entity.id().map(FieldValue::Integer).unwrap_or(FieldValue::Null);
    }
    match entity.get(property) {
        FieldValue::Null => entity
            .linked_id(property)
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Null),
        value => value.clone(),
    }
}

fn compare_values(a: &FieldValue, b: &FieldValue) -> Ordering {
    use FieldValue::*;
    match (a, b) {
        (Null, Null) => Ordering::Equal,
        (Null, _) => Ordering::Less,
        (_, Null) => Ordering::Greater,
        (Integer(x), Integer(y)) => x.cmp(y),
        (Integer(x), Float(y)) => (*x as f64).total_cmp(y),
        (Float(x), Integer(y)) => x.total_cmp(&(*y as f64)),
        (Float(x), Float(y)) => x.total_cmp(y),
        (Boolean(x), Boolean(y)) => x.cmp(y),
        (String(x), String(y)) => x.cmp(y),
        (Date(x), Date(y)) => x.cmp(y),
        (Time(x), Time(y)) => x.cmp(y),
        (DateTime(x), DateTime(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// Window an already loaded selection, setting pagination
fn page_in_memory(
    ctx: &mut RequestContext,
    entities: Vec<Entity>,
    limit: Option<i64>,
    page: i64,
) -> Result<Vec<Entity>> {
    let Some(limit) = limit else {
        return Ok(entities);
    };
    let pagination = calculate_pagination(entities.len() as i64, page, limit)?;
    ctx.envelope.pagination = Some(pagination);
    Ok(pagination.slice(entities))
}
