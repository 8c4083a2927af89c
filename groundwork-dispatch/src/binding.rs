//! Form binding for create and update
//!
//! An [`EntityForm`] is built from the declared metadata of one entity type.
//! Every field gets a widget that knows how to turn submitted JSON into a
//! typed value; associations get an association widget that only parses the
//! references (ids, record keys or nested records) and leaves resolving them
//! to the engine.
//!
//! Submitting collects every violation and reports the first one as a
//! `Validation` error, like a submitted form would.

use groundwork_common::entity::FieldValue;
use groundwork_common::schema::ARCHIVE_FIELD;
use groundwork_common::{EntityDefinition, Error, FieldType, Result};
use serde_json::{Map, Value};

pub const EXTRA_FIELDS_MESSAGE: &str = "This form should not contain extra fields.";
const INVALID_MESSAGE: &str = "This value is not valid.";
const BLANK_MESSAGE: &str = "This value should not be blank.";

#[derive(Debug, Clone, PartialEq)]
pub enum Widget {
    /// `"2024-01-31"` or `{"year", "month", "day"}`
    Date,
    /// `"13:45:00"` or `{"hour", "minute", "second"}`
    Time,
    /// `"2024-01-31 13:45:00"` or `{"date": {..}, "time": {..}}`
    DateTime,
    /// Scalar of the given type
    Plain(FieldType),
    Association { target: String, collection: bool },
}

impl Widget {
    fn for_field(field_type: FieldType) -> Self {
        match field_type {
            FieldType::Date => Widget::Date,
            FieldType::Time => Widget::Time,
            FieldType::DateTime => Widget::DateTime,
            other => Widget::Plain(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub widget: Widget,
    pub required: bool,
}

/// Whether missing required fields are violations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Update,
}

/// A submitted association reference
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Id(i64),
    /// A record key of the current request (or a numeric id sent as text)
    Key(String),
    /// A record to find or create
    Nested(Map<String, Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoundAssociation {
    pub name: String,
    pub references: Vec<Reference>,
}

/// Result of a valid submission, in submission order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoundForm {
    pub values: Vec<(String, FieldValue)>,
    pub associations: Vec<BoundAssociation>,
}

impl BoundForm {
    /// Names of every bound property, in submission order
    pub fn property_names(&self) -> Vec<String> {
        self.values
            .iter()
            .map(|(name, _)| name.clone())
            .chain(self.associations.iter().map(|a| a.name.clone()))
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct EntityForm {
    entity: String,
    fields: Vec<FormField>,
}

impl EntityForm {
    pub fn new(definition: &EntityDefinition) -> Self {
        let mut fields = Vec::new();
        for field in &definition.fields {
            fields.push(FormField {
                name: field.name.clone(),
                widget: Widget::for_field(field.field_type),
                // The archive flag has a storage default
                required: !field.nullable && field.name != ARCHIVE_FIELD,
            });
        }
        for association in &definition.associations {
            fields.push(FormField {
                name: association.name.clone(),
                widget: Widget::Association {
                    target: association.target.clone(),
                    collection: association.is_collection(),
                },
                required: false,
            });
        }

        Self {
            entity: definition.name.clone(),
            fields,
        }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Bind submitted data
    pub fn submit(&self, data: &Map<String, Value>, mode: FormMode) -> Result<BoundForm> {
        let mut bound = BoundForm::default();
        let mut violations: Vec<String> = Vec::new();

        for (name, value) in data {
            let Some(field) = self.field(name) else {
                violations.push(EXTRA_FIELDS_MESSAGE.to_string());
                continue;
            };

            match &field.widget {
                Widget::Association { collection, .. } => {
                    match parse_references(value, *collection) {
                        Some(references) => bound.associations.push(BoundAssociation {
                            name: name.clone(),
                            references,
                        }),
                        None => violations.push(format!("{}: {}", name, INVALID_MESSAGE)),
                    }
                }
                widget => match transform(widget, value) {
                    Some(FieldValue::Null) if field.required => {
                        violations.push(format!("{}: {}", name, BLANK_MESSAGE));
                    }
                    Some(value) => bound.values.push((name.clone(), value)),
                    None => violations.push(format!("{}: {}", name, INVALID_MESSAGE)),
                },
            }
        }

        if mode == FormMode::Create {
            for field in self.fields.iter().filter(|f| f.required) {
                if !data.contains_key(&field.name) {
                    violations.push(format!("{}: {}", field.name, BLANK_MESSAGE));
                }
            }
        }

        match violations.into_iter().next() {
            Some(message) => Err(Error::Validation(format!("{}: {}", self.entity, message))),
            None => Ok(bound),
        }
    }
}

/// Convert a submitted scalar (or compound date/time object) to a field value
fn transform(widget: &Widget, value: &Value) -> Option<FieldValue> {
    match (widget, value) {
        (Widget::Date, Value::Object(parts)) => compound_date(parts).map(FieldValue::Date),
        (Widget::Time, Value::Object(parts)) => compound_time(parts).map(FieldValue::Time),
        (Widget::DateTime, Value::Object(parts)) => {
            let date = compound_date(parts.get("date")?.as_object()?)?;
            let time = match parts.get("time") {
                Some(Value::Object(time)) => compound_time(time)?,
                Some(_) => return None,
                None => chrono::NaiveTime::MIN,
            };
            Some(FieldValue::DateTime(date.and_time(time)))
        }
        (Widget::Date, _) => FieldValue::from_json(value, FieldType::Date),
        (Widget::Time, _) => FieldValue::from_json(value, FieldType::Time),
        (Widget::DateTime, _) => FieldValue::from_json(value, FieldType::DateTime),
        (Widget::Plain(field_type), _) => FieldValue::from_json(value, *field_type),
        (Widget::Association { .. }, _) => None,
    }
}

fn part(parts: &Map<String, Value>, name: &str) -> Option<u32> {
    match parts.get(name)? {
        Value::Number(n) => n.as_u64().map(|n| n as u32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn compound_date(parts: &Map<String, Value>) -> Option<chrono::NaiveDate> {
    let year = part(parts, "year")? as i32;
    chrono::NaiveDate::from_ymd_opt(year, part(parts, "month")?, part(parts, "day")?)
}

fn compound_time(parts: &Map<String, Value>) -> Option<chrono::NaiveTime> {
    let second = if parts.contains_key("second") {
        part(parts, "second")?
    } else {
        0
    };
    chrono::NaiveTime::from_hms_opt(part(parts, "hour")?, part(parts, "minute")?, second)
}

fn parse_reference(value: &Value) -> Option<Reference> {
    match value {
        Value::Number(n) => n.as_i64().map(Reference::Id),
        Value::String(key) => Some(Reference::Key(key.clone())),
        Value::Object(map) if map.len() == 1 => match map.get("id") {
            Some(id) => id.as_i64().map(Reference::Id),
            None => Some(Reference::Nested(map.clone())),
        },
        Value::Object(map) => Some(Reference::Nested(map.clone())),
        _ => None,
    }
}

fn parse_references(value: &Value, collection: bool) -> Option<Vec<Reference>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) if collection || items.len() <= 1 => {
            items.iter().map(parse_reference).collect()
        }
        Value::Array(_) => None,
        single => parse_reference(single).map(|r| vec![r]),
    }
}
