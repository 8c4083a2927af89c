//! Dynamic entity records
//!
//! An [`Entity`] is a record of a registered type: an optional id, typed field
//! values and association links (target ids). Records are created through
//! [`EntityRegistry::instantiate`](crate::schema::EntityRegistry::instantiate)
//! or loaded by the persistence gateway.

use crate::schema::FieldType;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Storage and wire format for date fields
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// Storage and wire format for time fields
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// Storage and wire format for datetime fields
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

static NULL: FieldValue = FieldValue::Null;

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            FieldValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Coerce a JSON value to `field_type`
    ///
    /// Returns `None` when the value cannot represent the type. Numbers and
    /// booleans are accepted for string fields; numeric strings for numbers.
    pub fn from_json(value: &Value, field_type: FieldType) -> Option<FieldValue> {
        if value.is_null() {
            return Some(FieldValue::Null);
        }

        match field_type {
            FieldType::Integer => json_to_i64(value).map(FieldValue::Integer),
            FieldType::Float => json_to_f64(value).map(FieldValue::Float),
            FieldType::Boolean => json_to_bool(value).map(FieldValue::Boolean),
            FieldType::String | FieldType::Text => json_to_string(value).map(FieldValue::String),
            FieldType::Date | FieldType::Time | FieldType::DateTime => match value {
                Value::String(s) => FieldValue::parse_text(s, field_type),
                Value::Number(n) => n.as_i64().and_then(|secs| from_epoch(secs, field_type)),
                _ => None,
            },
        }
    }

    /// Parse a textual value (CSV cell or stored column) as `field_type`
    ///
    /// Temporal types try their primary format first, then the looser
    /// variants, then a numeric unix epoch.
    pub fn parse_text(text: &str, field_type: FieldType) -> Option<FieldValue> {
        let text = text.trim();
        match field_type {
            FieldType::Integer => text.parse::<i64>().ok().map(FieldValue::Integer),
            FieldType::Float => text.parse::<f64>().ok().map(FieldValue::Float),
            FieldType::Boolean => parse_bool(text).map(FieldValue::Boolean),
            FieldType::String | FieldType::Text => Some(FieldValue::String(text.to_string())),
            FieldType::Date => parse_datetime(text)
                .map(|dt| dt.date())
                .or_else(|| NaiveDate::parse_from_str(text, DATE_FORMAT).ok())
                .map(FieldValue::Date)
                .or_else(|| epoch_fallback(text, field_type)),
            FieldType::Time => NaiveTime::parse_from_str(text, TIME_FORMAT)
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .ok()
                .or_else(|| parse_datetime(text).map(|dt| dt.time()))
                .map(FieldValue::Time)
                .or_else(|| epoch_fallback(text, field_type)),
            FieldType::DateTime => parse_datetime(text)
                .or_else(|| {
                    NaiveDate::parse_from_str(text, DATE_FORMAT)
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
                .map(FieldValue::DateTime)
                .or_else(|| epoch_fallback(text, field_type)),
        }
    }

    /// Plain JSON representation (dates as formatted strings)
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Integer(i) => Value::from(*i),
            FieldValue::Float(f) => Value::from(*f),
            FieldValue::Boolean(b) => Value::Bool(*b),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Date(d) => Value::String(d.format(DATE_FORMAT).to_string()),
            FieldValue::Time(t) => Value::String(t.format(TIME_FORMAT).to_string()),
            FieldValue::DateTime(dt) => Value::String(dt.format(DATETIME_FORMAT).to_string()),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_json() {
            Value::String(s) => write!(f, "{}", s),
            other => write!(f, "{}", other),
        }
    }
}

fn json_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::Bool(b) => Some(*b as i64),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

fn json_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn json_to_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => parse_bool(s),
        _ => None,
    }
}

fn json_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

/// Fractional seconds are optional in both primary forms
fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M"))
        .ok()
        .or_else(|| DateTime::<FixedOffset>::parse_from_rfc3339(text).ok().map(|dt| dt.naive_utc()))
}

fn epoch_fallback(text: &str, field_type: FieldType) -> Option<FieldValue> {
    text.parse::<i64>()
        .ok()
        .and_then(|secs| from_epoch(secs, field_type))
}

fn from_epoch(secs: i64, field_type: FieldType) -> Option<FieldValue> {
    let dt = DateTime::<Utc>::from_timestamp(secs, 0)?.naive_utc();
    match field_type {
        FieldType::Date => Some(FieldValue::Date(dt.date())),
        FieldType::Time => Some(FieldValue::Time(dt.time())),
        FieldType::DateTime => Some(FieldValue::DateTime(dt)),
        _ => None,
    }
}

/// A record of a registered entity type
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    type_name: String,
    id: Option<i64>,
    values: BTreeMap<String, FieldValue>,
    links: BTreeMap<String, Vec<i64>>,
}

impl Entity {
    pub(crate) fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            values: BTreeMap::new(),
            links: BTreeMap::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Storage id; `None` until first persisted
    pub fn id(&self) -> Option<i64> {
        self.id
    }

    /// Assign the id, e.g. from a CSV `id` column before persisting
    pub fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    /// Field value; unset fields read as `Null`
    pub fn get(&self, field: &str) -> &FieldValue {
        self.values.get(field).unwrap_or(&NULL)
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.values.insert(field.into(), value);
    }

    pub fn values(&self) -> &BTreeMap<String, FieldValue> {
        &self.values
    }

    /// Target ids linked through an association
    pub fn linked_ids(&self, association: &str) -> &[i64] {
        self.links.get(association).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Single-valued association target
    pub fn linked_id(&self, association: &str) -> Option<i64> {
        self.linked_ids(association).first().copied()
    }

    /// Replace a single-valued association target
    pub fn set_link(&mut self, association: impl Into<String>, target: Option<i64>) {
        self.links
            .insert(association.into(), target.into_iter().collect());
    }

    /// Replace all targets of a collection association
    pub fn set_links(&mut self, association: impl Into<String>, targets: Vec<i64>) {
        let mut deduped = Vec::with_capacity(targets.len());
        for id in targets {
            if !deduped.contains(&id) {
                deduped.push(id);
            }
        }
        self.links.insert(association.into(), deduped);
    }

    /// Add a collection target; returns false if already linked
    pub fn add_link(&mut self, association: impl Into<String>, target: i64) -> bool {
        let ids = self.links.entry(association.into()).or_default();
        if ids.contains(&target) {
            return false;
        }
        ids.push(target);
        true
    }

    /// Remove a collection target; returns false if it was not linked
    pub fn remove_link(&mut self, association: &str, target: i64) -> bool {
        match self.links.get_mut(association) {
            Some(ids) => {
                let before = ids.len();
                ids.retain(|id| *id != target);
                ids.len() != before
            }
            None => false,
        }
    }

    pub fn has_link(&self, association: &str, target: i64) -> bool {
        self.linked_ids(association).contains(&target)
    }

    pub fn links(&self) -> &BTreeMap<String, Vec<i64>> {
        &self.links
    }

    /// Same type and id (both persisted)
    pub fn same_record(&self, other: &Entity) -> bool {
        self.id.is_some() && self.id == other.id && self.type_name == other.type_name
    }
}
