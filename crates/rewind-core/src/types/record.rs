//! Versioned record type.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{RewindError, RewindResult};

/// Logical identifier shared by every version of an entity.
pub const ID_FIELD: &str = "id";
/// Physical row identifier, one per version.
pub const VERSION_ID_FIELD: &str = "versionId";
/// Timestamp the version became active.
pub const VALID_FROM_FIELD: &str = "validFrom";
/// Timestamp the version was closed, `null` while open.
pub const VALID_UNTIL_FIELD: &str = "validUntil";

/// All system fields managed by the versioning layer.
pub const SYSTEM_FIELDS: [&str; 4] = [ID_FIELD, VERSION_ID_FIELD, VALID_FROM_FIELD, VALID_UNTIL_FIELD];

/// Format a timestamp the way system fields store it.
///
/// Fixed microsecond precision with a `Z` suffix keeps the textual and
/// chronological orders identical.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Timestamp as a JSON value for system fields and filters.
pub fn timestamp_value(ts: DateTime<Utc>) -> Value {
    Value::String(format_timestamp(ts))
}

/// A flat row: domain fields plus the versioning system fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing field map.
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Build a record from a JSON object. Non-object values yield `None`.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Borrow the field map.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Consume into the field map.
    pub fn into_fields(self) -> Map<String, Value> {
        self.fields
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Get a field value as a string.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Set a field value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(field.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    /// Overlay another record's fields onto this one.
    pub fn merge(&mut self, other: &Record) {
        for (k, v) in &other.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Drop every system field.
    pub fn strip_system_fields(&mut self) {
        for field in SYSTEM_FIELDS {
            self.fields.remove(field);
        }
    }

    /// Logical id.
    pub fn id(&self) -> Option<&str> {
        self.get_str(ID_FIELD)
    }

    /// Physical version id.
    pub fn version_id(&self) -> Option<&str> {
        self.get_str(VERSION_ID_FIELD)
    }

    /// Start of this version's validity.
    pub fn valid_from(&self) -> Option<DateTime<Utc>> {
        self.timestamp(VALID_FROM_FIELD)
    }

    /// End of this version's validity, `None` while open.
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        self.timestamp(VALID_UNTIL_FIELD)
    }

    /// Whether this is the open (current) version.
    pub fn is_open(&self) -> bool {
        self.fields
            .get(VALID_UNTIL_FIELD)
            .map_or(true, |v| v.is_null())
    }

    /// Stamp a fresh open version starting at `now`.
    pub fn open_at(&mut self, now: DateTime<Utc>) {
        self.fields
            .insert(VALID_FROM_FIELD.to_string(), timestamp_value(now));
        self.fields.insert(VALID_UNTIL_FIELD.to_string(), Value::Null);
    }

    /// Primary key held in `field`, assigning a fresh UUID when absent or null.
    ///
    /// Keys must be strings; any other value is rejected.
    pub fn ensure_key(&mut self, field: &str) -> RewindResult<String> {
        match self.fields.get(field) {
            Some(Value::String(key)) => Ok(key.clone()),
            None | Some(Value::Null) => {
                let key = Uuid::new_v4().to_string();
                self.set(field, key.clone());
                Ok(key)
            }
            Some(other) => Err(RewindError::validation(format!(
                "primary key '{}' must be a string, got {}",
                field, other
            ))),
        }
    }

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>> {
        self.get_str(field)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self { fields }
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Object(record.fields)
    }
}
