//! Entity schema declarations.

use serde::{Deserialize, Serialize};

use super::record::VERSION_ID_FIELD;

fn default_primary_key() -> String {
    VERSION_ID_FIELD.to_string()
}

/// Static description of one versioned entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity type name, also the backing table/collection name.
    pub name: String,
    /// Field the base store keys physical rows by.
    #[serde(default = "default_primary_key")]
    pub primary_key: String,
    /// Fields unique among currently open versions.
    #[serde(default)]
    pub unique_fields: Vec<String>,
}

impl EntitySchema {
    /// Create a schema with no unique fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: default_primary_key(),
            unique_fields: Vec::new(),
        }
    }

    /// Declare a field unique among open versions.
    pub fn with_unique(mut self, field: impl Into<String>) -> Self {
        let field = field.into();
        if !self.unique_fields.contains(&field) {
            self.unique_fields.push(field);
        }
        self
    }

    /// Whether any uniqueness constraint is declared.
    pub fn has_unique_fields(&self) -> bool {
        !self.unique_fields.is_empty()
    }
}
