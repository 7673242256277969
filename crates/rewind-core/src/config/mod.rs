//! Configuration system for rewind.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

use crate::error::{RewindError, RewindResult};
use crate::types::EntitySchema;

/// Base store provider type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum StoreProvider {
    /// Process-local store, lost on exit.
    #[default]
    Memory,
    /// SQLite file (or `:memory:`) with JSON row bodies.
    Sqlite,
}

/// Base store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Provider type.
    pub provider: StoreProvider,
    /// Database path for file-backed providers.
    pub path: PathBuf,
    /// Let the store reject duplicate unique values among open rows itself.
    pub enforce_open_uniqueness: bool,
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".rewind"))
        .unwrap_or_else(|| PathBuf::from(".rewind"))
        .join("rewind.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: StoreProvider::default(),
            path: default_store_path(),
            enforce_open_uniqueness: false,
        }
    }
}

/// Main rewind configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RewindConfig {
    /// Base store configuration shared by all entities.
    pub store: StoreConfig,
    /// Versioned entity declarations.
    pub entities: Vec<EntitySchema>,
    /// Serialize logical writes in-process so validation and write cannot interleave.
    pub serialize_writes: bool,
}

impl RewindConfig {
    /// Load configuration from a file (TOML, JSON, or YAML).
    pub fn from_file(path: impl AsRef<Path>) -> RewindResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let ext = path.as_ref().extension().and_then(|e| e.to_str());

        let config: Self = match ext {
            Some("toml") => {
                toml::from_str(&content).map_err(|e| RewindError::Configuration(e.to_string()))?
            }
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| RewindError::Configuration(e.to_string()))?,
            Some("yaml" | "yml") => serde_yaml::from_str(&content)
                .map_err(|e| RewindError::Configuration(e.to_string()))?,
            _ => {
                return Err(RewindError::Configuration(
                    "Unsupported config file format. Use .toml, .json, or .yaml".to_string(),
                ))
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> RewindResult<Self> {
        let mut config = Self::default();

        if let Ok(provider) = std::env::var("REWIND_STORE") {
            config.store.provider = provider.parse().map_err(|_| {
                RewindError::Configuration(format!("Unknown store provider: {}", provider))
            })?;
        }
        if let Ok(path) = std::env::var("REWIND_SQLITE_PATH") {
            config.store.path = PathBuf::from(path);
        }
        if let Ok(flag) = std::env::var("REWIND_SERIALIZE_WRITES") {
            config.serialize_writes = matches!(flag.as_str(), "1" | "true" | "yes");
        }

        Ok(config)
    }

    /// Look up an entity declaration by name.
    pub fn entity(&self, name: &str) -> Option<&EntitySchema> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// Reject declarations the versioning layer cannot serve.
    pub fn validate(&self) -> RewindResult<()> {
        for (i, entity) in self.entities.iter().enumerate() {
            if entity.name.is_empty() {
                return Err(RewindError::Configuration(format!(
                    "Entity #{} has an empty name",
                    i
                )));
            }
            if self.entities[..i].iter().any(|e| e.name == entity.name) {
                return Err(RewindError::Configuration(format!(
                    "Entity '{}' is declared twice",
                    entity.name
                )));
            }
            if let Some(field) = entity
                .unique_fields
                .iter()
                .find(|f| crate::types::SYSTEM_FIELDS.contains(&f.as_str()))
            {
                return Err(RewindError::Configuration(format!(
                    "Entity '{}' declares system field '{}' as unique",
                    entity.name, field
                )));
            }
        }
        Ok(())
    }
}
