//! Factory for creating base stores and repositories.

use std::sync::Arc;

use rewind_core::config::{RewindConfig, StoreConfig, StoreProvider};
use rewind_core::error::{RewindError, RewindResult};
use rewind_core::traits::BaseStore;
use rewind_core::types::EntitySchema;
use rewind_core::versioning::VersionedRepository;

/// Factory for creating base stores.
pub struct StoreFactory;

impl StoreFactory {
    /// Create a base store for one entity from the given configuration.
    pub fn create(config: &StoreConfig, schema: EntitySchema) -> RewindResult<Arc<dyn BaseStore>> {
        match config.provider {
            StoreProvider::Memory => Ok(Arc::new(crate::memory::MemoryStore::new(schema))),

            #[cfg(feature = "sqlite")]
            StoreProvider::Sqlite => {
                if let Some(parent) = config.path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                let store = crate::sqlite::SqliteStore::new(
                    &config.path.to_string_lossy(),
                    schema,
                    config.enforce_open_uniqueness,
                )?;
                Ok(Arc::new(store))
            }

            #[allow(unreachable_patterns)]
            provider => Err(RewindError::Configuration(format!(
                "Store provider '{}' is not enabled in this build",
                provider
            ))),
        }
    }

    /// Create a versioned repository for a declared entity.
    pub fn repository(config: &RewindConfig, entity: &str) -> RewindResult<VersionedRepository> {
        let schema = config.entity(entity).cloned().ok_or_else(|| {
            RewindError::Configuration(format!("Entity '{}' is not declared", entity))
        })?;

        tracing::debug!(
            entity,
            provider = %config.store.provider,
            serialize_writes = config.serialize_writes,
            "Creating versioned repository"
        );
        let store = Self::create(&config.store, schema)?;
        Ok(VersionedRepository::new(store).with_serialized_writes(config.serialize_writes))
    }

    /// In-memory store with default settings.
    pub fn memory(schema: EntitySchema) -> Arc<dyn BaseStore> {
        Arc::new(crate::memory::MemoryStore::new(schema))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(provider: StoreProvider, path: std::path::PathBuf) -> RewindConfig {
        RewindConfig {
            store: StoreConfig {
                provider,
                path,
                enforce_open_uniqueness: true,
            },
            entities: vec![EntitySchema::new("Product").with_unique("code")],
            serialize_writes: true,
        }
    }

    #[test]
    fn test_repository_for_undeclared_entity_fails() {
        let config = config_with(StoreProvider::Memory, ":memory:".into());
        let err = StoreFactory::repository(&config, "Order").err().unwrap();
        assert!(matches!(err, RewindError::Configuration(_)));
    }

    #[test]
    fn test_memory_repository_uses_declared_schema() {
        let config = config_with(StoreProvider::Memory, ":memory:".into());
        let repo = StoreFactory::repository(&config, "Product").unwrap();
        assert_eq!(repo.schema().unique_fields, vec!["code".to_string()]);

        let record = rewind_core::types::Record::new().with("code", "X");
        tokio_test::assert_ok!(tokio_test::block_on(repo.create(record.clone(), None)));
        let err = tokio_test::assert_err!(tokio_test::block_on(repo.create(record, None)));
        assert!(err.is_uniqueness_conflict());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn test_sqlite_store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rewind.db");
        let config = config_with(StoreProvider::Sqlite, path.clone());

        let store = StoreFactory::create(&config.store, EntitySchema::new("Product")).unwrap();
        assert_eq!(store.schema().name, "Product");
        assert!(path.exists());
    }
}
