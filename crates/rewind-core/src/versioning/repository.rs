//! Versioned repository: the public CRUD surface over a base store.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::error::{RewindError, RewindResult};
use crate::traits::{BaseStore, Clock, SystemClock};
use crate::types::{EntitySchema, Filter, QueryOptions, Record, ID_FIELD};

use super::query::HistoryQuery;
use super::validator::UniquenessValidator;
use super::writer::HistoryWriter;

/// CRUD over logical entities, backed by immutable version rows.
///
/// Every verb takes optional [`QueryOptions`]. With `history: true` the call
/// goes straight to the base store with its arguments untouched; otherwise
/// writes open and close versions and reads see one version per logical id.
pub struct VersionedRepository {
    store: Arc<dyn BaseStore>,
    clock: Arc<dyn Clock>,
    write_guard: Option<Mutex<()>>,
}

impl VersionedRepository {
    /// Create a repository stamping versions with the wall clock.
    pub fn new(store: Arc<dyn BaseStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            write_guard: None,
        }
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Serialize logical writes made through this repository.
    ///
    /// Closes the check-then-write window between writers sharing this
    /// instance; writers in other processes are not covered.
    pub fn with_serialized_writes(mut self, enabled: bool) -> Self {
        self.write_guard = enabled.then(|| Mutex::new(()));
        self
    }

    /// Schema of the wrapped entity.
    pub fn schema(&self) -> &EntitySchema {
        self.store.schema()
    }

    /// The wrapped base store.
    pub fn store(&self) -> &Arc<dyn BaseStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Create one entity.
    pub async fn create(&self, data: Record, options: Option<QueryOptions>) -> RewindResult<Record> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.create(data).await;
        }

        self.create_batch(vec![data], options)
            .await?
            .pop()
            .ok_or_else(|| {
                RewindError::Internal(format!("{} store returned no row for create", self.entity()))
            })
    }

    /// Create several entities at once.
    #[tracing::instrument(skip(self, data, options), fields(entity = %self.entity(), count = data.len()))]
    pub async fn create_batch(
        &self,
        data: Vec<Record>,
        options: Option<QueryOptions>,
    ) -> RewindResult<Vec<Record>> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.create_batch(data).await;
        }

        let _guard = self.lock_writes().await;
        UniquenessValidator::new(self.store.as_ref())
            .validate_create_batch(&data)
            .await?;
        let now = self.clock.now();
        HistoryWriter::new(self.store.as_ref()).create(data, now).await
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Entities matching the filter.
    #[tracing::instrument(skip(self, filter, options), fields(entity = %self.entity()))]
    pub async fn find(
        &self,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<Vec<Record>> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.find(filter).await;
        }

        let max_date = options.and_then(|o| o.max_date);
        HistoryQuery::new(self.store.as_ref())
            .find(filter, max_date)
            .await
    }

    /// First entity matching the filter.
    pub async fn find_one(
        &self,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<Option<Record>> {
        Ok(self.find(filter, options).await?.into_iter().next())
    }

    /// Entity by logical id; by primary key in history mode.
    pub async fn find_by_id(&self, id: &str, options: Option<QueryOptions>) -> RewindResult<Record> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.find_by_id(id).await;
        }

        self.find_one(Some(Filter::eq(ID_FIELD, id)), options)
            .await?
            .ok_or_else(|| RewindError::not_found(self.entity(), id))
    }

    /// Number of entities matching the filter.
    pub async fn count(
        &self,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<usize> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.count(filter).await;
        }

        Ok(self.find(filter, options).await?.len())
    }

    /// Whether any entity matches the filter.
    pub async fn exists(
        &self,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<bool> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return Ok(self.store.count(filter).await? > 0);
        }

        Ok(!self.find(filter, options).await?.is_empty())
    }

    /// Every version ever written for a logical id, oldest first.
    pub async fn history_of(&self, id: &str) -> RewindResult<Vec<Record>> {
        HistoryQuery::new(self.store.as_ref()).versions_of(id).await
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Merge an entity's fields into its current version.
    ///
    /// The entity is located by its logical id (its primary key in history mode).
    pub async fn update(&self, entity: Record, options: Option<QueryOptions>) -> RewindResult<()> {
        if QueryOptions::is_bypass(options.as_ref()) {
            let key = self.primary_key_of(&entity)?;
            return self.store.update_by_id(&key, entity).await;
        }

        let id = self.logical_id_of(&entity)?;
        self.update_by_id(&id, entity, options).await
    }

    /// Merge `data` into every entity matching the filter.
    #[tracing::instrument(skip(self, data, filter, options), fields(entity = %self.entity()))]
    pub async fn update_batch(
        &self,
        data: Record,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<usize> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.update_batch(data, filter).await;
        }

        self.write_successors(&data, false, filter).await
    }

    /// Merge `data` into the entity with the given logical id.
    pub async fn update_by_id(
        &self,
        id: &str,
        data: Record,
        options: Option<QueryOptions>,
    ) -> RewindResult<()> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.update_by_id(id, data).await;
        }

        let updated = self
            .write_successors(&data, false, Some(Filter::eq(ID_FIELD, id)))
            .await?;
        self.require_found(updated, id)
    }

    /// Replace the entity with the given logical id by `data`.
    pub async fn replace_by_id(
        &self,
        id: &str,
        data: Record,
        options: Option<QueryOptions>,
    ) -> RewindResult<()> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.replace_by_id(id, data).await;
        }

        let replaced = self
            .write_successors(&data, true, Some(Filter::eq(ID_FIELD, id)))
            .await?;
        self.require_found(replaced, id)
    }

    // ------------------------------------------------------------------
    // Delete
    // ------------------------------------------------------------------

    /// Close an entity's current version.
    ///
    /// The entity is located by its logical id (its primary key in history mode).
    pub async fn delete(&self, entity: Record, options: Option<QueryOptions>) -> RewindResult<()> {
        if QueryOptions::is_bypass(options.as_ref()) {
            let key = self.primary_key_of(&entity)?;
            return self.store.delete_by_id(&key).await;
        }

        let id = self.logical_id_of(&entity)?;
        self.delete_by_id(&id, options).await
    }

    /// Close the current version of every entity matching the filter.
    #[tracing::instrument(skip(self, filter, options), fields(entity = %self.entity()))]
    pub async fn delete_batch(
        &self,
        filter: Option<Filter>,
        options: Option<QueryOptions>,
    ) -> RewindResult<usize> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.delete_batch(filter).await;
        }

        let _guard = self.lock_writes().await;
        let now = self.clock.now();
        HistoryWriter::new(self.store.as_ref())
            .close(filter.as_ref(), now)
            .await
    }

    /// Close the current version of the entity with the given logical id.
    pub async fn delete_by_id(&self, id: &str, options: Option<QueryOptions>) -> RewindResult<()> {
        if QueryOptions::is_bypass(options.as_ref()) {
            return self.store.delete_by_id(id).await;
        }

        let closed = self
            .delete_batch(Some(Filter::eq(ID_FIELD, id)), options)
            .await?;
        self.require_found(closed, id)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn write_successors(
        &self,
        data: &Record,
        replace: bool,
        target: Option<Filter>,
    ) -> RewindResult<usize> {
        let _guard = self.lock_writes().await;
        UniquenessValidator::new(self.store.as_ref())
            .validate_update(data, target.as_ref())
            .await?;
        let now = self.clock.now();
        HistoryWriter::new(self.store.as_ref())
            .close_and_reopen(data, replace, target.as_ref(), now)
            .await
    }

    async fn lock_writes(&self) -> Option<MutexGuard<'_, ()>> {
        match &self.write_guard {
            Some(guard) => Some(guard.lock().await),
            None => None,
        }
    }

    fn require_found(&self, affected: usize, id: &str) -> RewindResult<()> {
        if affected == 0 {
            return Err(RewindError::not_found(self.entity(), id));
        }
        Ok(())
    }

    fn logical_id_of(&self, entity: &Record) -> RewindResult<String> {
        entity.id().map(str::to_owned).ok_or_else(|| {
            RewindError::validation(format!("{} record has no '{}' field", self.entity(), ID_FIELD))
        })
    }

    fn primary_key_of(&self, entity: &Record) -> RewindResult<String> {
        let primary_key = &self.schema().primary_key;
        entity
            .get_str(primary_key)
            .map(str::to_owned)
            .ok_or_else(|| {
                RewindError::validation(format!(
                    "{} record has no '{}' field",
                    self.entity(),
                    primary_key
                ))
            })
    }

    fn entity(&self) -> &str {
        &self.store.schema().name
    }
}
