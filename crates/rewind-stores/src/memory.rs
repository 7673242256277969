//! In-process base store.
//!
//! Rows live in insertion order behind a single lock, held for the whole of
//! each call, so every call is atomic with respect to the others.

use async_trait::async_trait;
use tokio::sync::RwLock;

use rewind_core::error::{ErrorCode, RewindError, RewindResult};
use rewind_core::traits::BaseStore;
use rewind_core::types::{matches_optional, EntitySchema, Filter, Record};

/// Base store keeping rows in memory.
pub struct MemoryStore {
    schema: EntitySchema,
    rows: RwLock<Vec<Record>>,
}

impl MemoryStore {
    /// Create an empty store for an entity.
    pub fn new(schema: EntitySchema) -> Self {
        Self {
            schema,
            rows: RwLock::new(Vec::new()),
        }
    }

    fn key_of<'r>(&self, record: &'r Record) -> Option<&'r str> {
        record.get_str(&self.schema.primary_key)
    }

    /// Assign a primary key when missing and reject keys already taken.
    fn prepare(&self, mut record: Record, rows: &[Record], pending: &[Record]) -> RewindResult<Record> {
        let key = record.ensure_key(&self.schema.primary_key)?;
        let taken = rows
            .iter()
            .chain(pending.iter())
            .any(|r| self.key_of(r) == Some(key.as_str()));
        if taken {
            return Err(RewindError::Store {
                message: format!("{} row '{}' already exists", self.schema.name, key),
                code: ErrorCode::StoreDuplicateKey,
                source: None,
            });
        }
        Ok(record)
    }

    fn without_key(&self, mut record: Record) -> Record {
        record.remove(&self.schema.primary_key);
        record
    }
}

#[async_trait]
impl BaseStore for MemoryStore {
    async fn create(&self, record: Record) -> RewindResult<Record> {
        let mut created = self.create_batch(vec![record]).await?;
        created
            .pop()
            .ok_or_else(|| RewindError::Internal("create_batch returned no row".to_string()))
    }

    async fn create_batch(&self, records: Vec<Record>) -> RewindResult<Vec<Record>> {
        let mut rows = self.rows.write().await;

        let mut prepared = Vec::with_capacity(records.len());
        for record in records {
            let record = self.prepare(record, &rows, &prepared)?;
            prepared.push(record);
        }
        rows.extend(prepared.iter().cloned());

        tracing::debug!(entity = %self.schema.name, count = prepared.len(), "Inserted rows");
        Ok(prepared)
    }

    async fn find(&self, filter: Option<Filter>) -> RewindResult<Vec<Record>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| matches_optional(filter.as_ref(), r.fields()))
            .cloned()
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> RewindResult<Record> {
        let rows = self.rows.read().await;
        rows.iter()
            .find(|r| self.key_of(r) == Some(id))
            .cloned()
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))
    }

    async fn count(&self, filter: Option<Filter>) -> RewindResult<usize> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|r| matches_optional(filter.as_ref(), r.fields()))
            .count())
    }

    async fn update_batch(&self, partial: Record, filter: Option<Filter>) -> RewindResult<usize> {
        let partial = self.without_key(partial);
        let mut rows = self.rows.write().await;

        let mut affected = 0;
        for row in rows
            .iter_mut()
            .filter(|r| matches_optional(filter.as_ref(), r.fields()))
        {
            row.merge(&partial);
            affected += 1;
        }

        tracing::debug!(entity = %self.schema.name, affected, "Updated rows");
        Ok(affected)
    }

    async fn update_by_id(&self, id: &str, partial: Record) -> RewindResult<()> {
        let partial = self.without_key(partial);
        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.get_str(&self.schema.primary_key) == Some(id))
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))?;
        row.merge(&partial);
        Ok(())
    }

    async fn replace_by_id(&self, id: &str, record: Record) -> RewindResult<()> {
        let mut replacement = self.without_key(record);
        replacement.set(self.schema.primary_key.clone(), id);

        let mut rows = self.rows.write().await;
        let row = rows
            .iter_mut()
            .find(|r| r.get_str(&self.schema.primary_key) == Some(id))
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))?;
        *row = replacement;
        Ok(())
    }

    async fn delete_batch(&self, filter: Option<Filter>) -> RewindResult<usize> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|r| !matches_optional(filter.as_ref(), r.fields()));
        let deleted = before - rows.len();

        tracing::debug!(entity = %self.schema.name, deleted, "Deleted rows");
        Ok(deleted)
    }

    async fn delete_by_id(&self, id: &str) -> RewindResult<()> {
        let mut rows = self.rows.write().await;
        let position = rows
            .iter()
            .position(|r| r.get_str(&self.schema.primary_key) == Some(id))
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))?;
        rows.remove(position);
        Ok(())
    }

    fn schema(&self) -> &EntitySchema {
        &self.schema
    }
}
