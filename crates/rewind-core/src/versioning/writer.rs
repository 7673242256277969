//! Physical row mutations behind logical create, update and delete.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{RewindError, RewindResult};
use crate::traits::BaseStore;
use crate::types::{timestamp_value, Filter, Record, ID_FIELD, VALID_UNTIL_FIELD};

/// Opens and closes version rows.
///
/// Every method takes the instant of the logical write so all of its physical
/// steps share one timestamp.
pub struct HistoryWriter<'a> {
    store: &'a dyn BaseStore,
}

impl<'a> HistoryWriter<'a> {
    /// Create a writer over a store.
    pub fn new(store: &'a dyn BaseStore) -> Self {
        Self { store }
    }

    /// Open a first version for each candidate under a fresh logical id.
    pub async fn create(
        &self,
        candidates: Vec<Record>,
        now: DateTime<Utc>,
    ) -> RewindResult<Vec<Record>> {
        let rows: Vec<Record> = candidates
            .into_iter()
            .map(|candidate| {
                let mut row = self.without_system_fields(candidate);
                row.set(ID_FIELD, Uuid::new_v4().to_string());
                row.open_at(now);
                row
            })
            .collect();

        tracing::debug!(
            entity = %self.store.schema().name,
            count = rows.len(),
            "Opening first versions"
        );
        self.store.create_batch(rows).await
    }

    /// Close every open version matching `target` and open its successor.
    ///
    /// With `replace` the successor is `data` alone; otherwise `data` is
    /// overlaid on the closed version. Returns the number of versions closed.
    pub async fn close_and_reopen(
        &self,
        data: &Record,
        replace: bool,
        target: Option<&Filter>,
        now: DateTime<Utc>,
    ) -> RewindResult<usize> {
        let schema = self.store.schema();
        let open = Filter::and_optional(target.cloned(), Filter::is_null(VALID_UNTIL_FIELD));
        let existing = self.store.find(Some(open)).await?;
        if existing.is_empty() {
            tracing::debug!(entity = %schema.name, "No open versions to update");
            return Ok(0);
        }

        let patch = self.without_system_fields(data.clone());
        let mut closing: Vec<Value> = Vec::with_capacity(existing.len());
        let mut successors = Vec::with_capacity(existing.len());

        for old in existing {
            let key = old.get(&schema.primary_key).cloned().ok_or_else(|| {
                RewindError::Internal(format!(
                    "{} version without primary key '{}'",
                    schema.name, schema.primary_key
                ))
            })?;
            let id = old.get(ID_FIELD).cloned().ok_or_else(|| {
                RewindError::Internal(format!("{} version without logical id", schema.name))
            })?;

            let mut successor = if replace {
                patch.clone()
            } else {
                let mut merged = self.without_system_fields(old);
                merged.merge(&patch);
                merged
            };
            successor.set(ID_FIELD, id);
            successor.open_at(now);

            closing.push(key);
            successors.push(successor);
        }

        tracing::debug!(
            entity = %schema.name,
            count = successors.len(),
            replace,
            "Opening successor versions"
        );
        self.store.create_batch(successors).await?;

        // Closed by primary key: the successors also match `target`.
        let closed = self.close_versions(closing, now).await.map_err(|e| {
            tracing::error!(
                entity = %schema.name,
                error = %e,
                "Successors opened but predecessors left open"
            );
            e
        })?;
        Ok(closed)
    }

    /// Close every open version matching `target` without a successor.
    pub async fn close(&self, target: Option<&Filter>, now: DateTime<Utc>) -> RewindResult<usize> {
        let open = Filter::and_optional(target.cloned(), Filter::is_null(VALID_UNTIL_FIELD));
        let closed = self
            .store
            .update_batch(Self::closing_patch(now), Some(open))
            .await?;

        tracing::debug!(entity = %self.store.schema().name, closed, "Closed versions");
        Ok(closed)
    }

    async fn close_versions(&self, keys: Vec<Value>, now: DateTime<Utc>) -> RewindResult<usize> {
        let primary_key = self.store.schema().primary_key.clone();
        self.store
            .update_batch(
                Self::closing_patch(now),
                Some(Filter::in_list(primary_key, keys)),
            )
            .await
    }

    fn closing_patch(now: DateTime<Utc>) -> Record {
        Record::new().with(VALID_UNTIL_FIELD, timestamp_value(now))
    }

    fn without_system_fields(&self, mut record: Record) -> Record {
        record.strip_system_fields();
        record.remove(&self.store.schema().primary_key);
        record
    }
}
