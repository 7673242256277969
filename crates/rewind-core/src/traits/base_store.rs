//! Base store trait: the flat CRUD collection the versioning layer wraps.

use async_trait::async_trait;

use crate::error::RewindResult;
use crate::types::{EntitySchema, Filter, Record};

/// Core BaseStore trait - all storage backends implement this.
///
/// Each call must be atomic on its own; nothing here spans calls. Rows are
/// keyed by [`EntitySchema::primary_key`], which the store assigns when a
/// created record does not carry one.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BaseStore: Send + Sync {
    /// Insert one row, returning it with its assigned primary key.
    async fn create(&self, record: Record) -> RewindResult<Record>;

    /// Insert rows, returning them with assigned primary keys in input order.
    async fn create_batch(&self, records: Vec<Record>) -> RewindResult<Vec<Record>>;

    /// Rows matching the filter (all rows when `None`), in insertion order.
    async fn find(&self, filter: Option<Filter>) -> RewindResult<Vec<Record>>;

    /// Row by primary key, or a not found error.
    async fn find_by_id(&self, id: &str) -> RewindResult<Record>;

    /// Number of rows matching the filter.
    async fn count(&self, filter: Option<Filter>) -> RewindResult<usize>;

    /// Overlay `partial` onto every matching row, returning the affected count.
    async fn update_batch(&self, partial: Record, filter: Option<Filter>) -> RewindResult<usize>;

    /// Overlay `partial` onto the row with the given primary key.
    async fn update_by_id(&self, id: &str, partial: Record) -> RewindResult<()>;

    /// Replace the row with the given primary key, keeping the key.
    async fn replace_by_id(&self, id: &str, record: Record) -> RewindResult<()>;

    /// Physically delete matching rows, returning the affected count.
    async fn delete_batch(&self, filter: Option<Filter>) -> RewindResult<usize>;

    /// Physically delete the row with the given primary key.
    async fn delete_by_id(&self, id: &str) -> RewindResult<()>;

    /// Schema of the entity this store holds.
    fn schema(&self) -> &EntitySchema;
}
