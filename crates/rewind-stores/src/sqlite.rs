//! SQLite base store.
//!
//! Each entity gets one table holding its rows as JSON bodies. Filters are
//! evaluated in Rust after retrieval, as the filter language is richer than
//! what can be pushed into `json_extract` comparisons without losing the
//! timestamp ordering rules. Multi-row writes run in one transaction.
//!
//! # Example
//!
//! ```ignore
//! use rewind_stores::SqliteStore;
//!
//! let store = SqliteStore::new(":memory:", EntitySchema::new("Product").with_unique("code"), true)?;
//! ```

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use rewind_core::error::{ErrorCode, RewindError, RewindResult};
use rewind_core::traits::BaseStore;
use rewind_core::types::{
    matches_optional, EntitySchema, Filter, Record, ID_FIELD, VALID_UNTIL_FIELD,
};

/// Base store persisting rows in SQLite.
pub struct SqliteStore {
    /// SQLite connection (wrapped in Mutex for Send + Sync).
    conn: Mutex<Connection>,
    schema: EntitySchema,
}

impl SqliteStore {
    /// Open (or create) the entity's table in the database at `db_path`.
    ///
    /// With `enforce_open_uniqueness` the table also gets triggers rejecting
    /// a row that would share a unique value with an open row of another
    /// logical id, so racing writers are stopped by the store itself.
    pub fn new(
        db_path: &str,
        schema: EntitySchema,
        enforce_open_uniqueness: bool,
    ) -> RewindResult<Self> {
        let conn = Connection::open(db_path).map_err(|e| {
            RewindError::store_with_source(
                ErrorCode::StoreConnectionFailed,
                format!("Failed to open SQLite database: {}", e),
                e,
            )
        })?;

        let store = Self {
            conn: Mutex::new(conn),
            schema,
        };
        store.init_schema(enforce_open_uniqueness)?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory(schema: EntitySchema, enforce_open_uniqueness: bool) -> RewindResult<Self> {
        Self::new(":memory:", schema, enforce_open_uniqueness)
    }

    fn init_schema(&self, enforce_open_uniqueness: bool) -> RewindResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                pk TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL
            );
            "#,
            table = self.table(),
        ))
        .map_err(|e| sql_error("Failed to create table", e))?;

        if enforce_open_uniqueness {
            for field in &self.schema.unique_fields {
                let sql = self.open_uniqueness_triggers(field)?;
                conn.execute_batch(&sql)
                    .map_err(|e| sql_error("Failed to create uniqueness trigger", e))?;
            }
        }

        tracing::info!(
            entity = %self.schema.name,
            enforce_open_uniqueness,
            "Initialized SQLite table"
        );
        Ok(())
    }

    /// Triggers aborting inserts and updates that would leave two open rows
    /// of different logical ids with the same non-empty value in `field`.
    fn open_uniqueness_triggers(&self, field: &str) -> RewindResult<String> {
        // A quoted JSON path label cannot itself contain a double quote.
        if field.contains('"') {
            return Err(RewindError::Configuration(format!(
                "Unique field '{}' of {} cannot be enforced by SQLite",
                field, self.schema.name
            )));
        }

        let table = self.table();
        let field_path = quote_literal(&format!(r#"$."{}""#, field));
        let message = quote_literal(&format!("open uniqueness violated on {}", field));
        let value = |row: &str| format!("json_extract({row}.body, {field_path})");
        let open = |row: &str| format!("json_extract({row}.body, '$.{VALID_UNTIL_FIELD}') IS NULL");
        let id = |row: &str| format!("json_extract({row}.body, '$.{ID_FIELD}')");

        let guard = format!(
            r#"
            WHEN {new_open} AND {new_value} IS NOT NULL AND {new_value} <> ''
            BEGIN
                SELECT RAISE(ABORT, {message})
                WHERE EXISTS (
                    SELECT 1 FROM {table} AS existing
                    WHERE {existing_open}
                      AND {existing_value} = {new_value}
                      AND {existing_id} IS NOT {new_id}
                );
            END;
            "#,
            new_open = open("NEW"),
            new_value = value("NEW"),
            new_id = id("NEW"),
            existing_open = open("existing"),
            existing_value = value("existing"),
            existing_id = id("existing"),
        );

        let trigger = |event: &str| {
            let name = quote_identifier(&format!(
                "trg_{}_{}_open_{}",
                self.schema.name,
                field,
                event.to_lowercase()
            ));
            format!("CREATE TRIGGER IF NOT EXISTS {name} BEFORE {event} ON {table} {guard}")
        };

        Ok(format!("{}\n{}", trigger("INSERT"), trigger("UPDATE")))
    }

    fn table(&self) -> String {
        quote_identifier(&self.schema.name)
    }

    fn lock(&self) -> RewindResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RewindError::store(format!("Failed to acquire lock: {}", e)))
    }

    fn without_key(&self, mut record: Record) -> Record {
        record.remove(&self.schema.primary_key);
        record
    }

    /// All rows as (seq, record), in insertion order.
    fn load_rows(&self, conn: &Connection) -> RewindResult<Vec<(i64, Record)>> {
        let sql = format!("SELECT seq, body FROM {} ORDER BY seq", self.table());
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| sql_error("Failed to prepare select statement", e))?;

        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
            .map_err(|e| sql_error("Failed to execute select", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (seq, body) = row.map_err(|e| sql_error("Failed to read row", e))?;
            let record: Record = serde_json::from_str(&body)?;
            records.push((seq, record));
        }
        Ok(records)
    }

    fn matching(&self, conn: &Connection, filter: Option<&Filter>) -> RewindResult<Vec<(i64, Record)>> {
        Ok(self
            .load_rows(conn)?
            .into_iter()
            .filter(|(_, r)| matches_optional(filter, r.fields()))
            .collect())
    }

    fn insert(&self, tx: &Transaction<'_>, mut record: Record) -> RewindResult<Record> {
        let key = record.ensure_key(&self.schema.primary_key)?;
        let body = serde_json::to_string(&record)?;

        tx.execute(
            &format!("INSERT INTO {} (pk, body) VALUES (?1, ?2)", self.table()),
            params![key, body],
        )
        .map_err(|e| sql_error(&format!("Failed to insert row '{}'", key), e))?;
        Ok(record)
    }

    fn write_body(&self, tx: &Transaction<'_>, seq: i64, record: &Record) -> RewindResult<()> {
        let body = serde_json::to_string(record)?;
        tx.execute(
            &format!("UPDATE {} SET body = ?1 WHERE seq = ?2", self.table()),
            params![body, seq],
        )
        .map_err(|e| sql_error("Failed to update row", e))?;
        Ok(())
    }

    fn find_seq(&self, conn: &Connection, id: &str) -> RewindResult<Option<(i64, Record)>> {
        let found = conn
            .query_row(
                &format!("SELECT seq, body FROM {} WHERE pk = ?1", self.table()),
                params![id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(|e| sql_error(&format!("Failed to get row '{}'", id), e))?;

        match found {
            Some((seq, body)) => Ok(Some((seq, serde_json::from_str(&body)?))),
            None => Ok(None),
        }
    }
}

fn quote_identifier(name: &str) -> String {
    format!(r#""{}""#, name.replace('"', "\"\""))
}

fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Map a SQLite failure onto a store error, keeping constraint violations
/// distinguishable.
fn sql_error(context: &str, err: rusqlite::Error) -> RewindError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
        {
            ErrorCode::StoreDuplicateKey
        }
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            ErrorCode::StoreConstraintViolation
        }
        _ => ErrorCode::StoreOperationFailed,
    };
    RewindError::store_with_source(code, format!("{}: {}", context, err), err)
}

#[async_trait]
impl BaseStore for SqliteStore {
    async fn create(&self, record: Record) -> RewindResult<Record> {
        let mut created = self.create_batch(vec![record]).await?;
        created
            .pop()
            .ok_or_else(|| RewindError::Internal("create_batch returned no row".to_string()))
    }

    async fn create_batch(&self, records: Vec<Record>) -> RewindResult<Vec<Record>> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let mut created = Vec::with_capacity(records.len());
        for record in records {
            created.push(self.insert(&tx, record)?);
        }
        tx.commit().map_err(|e| sql_error("Failed to commit insert", e))?;

        tracing::debug!(entity = %self.schema.name, count = created.len(), "Inserted rows");
        Ok(created)
    }

    async fn find(&self, filter: Option<Filter>) -> RewindResult<Vec<Record>> {
        let conn = self.lock()?;
        Ok(self
            .matching(&conn, filter.as_ref())?
            .into_iter()
            .map(|(_, r)| r)
            .collect())
    }

    async fn find_by_id(&self, id: &str) -> RewindResult<Record> {
        let conn = self.lock()?;
        self.find_seq(&conn, id)?
            .map(|(_, r)| r)
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))
    }

    async fn count(&self, filter: Option<Filter>) -> RewindResult<usize> {
        let conn = self.lock()?;
        match filter {
            None => {
                let count: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", self.table()), [], |row| {
                        row.get(0)
                    })
                    .map_err(|e| sql_error("Failed to count rows", e))?;
                Ok(count as usize)
            }
            Some(filter) => Ok(self.matching(&conn, Some(&filter))?.len()),
        }
    }

    async fn update_batch(&self, partial: Record, filter: Option<Filter>) -> RewindResult<usize> {
        let partial = self.without_key(partial);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let targets = self.matching(&tx, filter.as_ref())?;
        for (seq, mut record) in targets.iter().cloned() {
            record.merge(&partial);
            self.write_body(&tx, seq, &record)?;
        }
        tx.commit().map_err(|e| sql_error("Failed to commit update", e))?;

        tracing::debug!(entity = %self.schema.name, affected = targets.len(), "Updated rows");
        Ok(targets.len())
    }

    async fn update_by_id(&self, id: &str, partial: Record) -> RewindResult<()> {
        let partial = self.without_key(partial);
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let (seq, mut record) = self
            .find_seq(&tx, id)?
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))?;
        record.merge(&partial);
        self.write_body(&tx, seq, &record)?;
        tx.commit().map_err(|e| sql_error("Failed to commit update", e))?;
        Ok(())
    }

    async fn replace_by_id(&self, id: &str, record: Record) -> RewindResult<()> {
        let mut replacement = self.without_key(record);
        replacement.set(self.schema.primary_key.clone(), id);

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let (seq, _) = self
            .find_seq(&tx, id)?
            .ok_or_else(|| RewindError::not_found(&self.schema.name, id))?;
        self.write_body(&tx, seq, &replacement)?;
        tx.commit().map_err(|e| sql_error("Failed to commit replace", e))?;
        Ok(())
    }

    async fn delete_batch(&self, filter: Option<Filter>) -> RewindResult<usize> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| sql_error("Failed to begin transaction", e))?;

        let targets = self.matching(&tx, filter.as_ref())?;
        let sql = format!("DELETE FROM {} WHERE seq = ?1", self.table());
        for (seq, _) in &targets {
            tx.execute(&sql, params![seq])
                .map_err(|e| sql_error("Failed to delete row", e))?;
        }
        tx.commit().map_err(|e| sql_error("Failed to commit delete", e))?;

        tracing::debug!(entity = %self.schema.name, deleted = targets.len(), "Deleted rows");
        Ok(targets.len())
    }

    async fn delete_by_id(&self, id: &str) -> RewindResult<()> {
        let conn = self.lock()?;
        let deleted = conn
            .execute(
                &format!("DELETE FROM {} WHERE pk = ?1", self.table()),
                params![id],
            )
            .map_err(|e| sql_error(&format!("Failed to delete row '{}'", id), e))?;

        if deleted == 0 {
            return Err(RewindError::not_found(&self.schema.name, id));
        }
        Ok(())
    }

    fn schema(&self) -> &EntitySchema {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn create_test_store(enforce: bool) -> SqliteStore {
        SqliteStore::in_memory(EntitySchema::new("Product").with_unique("code"), enforce).unwrap()
    }

    fn open_row(id: &str, code: &str) -> Record {
        Record::new()
            .with("id", id)
            .with("code", code)
            .with("validFrom", "2024-01-01T00:00:00.000000Z")
            .with("validUntil", Value::Null)
    }

    #[tokio::test]
    async fn test_insert_and_find_preserve_order() {
        let store = create_test_store(false);
        store
            .create_batch(vec![open_row("a", "X"), open_row("b", "Y"), open_row("c", "Z")])
            .await
            .unwrap();

        let rows = store.find(None).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id().unwrap()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(rows.iter().all(|r| r.version_id().is_some()));

        let key = rows[1].version_id().unwrap();
        let fetched = store.find_by_id(key).await.unwrap();
        assert_eq!(fetched.get_str("code"), Some("Y"));
    }

    #[tokio::test]
    async fn test_update_batch_and_count() {
        let store = create_test_store(false);
        store
            .create_batch(vec![open_row("a", "X"), open_row("b", "Y")])
            .await
            .unwrap();

        let closed = store
            .update_batch(
                Record::new().with("validUntil", "2024-02-01T00:00:00.000000Z"),
                Some(Filter::eq("id", "a")),
            )
            .await
            .unwrap();
        assert_eq!(closed, 1);
        assert_eq!(store.count(Some(Filter::is_null("validUntil"))).await.unwrap(), 1);
        assert_eq!(store.count(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_is_duplicate_key() {
        let store = create_test_store(false);
        store
            .create(open_row("a", "X").with("versionId", "v1"))
            .await
            .unwrap();

        let err = store
            .create(open_row("b", "Y").with("versionId", "v1"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreDuplicateKey);
    }

    #[tokio::test]
    async fn test_non_string_primary_key_is_rejected() {
        let store = create_test_store(false);

        let err = store
            .create(open_row("a", "X").with("versionId", 5))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_quoted_names_are_escaped() {
        let schema = EntitySchema::new(r#"Odd "Entity" 'x'"#).with_unique("it's");
        let store = SqliteStore::in_memory(schema, true).unwrap();

        store
            .create(open_row("a", "ignored").with("it's", "X"))
            .await
            .unwrap();
        let err = store
            .create(open_row("b", "ignored").with("it's", "X"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreConstraintViolation);

        let unenforceable = EntitySchema::new("Product").with_unique(r#"a"b"#);
        let err = SqliteStore::in_memory(unenforceable, true).err().unwrap();
        assert!(matches!(err, RewindError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_trigger_rejects_open_duplicate_across_ids() {
        let store = create_test_store(true);
        store.create(open_row("a", "X")).await.unwrap();

        // Same logical id may hold the value twice while a successor is opened.
        store.create(open_row("a", "X")).await.unwrap();

        let err = store.create(open_row("b", "X")).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::StoreConstraintViolation);

        // Closed rows and empty values never collide.
        store
            .update_batch(
                Record::new().with("validUntil", "2024-02-01T00:00:00.000000Z"),
                Some(Filter::eq("id", "a")),
            )
            .await
            .unwrap();
        store.create(open_row("b", "X")).await.unwrap();
        store.create(open_row("c", "")).await.unwrap();
        store.create(open_row("d", "")).await.unwrap();
    }

    #[tokio::test]
    async fn test_by_id_operations() {
        let store = create_test_store(false);
        store
            .create(open_row("a", "X").with("versionId", "v1"))
            .await
            .unwrap();

        store
            .update_by_id("v1", Record::new().with("name", "n"))
            .await
            .unwrap();
        assert_eq!(store.find_by_id("v1").await.unwrap().get_str("name"), Some("n"));

        store
            .replace_by_id("v1", Record::new().with("only", 1))
            .await
            .unwrap();
        let replaced = store.find_by_id("v1").await.unwrap();
        assert!(replaced.get("name").is_none());
        assert_eq!(replaced.version_id(), Some("v1"));

        store.delete_by_id("v1").await.unwrap();
        assert!(store.delete_by_id("v1").await.unwrap_err().is_not_found());
        assert!(store.find_by_id("v1").await.unwrap_err().is_not_found());
    }
}
