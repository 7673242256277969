//! Translation of logical reads into physical predicates over version rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::RewindResult;
use crate::traits::BaseStore;
use crate::types::{
    timestamp_value, Filter, Record, ID_FIELD, VALID_FROM_FIELD, VALID_UNTIL_FIELD,
};

/// Rewrite a caller filter over logical entities into one over version rows.
///
/// Without `max_date` only open versions match. With it, a version matches
/// when it was opened strictly before `max_date` and was still open at it.
pub fn translate(filter: Option<Filter>, max_date: Option<DateTime<Utc>>) -> Filter {
    match max_date {
        None => Filter::and_optional(filter, Filter::is_null(VALID_UNTIL_FIELD)),
        Some(at) => {
            let bound = timestamp_value(at);
            let mut parts = match filter {
                None => Vec::new(),
                Some(Filter::And(parts)) => parts,
                Some(other) => vec![other],
            };
            parts.push(Filter::lt(VALID_FROM_FIELD, bound.clone()));
            parts.push(Filter::or(vec![
                Filter::is_null(VALID_UNTIL_FIELD),
                Filter::gte(VALID_UNTIL_FIELD, bound),
            ]));
            Filter::And(parts)
        }
    }
}

/// Keep one version per logical id: the latest `validFrom`, ties going to
/// the greatest primary key. Ids keep the order of their first row.
pub fn collapse(rows: Vec<Record>, primary_key: &str) -> Vec<Record> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut kept: Vec<Record> = Vec::with_capacity(rows.len());

    for row in rows {
        let Some(id) = row.id().map(str::to_owned) else {
            kept.push(row);
            continue;
        };
        match slots.get(&id) {
            Some(&slot) => {
                if supersedes(&row, &kept[slot], primary_key) {
                    kept[slot] = row;
                }
            }
            None => {
                slots.insert(id, kept.len());
                kept.push(row);
            }
        }
    }

    kept
}

fn supersedes(candidate: &Record, current: &Record, primary_key: &str) -> bool {
    let rank = |r: &Record| {
        (
            r.valid_from(),
            r.get(primary_key).map(|v| match v.as_str() {
                Some(s) => s.to_owned(),
                None => v.to_string(),
            }),
        )
    };
    rank(candidate) > rank(current)
}

/// Read side of the versioning layer.
pub struct HistoryQuery<'a> {
    store: &'a dyn BaseStore,
}

impl<'a> HistoryQuery<'a> {
    /// Create a query runner over a store.
    pub fn new(store: &'a dyn BaseStore) -> Self {
        Self { store }
    }

    /// Versions visible to a logical read, one per logical id.
    pub async fn find(
        &self,
        filter: Option<Filter>,
        max_date: Option<DateTime<Utc>>,
    ) -> RewindResult<Vec<Record>> {
        let physical = translate(filter, max_date);
        let rows = self.store.find(Some(physical)).await?;

        // At most one open version per id, so current reads need no grouping.
        if max_date.is_none() {
            return Ok(rows);
        }
        Ok(collapse(rows, &self.store.schema().primary_key))
    }

    /// Every version of one logical id, oldest first.
    pub async fn versions_of(&self, id: &str) -> RewindResult<Vec<Record>> {
        let primary_key = &self.store.schema().primary_key;
        let mut rows = self.store.find(Some(Filter::eq(ID_FIELD, id))).await?;
        rows.sort_by(|a, b| {
            a.valid_from()
                .cmp(&b.valid_from())
                .then_with(|| a.get_str(primary_key).cmp(&b.get_str(primary_key)))
        });
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockBaseStore;
    use crate::types::EntitySchema;
    use chrono::TimeZone;
    use mockall::predicate::eq;
    use serde_json::{json, Value};

    fn row(id: &str, version: &str, from: &str, until: Option<&str>) -> Record {
        Record::new()
            .with("id", id)
            .with("versionId", version)
            .with("validFrom", from)
            .with("validUntil", until.map_or(Value::Null, |u| json!(u)))
    }

    #[test]
    fn test_translate_current() {
        let filter = translate(Some(Filter::eq("code", "X")), None);
        assert_eq!(
            filter,
            Filter::and(vec![Filter::eq("code", "X"), Filter::is_null("validUntil")])
        );
    }

    #[test]
    fn test_translate_point_in_time() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let filter = translate(None, Some(at));

        let before = row("a", "v1", "2024-01-01T00:00:00.000000Z", Some("2024-01-03T00:00:00.000000Z"));
        let after = row("a", "v2", "2024-01-03T00:00:00.000000Z", None);
        let closed_before = row("b", "v3", "2023-12-01T00:00:00.000000Z", Some("2024-01-01T00:00:00.000000Z"));
        let opened_at_bound = row("c", "v4", "2024-01-02T00:00:00.000000Z", None);

        assert!(filter.matches(before.fields()));
        assert!(!filter.matches(after.fields()));
        assert!(!filter.matches(closed_before.fields()));
        assert!(!filter.matches(opened_at_bound.fields()));
    }

    #[test]
    fn test_collapse_keeps_latest_per_id() {
        let rows = vec![
            row("a", "v1", "2024-01-01T00:00:00.000000Z", Some("2024-01-02T00:00:00.000000Z")),
            row("b", "v2", "2024-01-01T00:00:00.000000Z", None),
            row("a", "v3", "2024-01-02T00:00:00.000000Z", None),
        ];
        let kept = collapse(rows, "versionId");
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].version_id(), Some("v3"));
        assert_eq!(kept[1].version_id(), Some("v2"));
    }

    #[test]
    fn test_collapse_tie_breaks_on_greatest_key() {
        let rows = vec![
            row("a", "v9", "2024-01-01T00:00:00.000000Z", None),
            row("a", "v2", "2024-01-01T00:00:00.000000Z", None),
        ];
        let kept = collapse(rows, "versionId");
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].version_id(), Some("v9"));
    }

    #[tokio::test]
    async fn test_versions_of_sorted_oldest_first() {
        let mut store = MockBaseStore::new();
        store.expect_schema().return_const(EntitySchema::new("Product"));
        store
            .expect_find()
            .with(eq(Some(Filter::eq("id", "a"))))
            .returning(|_| {
                Ok(vec![
                    row("a", "v2", "2024-01-02T00:00:00.000000Z", None),
                    row("a", "v1", "2024-01-01T00:00:00.000000Z", Some("2024-01-02T00:00:00.000000Z")),
                ])
            });

        let query = HistoryQuery::new(&store);
        let versions = query.versions_of("a").await.unwrap();
        assert_eq!(versions[0].version_id(), Some("v1"));
        assert_eq!(versions[1].version_id(), Some("v2"));
    }
}
