//! Uniqueness checks scoped to open versions.

use std::collections::HashSet;

use serde_json::Value;

use crate::error::{ErrorCode, RewindError, RewindResult};
use crate::traits::BaseStore;
use crate::types::{equality_key, Filter, Record, VALID_UNTIL_FIELD};

/// Rejects writes that would leave two open versions of different logical
/// entities sharing a value in a unique field.
///
/// Checks run before any write and hold nothing across the gap to it.
pub struct UniquenessValidator<'a> {
    store: &'a dyn BaseStore,
}

impl<'a> UniquenessValidator<'a> {
    /// Create a validator over a store.
    pub fn new(store: &'a dyn BaseStore) -> Self {
        Self { store }
    }

    /// Validate a batch of new entities.
    pub async fn validate_create_batch(&self, candidates: &[Record]) -> RewindResult<()> {
        let schema = self.store.schema();
        if !schema.has_unique_fields() || candidates.is_empty() {
            return Ok(());
        }

        let mut values = Vec::new();
        for field in &schema.unique_fields {
            let mut seen = HashSet::new();
            for candidate in candidates {
                let Some(value) = unique_value(candidate, field) else {
                    continue;
                };
                if !seen.insert(equality_key(value)) {
                    tracing::warn!(
                        entity = %schema.name,
                        field = %field,
                        "Rejected batch with duplicate unique value"
                    );
                    return Err(RewindError::uniqueness(
                        ErrorCode::UnqBatchDuplicate,
                        &schema.name,
                        &schema.unique_fields,
                        format!("batch repeats a value of unique field '{}'", field),
                    )
                    .with_collision(field.clone(), value.clone()));
                }
                values.push((field.clone(), value.clone()));
            }
        }

        self.check_open_duplicates(values, None).await
    }

    /// Validate an update of the entities matched by `target`.
    pub async fn validate_update(
        &self,
        new_data: &Record,
        target: Option<&Filter>,
    ) -> RewindResult<()> {
        let schema = self.store.schema();
        if !schema.has_unique_fields() {
            return Ok(());
        }

        let values: Vec<(String, Value)> = schema
            .unique_fields
            .iter()
            .filter_map(|field| unique_value(new_data, field).map(|v| (field.clone(), v.clone())))
            .collect();

        // The target's own open rows may already hold the values being written.
        let own_rows = target.cloned().unwrap_or_else(|| Filter::And(Vec::new()));
        self.check_open_duplicates(values, Some(own_rows)).await?;

        let open_targets = self
            .store
            .count(Some(Filter::and_optional(
                target.cloned(),
                Filter::is_null(VALID_UNTIL_FIELD),
            )))
            .await?;
        if open_targets > 1 {
            tracing::warn!(
                entity = %schema.name,
                matched = open_targets,
                "Rejected multi-entity update under uniqueness constraints"
            );
            return Err(RewindError::uniqueness(
                ErrorCode::UnqAmbiguousUpdate,
                &schema.name,
                &schema.unique_fields,
                format!(
                    "update matches {} entities while unique fields are declared",
                    open_targets
                ),
            ));
        }

        Ok(())
    }

    async fn check_open_duplicates(
        &self,
        values: Vec<(String, Value)>,
        exclude: Option<Filter>,
    ) -> RewindResult<()> {
        if values.is_empty() {
            return Ok(());
        }
        let schema = self.store.schema();

        let collision = match values.as_slice() {
            [(field, value)] => Some((field.clone(), value.clone())),
            _ => None,
        };

        let any_value = Filter::or(
            values
                .into_iter()
                .map(|(field, value)| Filter::eq(field, value))
                .collect(),
        );
        let mut parts = vec![Filter::is_null(VALID_UNTIL_FIELD), any_value];
        if let Some(exclude) = exclude {
            parts.push(Filter::not(exclude));
        }

        let count = self.store.count(Some(Filter::and(parts))).await?;
        if count == 0 {
            return Ok(());
        }

        tracing::warn!(
            entity = %schema.name,
            existing = count,
            "Rejected write colliding with open versions"
        );
        let err = RewindError::uniqueness(
            ErrorCode::UnqStoreDuplicate,
            &schema.name,
            &schema.unique_fields,
            "an open version already holds a unique value",
        );
        Err(match collision {
            Some((field, value)) => err.with_collision(field, value),
            None => err,
        })
    }
}

/// A unique field's value when it takes part in checks: absent, null and
/// empty strings never collide.
fn unique_value<'r>(record: &'r Record, field: &str) -> Option<&'r Value> {
    match record.get(field)? {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        value => Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MockBaseStore;
    use crate::types::EntitySchema;
    use serde_json::json;
    use tokio_test::block_on;

    fn product_store() -> MockBaseStore {
        let mut store = MockBaseStore::new();
        store
            .expect_schema()
            .return_const(EntitySchema::new("Product").with_unique("code"));
        store
    }

    #[tokio::test]
    async fn test_batch_duplicate_rejected_without_store_query() {
        let mut store = product_store();
        store.expect_count().never();

        let validator = UniquenessValidator::new(&store);
        let batch = vec![
            Record::new().with("code", "X"),
            Record::new().with("code", "Y"),
            Record::new().with("code", "X"),
        ];
        let err = validator.validate_create_batch(&batch).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnqBatchDuplicate);
    }

    #[test]
    fn test_batch_duplicate_across_number_notations() {
        let mut store = product_store();
        store.expect_count().never();

        let validator = UniquenessValidator::new(&store);
        let batch = vec![Record::new().with("code", 1), Record::new().with("code", 1.0)];
        let err = tokio_test::assert_err!(block_on(validator.validate_create_batch(&batch)));
        assert_eq!(err.code(), ErrorCode::UnqBatchDuplicate);

        let batch = vec![
            Record::new().with("code", "2024-01-01T00:00:00Z"),
            Record::new().with("code", "2024-01-01T00:00:00+00:00"),
        ];
        let err = tokio_test::assert_err!(block_on(validator.validate_create_batch(&batch)));
        assert_eq!(err.code(), ErrorCode::UnqBatchDuplicate);
    }

    #[test]
    fn test_string_and_number_are_distinct() {
        let mut store = product_store();
        store.expect_count().times(1).returning(|_| Ok(0));

        let validator = UniquenessValidator::new(&store);
        let batch = vec![Record::new().with("code", 1), Record::new().with("code", "1")];
        tokio_test::assert_ok!(block_on(validator.validate_create_batch(&batch)));
    }

    #[tokio::test]
    async fn test_empty_values_are_ignored() {
        let mut store = product_store();
        store.expect_count().never();

        let validator = UniquenessValidator::new(&store);
        let batch = vec![
            Record::new().with("code", ""),
            Record::new().with("code", ""),
            Record::new().with("code", Value::Null),
            Record::new().with("name", "no code"),
        ];
        validator.validate_create_batch(&batch).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_duplicate_builds_open_disjunction() {
        let mut store = product_store();
        store
            .expect_count()
            .withf(|filter| {
                *filter
                    == Some(Filter::and(vec![
                        Filter::is_null("validUntil"),
                        Filter::or(vec![Filter::eq("code", "X"), Filter::eq("code", "Y")]),
                    ]))
            })
            .times(1)
            .returning(|_| Ok(1));

        let validator = UniquenessValidator::new(&store);
        let batch = vec![Record::new().with("code", "X"), Record::new().with("code", "Y")];
        let err = validator.validate_create_batch(&batch).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnqStoreDuplicate);
    }

    #[tokio::test]
    async fn test_update_excludes_target_and_checks_multiplicity() {
        let mut store = product_store();
        let target = Filter::eq("id", "a");
        let expected_dupe = Filter::and(vec![
            Filter::is_null("validUntil"),
            Filter::or(vec![Filter::eq("code", "X")]),
            Filter::not(target.clone()),
        ]);
        let expected_targets =
            Filter::and(vec![Filter::eq("id", "a"), Filter::is_null("validUntil")]);

        let mut seq = mockall::Sequence::new();
        store
            .expect_count()
            .withf(move |f| *f == Some(expected_dupe.clone()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(0));
        store
            .expect_count()
            .withf(move |f| *f == Some(expected_targets.clone()))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(1));

        let validator = UniquenessValidator::new(&store);
        validator
            .validate_update(&Record::new().with("code", "X"), Some(&target))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_matching_many_rejected() {
        let mut store = product_store();
        store.expect_count().times(1).returning(|_| Ok(2));

        let validator = UniquenessValidator::new(&store);
        let err = validator
            .validate_update(&Record::new().with("name", "n"), Some(&Filter::eq("kind", "k")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnqAmbiguousUpdate);
    }

    #[tokio::test]
    async fn test_no_unique_fields_skips_everything() {
        let mut store = MockBaseStore::new();
        store
            .expect_schema()
            .return_const(EntitySchema::new("Note"));
        store.expect_count().never();

        let validator = UniquenessValidator::new(&store);
        validator
            .validate_create_batch(&[Record::new().with("code", "X")])
            .await
            .unwrap();
        validator
            .validate_update(&Record::from_value(json!({"code": "X"})).unwrap(), None)
            .await
            .unwrap();
    }
}
