//! Filter types for record queries.

use std::cmp::Ordering;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Filter operator for field queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to.
    Eq(Value),
    /// Not equal to.
    Ne(Value),
    /// Greater than.
    Gt(Value),
    /// Greater than or equal to.
    Gte(Value),
    /// Less than.
    Lt(Value),
    /// Less than or equal to.
    Lte(Value),
    /// In list.
    In(Vec<Value>),
    /// Not in list.
    Nin(Vec<Value>),
    /// Contains substring.
    Contains(String),
    /// Between range (inclusive).
    Between { min: Value, max: Value },
    /// Absent or null.
    IsNull,
    /// Present and not null.
    IsNotNull,
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    /// Field name to filter on.
    pub field: String,
    /// Operator to apply.
    pub operator: FilterOperator,
}

impl FilterCondition {
    /// Create a condition from a field and operator.
    pub fn new(field: impl Into<String>, operator: FilterOperator) -> Self {
        Self {
            field: field.into(),
            operator,
        }
    }

    /// Check the condition against a record's fields.
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        let field_value = fields.get(&self.field).filter(|v| !v.is_null());
        match &self.operator {
            FilterOperator::Eq(v) => field_value.map_or(v.is_null(), |fv| values_equal(fv, v)),
            FilterOperator::Ne(v) => !field_value.map_or(v.is_null(), |fv| values_equal(fv, v)),
            FilterOperator::In(values) => {
                field_value.map_or(false, |fv| values.iter().any(|v| values_equal(fv, v)))
            }
            FilterOperator::Nin(values) => {
                field_value.map_or(true, |fv| !values.iter().any(|v| values_equal(fv, v)))
            }
            FilterOperator::Contains(s) => field_value
                .and_then(|v| v.as_str())
                .map_or(false, |fv| fv.contains(s.as_str())),
            FilterOperator::Gt(v) => compare(field_value, v) == Some(Ordering::Greater),
            FilterOperator::Gte(v) => matches!(
                compare(field_value, v),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lt(v) => compare(field_value, v) == Some(Ordering::Less),
            FilterOperator::Lte(v) => matches!(
                compare(field_value, v),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Between { min, max } => {
                matches!(
                    compare(field_value, min),
                    Some(Ordering::Greater | Ordering::Equal)
                ) && matches!(
                    compare(field_value, max),
                    Some(Ordering::Less | Ordering::Equal)
                )
            }
            FilterOperator::IsNull => field_value.is_none(),
            FilterOperator::IsNotNull => field_value.is_some(),
        }
    }
}

/// Composite filter with AND/OR/NOT logic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Single condition.
    Condition(FilterCondition),
    /// AND of multiple filters. Empty matches everything.
    And(Vec<Filter>),
    /// OR of multiple filters. Empty matches nothing.
    Or(Vec<Filter>),
    /// NOT of a filter.
    Not(Box<Filter>),
}

impl Filter {
    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Eq(value.into())))
    }

    /// Create an inequality filter.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Ne(value.into())))
    }

    /// Create a greater than filter.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Gt(value.into())))
    }

    /// Create a greater than or equal filter.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Gte(value.into())))
    }

    /// Create a less than filter.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Lt(value.into())))
    }

    /// Create a less than or equal filter.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Lte(value.into())))
    }

    /// Create an in-list filter.
    pub fn in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::In(values)))
    }

    /// Create a not-in-list filter.
    pub fn not_in_list(field: impl Into<String>, values: Vec<Value>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::Nin(values)))
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::new(
            field,
            FilterOperator::Contains(value.into()),
        ))
    }

    /// Create a range filter.
    pub fn between(
        field: impl Into<String>,
        min: impl Into<Value>,
        max: impl Into<Value>,
    ) -> Self {
        Filter::Condition(FilterCondition::new(
            field,
            FilterOperator::Between {
                min: min.into(),
                max: max.into(),
            },
        ))
    }

    /// Create an is null filter.
    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::IsNull))
    }

    /// Create an is not null filter.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Filter::Condition(FilterCondition::new(field, FilterOperator::IsNotNull))
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Create a NOT filter.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Conjoin an optional caller filter with an extra condition.
    ///
    /// A caller-supplied `And` is flattened so translated predicates stay one level deep.
    pub fn and_optional(filter: Option<Filter>, extra: Filter) -> Self {
        match filter {
            None => extra,
            Some(Filter::And(mut filters)) => {
                filters.push(extra);
                Filter::And(filters)
            }
            Some(other) => Filter::And(vec![other, extra]),
        }
    }

    /// Build an AND of equality conditions from a field map.
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        let mut conditions: Vec<Filter> = fields
            .iter()
            .map(|(k, v)| Filter::eq(k.clone(), v.clone()))
            .collect();

        if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Filter::And(conditions)
        }
    }

    /// Check if a record's fields match this filter.
    pub fn matches(&self, fields: &Map<String, Value>) -> bool {
        match self {
            Filter::Condition(cond) => cond.matches(fields),
            Filter::And(filters) => filters.iter().all(|f| f.matches(fields)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(fields)),
            Filter::Not(filter) => !filter.matches(fields),
        }
    }
}

/// Check an optional filter, where `None` matches every record.
pub fn matches_optional(filter: Option<&Filter>, fields: &Map<String, Value>) -> bool {
    filter.map_or(true, |f| f.matches(fields))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) | (Value::String(_), Value::String(_)) => {
            compare(Some(a), b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

/// Canonical form of a value under `Eq`: two values are equal exactly when
/// their keys are.
pub fn equality_key(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) => format!("n:{}", f + 0.0),
            None => format!("n:{}", n),
        },
        Value::String(s) => match parse_timestamp(s) {
            Some(ts) => format!("t:{}", ts.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            None => format!("s:{}", s),
        },
        other => other.to_string(),
    }
}

/// Order two JSON values: numbers numerically, RFC 3339 strings
/// chronologically, other strings lexically. Mixed kinds do not compare.
fn compare(field_value: Option<&Value>, compare_to: &Value) -> Option<Ordering> {
    match (field_value?, compare_to) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(at), Some(bt)) => Some(at.cmp(&bt)),
            _ => Some(a.cmp(b)),
        },
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_eq_and_null_semantics() {
        let row = fields(json!({"code": "X", "validUntil": null}));

        assert!(Filter::eq("code", "X").matches(&row));
        assert!(!Filter::eq("code", "Y").matches(&row));
        assert!(Filter::is_null("validUntil").matches(&row));
        assert!(Filter::is_null("missing").matches(&row));
        assert!(Filter::is_not_null("code").matches(&row));
        assert!(Filter::eq("validUntil", Value::Null).matches(&row));
    }

    #[test]
    fn test_timestamp_comparison_is_chronological() {
        // Different offsets: lexical order disagrees with chronological order.
        let row = fields(json!({"validFrom": "2024-01-01T10:00:00+02:00"}));

        assert!(Filter::lt("validFrom", "2024-01-01T09:00:00Z").matches(&row));
        assert!(!Filter::gt("validFrom", "2024-01-01T09:00:00Z").matches(&row));
        assert!(Filter::gte("validFrom", "2024-01-01T08:00:00Z").matches(&row));
    }

    #[test]
    fn test_numeric_comparison() {
        let row = fields(json!({"price": 10}));

        assert!(Filter::eq("price", 10.0).matches(&row));
        assert!(Filter::between("price", 5, 10).matches(&row));
        assert!(!Filter::gt("price", 10).matches(&row));
        assert!(!Filter::lt("price", "11").matches(&row));
    }

    #[test]
    fn test_composites() {
        let row = fields(json!({"code": "X", "name": "widget"}));

        let filter = Filter::and(vec![
            Filter::eq("code", "X"),
            Filter::or(vec![Filter::eq("name", "gadget"), Filter::contains("name", "widg")]),
        ]);
        assert!(filter.matches(&row));
        assert!(!Filter::not(filter).matches(&row));
        assert!(Filter::And(vec![]).matches(&row));
        assert!(!Filter::Or(vec![]).matches(&row));
        assert!(Filter::in_list("code", vec![json!("Y"), json!("X")]).matches(&row));
        assert!(Filter::not_in_list("code", vec![json!("Y")]).matches(&row));
    }

    #[test]
    fn test_and_optional_flattens() {
        let caller = Filter::and(vec![Filter::eq("a", 1), Filter::eq("b", 2)]);
        let combined = Filter::and_optional(Some(caller), Filter::is_null("validUntil"));
        match combined {
            Filter::And(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }

        let bare = Filter::and_optional(None, Filter::is_null("validUntil"));
        assert_eq!(bare, Filter::is_null("validUntil"));
    }

    #[test]
    fn test_equal_timestamps_in_different_notation() {
        let row = fields(json!({"at": "2024-01-01T00:00:00Z"}));

        assert!(Filter::eq("at", "2024-01-01T00:00:00+00:00").matches(&row));
        assert!(Filter::eq("at", "2024-01-01T02:00:00.000000+02:00").matches(&row));
        assert!(!Filter::ne("at", "2024-01-01T00:00:00+00:00").matches(&row));
        assert!(Filter::in_list("at", vec![json!("2024-01-01T00:00:00.000+00:00")]).matches(&row));
    }

    #[test]
    fn test_equality_key_agrees_with_eq() {
        let pairs = [
            (json!(1), json!(1.0)),
            (json!(0.0), json!(-0.0)),
            (json!("2024-01-01T00:00:00Z"), json!("2024-01-01T01:00:00+01:00")),
            (json!("X"), json!("X")),
            (json!(1), json!("1")),
            (json!("X"), json!("Y")),
            (json!(true), json!(1)),
        ];
        for (a, b) in pairs {
            let row = fields(json!({ "v": a.clone() }));
            assert_eq!(
                Filter::eq("v", b.clone()).matches(&row),
                equality_key(&a) == equality_key(&b),
                "{a} vs {b}"
            );
        }
    }

    #[test]
    fn test_from_fields() {
        let filter = Filter::from_fields(&fields(json!({"code": "X"})));
        assert_eq!(filter, Filter::eq("code", "X"));
    }
}
