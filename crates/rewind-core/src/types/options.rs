//! Per-call options for repository operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Options recognised by every repository verb.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    /// Bypass versioning and act on physical rows.
    #[serde(default)]
    pub history: bool,
    /// Read state as of this instant instead of the current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_date: Option<DateTime<Utc>>,
}

impl QueryOptions {
    /// Options for a raw, history-mode call.
    pub fn history() -> Self {
        Self {
            history: true,
            max_date: None,
        }
    }

    /// Options for a point-in-time read at `max_date`.
    pub fn as_of(max_date: DateTime<Utc>) -> Self {
        Self {
            history: false,
            max_date: Some(max_date),
        }
    }

    /// Whether versioning is bypassed.
    pub fn is_bypass(options: Option<&QueryOptions>) -> bool {
        options.map_or(false, |o| o.history)
    }
}
