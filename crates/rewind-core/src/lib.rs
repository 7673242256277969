//! rewind-core - Core library for rewind.
//!
//! This crate provides the record and filter types, the base store and
//! clock traits, and the [`VersionedRepository`] that layers interval
//! versioning over any [`BaseStore`].
//!
//! # Example
//!
//! ```ignore
//! use rewind_core::{Filter, QueryOptions, Record, VersionedRepository};
//!
//! let repo = VersionedRepository::new(store);
//!
//! let created = repo.create(Record::new().with("code", "X"), None).await?;
//! let id = created.id().unwrap().to_string();
//!
//! repo.update_by_id(&id, Record::new().with("name", "renamed"), None).await?;
//!
//! // Current state, then every physical version.
//! let current = repo.find_by_id(&id, None).await?;
//! let rows = repo.find(Some(Filter::eq("id", id.as_str())), Some(QueryOptions::history())).await?;
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod types;
pub mod versioning;

// Re-export commonly used types
pub use config::{RewindConfig, StoreConfig, StoreProvider};
pub use error::{ErrorCode, RewindError, RewindResult};
pub use traits::{BaseStore, Clock, ManualClock, SystemClock};
pub use types::{EntitySchema, Filter, FilterCondition, FilterOperator, QueryOptions, Record};
pub use versioning::VersionedRepository;
