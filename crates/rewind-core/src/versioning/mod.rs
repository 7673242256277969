//! Temporal versioning over a base store.
//!
//! Logical writes never mutate rows in place: an update closes the open
//! version (`validUntil = now`) and opens a successor under the same `id`,
//! a delete only closes. Reads see either the open versions or, with a
//! point-in-time bound, the version each entity had just before it.

mod query;
mod repository;
mod validator;
mod writer;

pub use query::{collapse, translate, HistoryQuery};
pub use repository::VersionedRepository;
pub use validator::UniquenessValidator;
pub use writer::HistoryWriter;
