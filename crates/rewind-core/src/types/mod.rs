//! Core types for rewind.

mod filter;
mod options;
mod record;
mod schema;

pub use filter::*;
pub use options::QueryOptions;
pub use record::*;
pub use schema::EntitySchema;
