//! rewind-stores - Base store implementations for rewind.
//!
//! This crate provides the row stores the versioning layer in
//! `rewind-core` writes its version rows to.
//!
//! # Supported Backends
//!
//! - **Memory** (always available) - Process-local rows, for tests and caches
//! - **SQLite** (feature: `sqlite`) - JSON row bodies in a SQLite table, with
//!   optional store-level uniqueness among open versions

mod factory;
mod memory;

#[cfg(feature = "sqlite")]
mod sqlite;

// Public exports
pub use factory::StoreFactory;
pub use memory::MemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

// Re-export core types for convenience
pub use rewind_core::traits::BaseStore;
pub use rewind_core::types::{EntitySchema, Filter, QueryOptions, Record};
pub use rewind_core::versioning::VersionedRepository;
