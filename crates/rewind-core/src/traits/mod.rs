//! Core traits for rewind collaborators.

mod base_store;
mod clock;

pub use base_store::*;
pub use clock::*;
