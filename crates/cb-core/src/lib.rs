//! cb-core: shared types, IDs, errors, configuration, job messages and the
//! message bus.
//!
//! This crate is the foundational dependency for all other cb-* crates. It
//! carries no network or database code of its own; it defines the vocabulary
//! the importer, the store and the server agree on.

pub mod bus;
pub mod config;
pub mod error;
pub mod ids;
pub mod jobs;
pub mod work;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use ids::*;
