//! cb-db: database access and persistence layer.
//!
//! SQLite-backed storage with connection pooling, embedded migrations,
//! typed models and one query module per table. Every write is a single
//! independently committed statement; imports never span a transaction
//! across rows.

pub mod migrations;
pub mod models;
pub mod pool;
pub mod queries;
