//! relmap Store - SQLite backend for the mapping engine
//!
//! Provides:
//! - Statement execution with nested transaction control
//! - Atomic id allocation from the shared sequence table
//! - Embedded, checksummed migrations
//! - Table DDL generated from type metadata

pub mod db;
pub mod errors;
pub mod executor;
pub mod migrations;
pub mod schema;
pub mod sequence;

// Re-export key types
pub use db::open_session;
pub use errors::Result;
pub use executor::SqliteExecutor;
pub use sequence::SqliteSequence;
