//! Storage collaborator interfaces
//!
//! The core never talks to a database driver directly. A backend provides
//! statement execution with transaction control and a sequence allocator
//! for new primary keys.

use std::collections::BTreeMap;

use crate::errors::Result;
use crate::model::Value;
use crate::query::SqlStatement;

/// One result row keyed by column alias
pub type Row = BTreeMap<String, Value>;

pub trait StatementExecutor {
    /// Run a query and return its rows
    ///
    /// # Errors
    ///
    /// Returns `Persistence` carrying the statement on failure.
    fn execute_query(&self, statement: &SqlStatement) -> Result<Vec<Row>>;

    /// Run a data-changing statement and return the affected row count
    ///
    /// # Errors
    ///
    /// Returns `Persistence` carrying the statement on failure.
    fn execute_statement(&self, statement: &SqlStatement) -> Result<usize>;

    /// # Errors
    ///
    /// Returns `Persistence` if the backend cannot start a transaction.
    fn begin(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Persistence` if the commit fails; the transaction then
    /// stays open for a rollback.
    fn commit(&self) -> Result<()>;

    /// # Errors
    ///
    /// Returns `Persistence` if the backend rejects the rollback.
    fn rollback(&self) -> Result<()>;
}

/// Allocates fresh ids from named sequences
///
/// Implementations must make the read-increment-write atomic for callers
/// sharing the backend.
pub trait SequenceAllocator {
    /// # Errors
    ///
    /// Returns `Persistence` if the sequence cannot be advanced.
    fn next_id(&self, sequence: &str) -> Result<i64>;
}
