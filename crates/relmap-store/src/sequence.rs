//! Id allocation from the sequence table
//!
//! One row per sequence name. The row is created on first use and advanced
//! with a single `UPDATE ... RETURNING`, so allocation stays atomic inside or
//! outside a surrounding transaction.

use std::rc::Rc;

use relmap_core::errors::OrmError;
use relmap_core::storage::SequenceAllocator;
use rusqlite::{params, Connection};

use crate::errors::{statement_error, Result};

pub const DEFAULT_SEQUENCE_TABLE: &str = "relmap_sequence";

pub struct SqliteSequence {
    conn: Rc<Connection>,
    table: String,
}

impl SqliteSequence {
    /// Sequence over the default table created by the embedded migrations
    pub fn new(conn: Rc<Connection>) -> Self {
        Self {
            conn,
            table: DEFAULT_SEQUENCE_TABLE.to_string(),
        }
    }

    /// Sequence over a custom table, created if missing
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `table` is not a plain identifier,
    /// or `Persistence` if the table cannot be created.
    pub fn with_table(conn: Rc<Connection>, table: &str) -> Result<Self> {
        let plain = !table.is_empty()
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !plain {
            return Err(OrmError::InvalidConfiguration {
                reason: format!("illegal sequence table name '{}'", table),
            });
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (name TEXT PRIMARY KEY, next_id INTEGER NOT NULL DEFAULT 0)",
            table
        );
        conn.execute_batch(&sql)
            .map_err(|e| statement_error("sequence_table", &sql, e))?;
        Ok(Self {
            conn,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Last id handed out for `sequence`, 0 if none yet
    ///
    /// # Errors
    ///
    /// Returns `Persistence` on storage failure.
    pub fn current(&self, sequence: &str) -> Result<i64> {
        let sql = format!("SELECT next_id FROM {} WHERE name = ?1", self.table);
        match self
            .conn
            .query_row(&sql, params![sequence], |row| row.get::<_, i64>(0))
        {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(statement_error("sequence_current", &sql, e)),
        }
    }
}

impl SequenceAllocator for SqliteSequence {
    fn next_id(&self, sequence: &str) -> Result<i64> {
        let seed = format!(
            "INSERT INTO {} (name, next_id) VALUES (?1, 0) ON CONFLICT(name) DO NOTHING",
            self.table
        );
        self.conn
            .execute(&seed, params![sequence])
            .map_err(|e| statement_error("next_id", &seed, e))?;

        let advance = format!(
            "UPDATE {} SET next_id = next_id + 1 WHERE name = ?1 RETURNING next_id",
            self.table
        );
        let id = self
            .conn
            .query_row(&advance, params![sequence], |row| row.get::<_, i64>(0))
            .map_err(|e| statement_error("next_id", &advance, e))?;

        tracing::trace!(component = module_path!(), sequence, id, "id allocated");
        Ok(id)
    }
}
