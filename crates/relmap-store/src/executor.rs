//! Statement execution over a shared SQLite connection
//!
//! Every mapper of a session holds the same executor. Transactions nest by
//! depth: only the outermost `begin` issues `BEGIN` and only the matching
//! outermost `commit` issues `COMMIT`. A rollback at any depth aborts the
//! whole transaction.

use std::cell::Cell;
use std::rc::Rc;

use relmap_core::model::Value;
use relmap_core::query::SqlStatement;
use relmap_core::storage::{Row, StatementExecutor};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};

use crate::errors::{statement_error, Result};

pub struct SqliteExecutor {
    conn: Rc<Connection>,
    depth: Cell<u32>,
}

impl SqliteExecutor {
    pub fn new(conn: Rc<Connection>) -> Self {
        Self {
            conn,
            depth: Cell::new(0),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of `begin` calls not yet matched by `commit`
    pub fn transaction_depth(&self) -> u32 {
        self.depth.get()
    }

    fn run_batch(&self, op: &str, sql: &str) -> Result<()> {
        tracing::debug!(component = module_path!(), op, sql, "transaction control");
        self.conn
            .execute_batch(sql)
            .map_err(|e| statement_error(op, sql, e))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::Blob(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    }
}

impl StatementExecutor for SqliteExecutor {
    fn execute_query(&self, statement: &SqlStatement) -> Result<Vec<Row>> {
        let fail = |e| statement_error("execute_query", &statement.sql, e);
        let mut stmt = self.conn.prepare(&statement.sql).map_err(fail)?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(statement.params.iter().map(to_sql)))
            .map_err(fail)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(fail)? {
            let mut record = Row::new();
            for (i, column) in columns.iter().enumerate() {
                let value = row.get_ref(i).map_err(fail)?;
                record.insert(column.clone(), from_sql(value));
            }
            out.push(record);
        }
        Ok(out)
    }

    fn execute_statement(&self, statement: &SqlStatement) -> Result<usize> {
        self.conn
            .execute(
                &statement.sql,
                params_from_iter(statement.params.iter().map(to_sql)),
            )
            .map_err(|e| statement_error("execute_statement", &statement.sql, e))
    }

    fn begin(&self) -> Result<()> {
        if self.depth.get() == 0 {
            self.run_batch("begin", "BEGIN")?;
        }
        self.depth.set(self.depth.get() + 1);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        match self.depth.get() {
            0 => Ok(()),
            1 => {
                self.run_batch("commit", "COMMIT")?;
                self.depth.set(0);
                Ok(())
            }
            n => {
                self.depth.set(n - 1);
                Ok(())
            }
        }
    }

    fn rollback(&self) -> Result<()> {
        if self.depth.replace(0) == 0 {
            return Ok(());
        }
        self.run_batch("rollback", "ROLLBACK")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    fn executor() -> SqliteExecutor {
        let conn = open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT, flag INTEGER)")
            .unwrap();
        SqliteExecutor::new(Rc::new(conn))
    }

    fn insert(exec: &SqliteExecutor, id: i64, name: &str) {
        exec.execute_statement(&SqlStatement::new(
            "INSERT INTO t (id, name, flag) VALUES (?, ?, ?)",
            vec![Value::Int(id), Value::Text(name.to_string()), Value::Bool(true)],
        ))
        .unwrap();
    }

    fn count(exec: &SqliteExecutor) -> usize {
        exec.execute_query(&SqlStatement::new("SELECT id FROM t", vec![]))
            .unwrap()
            .len()
    }

    #[test]
    fn test_query_maps_columns_and_values() {
        let exec = executor();
        insert(&exec, 1, "one");

        let rows = exec
            .execute_query(&SqlStatement::new(
                "SELECT id, name AS label, flag, NULL AS \"nothing\" FROM t WHERE id = ?",
                vec![Value::Int(1)],
            ))
            .unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], Value::Int(1));
        assert_eq!(rows[0]["label"], Value::Text("one".to_string()));
        assert_eq!(rows[0]["flag"], Value::Int(1));
        assert_eq!(rows[0]["nothing"], Value::Null);
    }

    #[test]
    fn test_nested_begin_commits_once_at_outermost_level() {
        let exec = executor();
        exec.begin().unwrap();
        exec.begin().unwrap();
        assert_eq!(exec.transaction_depth(), 2);
        insert(&exec, 1, "one");

        exec.commit().unwrap();
        assert_eq!(exec.transaction_depth(), 1);
        assert!(!exec.connection().is_autocommit());

        exec.commit().unwrap();
        assert_eq!(exec.transaction_depth(), 0);
        assert!(exec.connection().is_autocommit());
        assert_eq!(count(&exec), 1);
    }

    #[test]
    fn test_rollback_at_any_depth_discards_everything() {
        let exec = executor();
        exec.begin().unwrap();
        exec.begin().unwrap();
        insert(&exec, 1, "one");

        exec.rollback().unwrap();
        assert_eq!(exec.transaction_depth(), 0);
        // A second rollback from another mapper is a no-op
        exec.rollback().unwrap();
        assert_eq!(count(&exec), 0);
    }

    #[test]
    fn test_failed_statement_carries_sql() {
        let exec = executor();
        let err = exec
            .execute_statement(&SqlStatement::new("INSERT INTO missing VALUES (1)", vec![]))
            .unwrap_err();
        match err {
            relmap_core::OrmError::Persistence { statement, .. } => {
                assert_eq!(statement.as_deref(), Some("INSERT INTO missing VALUES (1)"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
