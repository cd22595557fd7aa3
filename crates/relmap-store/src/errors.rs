//! Error handling for relmap-store
//!
//! Storage failures surface as `OrmError::Persistence`, carrying the
//! offending statement when there is one.

use relmap_core::errors::OrmError;

/// Result type alias using OrmError
pub type Result<T> = std::result::Result<T, OrmError>;

/// Create a migration error
pub fn migration_error(migration_id: &str, reason: &str) -> OrmError {
    OrmError::persistence(
        "migration",
        None,
        format!("Migration {} failed: {}", migration_id, reason),
    )
}

/// Create a checksum mismatch error
pub fn checksum_mismatch(migration_id: &str, expected: &str, actual: &str) -> OrmError {
    OrmError::persistence(
        "migration_checksum",
        None,
        format!(
            "Checksum mismatch for migration {}: expected {}, got {}",
            migration_id, expected, actual
        ),
    )
}

/// Create a database error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> OrmError {
    OrmError::persistence("sqlite", None, err.to_string())
}

/// Database error for a failed statement
pub fn statement_error(op: &str, sql: &str, err: rusqlite::Error) -> OrmError {
    OrmError::persistence(op, Some(sql), err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_error_keeps_sql() {
        let err = statement_error("execute_query", "SELECT 1", rusqlite::Error::InvalidQuery);
        match err {
            OrmError::Persistence { op, statement, .. } => {
                assert_eq!(op, "execute_query");
                assert_eq!(statement.as_deref(), Some("SELECT 1"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
