//! Migration runner
//!
//! Applies embedded migrations once each, recording a checksum per
//! migration and refusing to continue if an applied migration changed.

use rusqlite::{params, Connection};

use crate::errors::{checksum_mismatch, from_rusqlite, migration_error, Result};
use crate::migrations::checksums::compute_checksum;
use crate::migrations::embedded::{get_migrations, Migration};

/// Apply all pending migrations to the database
///
/// # Errors
///
/// `Persistence` if a migration fails or an applied one no longer matches
/// its recorded checksum.
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    create_schema_version_table(conn)?;
    for migration in get_migrations() {
        apply_migration(conn, &migration)?;
    }
    Ok(())
}

/// Ids of applied migrations in application order
///
/// # Errors
///
/// `Persistence` on storage failure.
pub fn applied_migrations(conn: &Connection) -> Result<Vec<String>> {
    create_schema_version_table(conn)?;
    let mut stmt = conn
        .prepare("SELECT migration_id FROM schema_version ORDER BY id")
        .map_err(from_rusqlite)?;
    let ids = stmt
        .query_map([], |row| row.get(0))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<String>, _>>()
        .map_err(from_rusqlite)?;
    Ok(ids)
}

fn create_schema_version_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            id INTEGER PRIMARY KEY,
            migration_id TEXT NOT NULL UNIQUE,
            applied_at INTEGER NOT NULL,
            checksum TEXT
        )",
        [],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

fn recorded_checksum(conn: &Connection, migration_id: &str) -> Result<Option<Option<String>>> {
    match conn.query_row(
        "SELECT checksum FROM schema_version WHERE migration_id = ?1",
        params![migration_id],
        |row| row.get::<_, Option<String>>(0),
    ) {
        Ok(checksum) => Ok(Some(checksum)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(from_rusqlite(e)),
    }
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    let checksum = compute_checksum(migration.sql);

    if let Some(recorded) = recorded_checksum(conn, migration.id)? {
        return match recorded {
            Some(expected) if expected != checksum => {
                Err(checksum_mismatch(migration.id, &expected, &checksum))
            }
            _ => Ok(()),
        };
    }

    let tx = conn.unchecked_transaction().map_err(from_rusqlite)?;
    tx.execute_batch(migration.sql)
        .map_err(|e| migration_error(migration.id, &e.to_string()))?;
    tx.execute(
        "INSERT INTO schema_version (migration_id, applied_at, checksum) VALUES (?1, ?2, ?3)",
        params![migration.id, chrono::Utc::now().timestamp(), checksum],
    )
    .map_err(from_rusqlite)?;
    tx.commit().map_err(from_rusqlite)?;

    tracing::info!(
        component = module_path!(),
        op = "migrate",
        migration_id = migration.id,
        "migration applied"
    );
    Ok(())
}
