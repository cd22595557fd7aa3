//! Database connection management
//!
//! Opens and configures SQLite connections and wires a ready [`Session`]
//! over one shared connection.

use std::path::Path;
use std::rc::Rc;

use relmap_core::{logging_facility, OrmConfig, Session};
use rusqlite::Connection;

use crate::errors::{from_rusqlite, Result};
use crate::executor::SqliteExecutor;
use crate::migrations::apply_migrations;
use crate::sequence::SqliteSequence;

/// Open a SQLite database at the given path
pub fn open<P: AsRef<Path>>(path: P) -> Result<Connection> {
    Connection::open(path).map_err(from_rusqlite)
}

/// Open an in-memory SQLite database (for testing)
pub fn open_in_memory() -> Result<Connection> {
    Connection::open_in_memory().map_err(from_rusqlite)
}

/// Enable foreign keys and WAL journaling
///
/// In-memory databases keep their `memory` journal mode.
pub fn configure(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(from_rusqlite)?;
    let mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(from_rusqlite)?;
    tracing::debug!(component = module_path!(), journal_mode = %mode, "connection configured");
    Ok(())
}

/// Configure `conn`, apply migrations and build a session over it
///
/// A `logging_profile` in the config installs the global subscriber.
///
/// Types still have to be registered, and their tables created (see
/// [`crate::schema::create_tables`]), before entities can be loaded.
///
/// # Errors
///
/// `InvalidConfiguration` for a bad config; `Persistence` for pragma,
/// migration or sequence-table failures.
pub fn open_session(conn: Rc<Connection>, config: OrmConfig) -> Result<Session> {
    config.validate()?;
    if let Some(profile) = config.logging_profile {
        logging_facility::init(profile);
    }
    configure(&conn)?;
    apply_migrations(&conn)?;

    let sequence = SqliteSequence::with_table(conn.clone(), &config.sequence_table)?;
    let executor = SqliteExecutor::new(conn);
    Ok(Session::new(Rc::new(executor), Rc::new(sequence)).with_config(config))
}
