//! # recharge-db
//!
//! Persistence for the promotion backend: a single SQLite database holding
//! the `subscribers`, `topups` and `draws` collections plus the winner
//! table and the notification outbox.
//!
//! ## Conventions
//!
//! - WAL mode, foreign keys enforced
//! - All timestamps are Unix epoch seconds
//! - Draw dates are `YYYY-MM-DD` text
//! - Schema version stored in `PRAGMA user_version`

pub mod migrations;
pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A connection shared between request handlers and background tasks.
pub type SharedDb = Arc<tokio::sync::Mutex<Connection>>;

/// Database error types.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl DbError {
    /// Classify a write error, separating constraint and trigger aborts
    /// from driver faults.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, message)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                DbError::Constraint(message.clone().unwrap_or_else(|| failure.to_string()))
            }
            _ => DbError::Sqlite(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

/// Open or create the store at `path`, migrated to the current schema.
pub fn open(path: &Path) -> Result<Connection> {
    prepare(Connection::open(path)?)
}

/// A private in-memory store, used by tests and dry runs.
pub fn open_memory() -> Result<Connection> {
    prepare(Connection::open_in_memory()?)
}

/// Wrap a connection for sharing across tasks.
pub fn shared(conn: Connection) -> SharedDb {
    Arc::new(tokio::sync::Mutex::new(conn))
}

/// Generate a fresh opaque identifier (32 hex chars).
pub fn new_id() -> String {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    hex::encode(bytes)
}

fn prepare(conn: Connection) -> Result<Connection> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    migrations::run(&conn)?;
    Ok(conn)
}
