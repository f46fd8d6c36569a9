//! Forward-only schema migrations.
//!
//! Each step is applied in its own transaction and bumps
//! `PRAGMA user_version` inside it, so a crash never leaves a
//! half-applied version behind.

use rusqlite::Connection;

use crate::{schema, DbError, Result, SCHEMA_VERSION};

/// Migration steps in order. Step `n` upgrades version `n - 1` to `n`.
const STEPS: &[(u32, &str)] = &[(1, schema::SCHEMA_V1)];

/// Bring the schema up to [`SCHEMA_VERSION`].
pub fn run(conn: &Connection) -> Result<()> {
    let version = user_version(conn)?;
    if version > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "store is at schema v{version}, this build understands up to v{SCHEMA_VERSION}"
        )));
    }

    for &(target, sql) in STEPS.iter().filter(|(target, _)| *target > version) {
        tracing::info!(from = target - 1, to = target, "migrating store schema");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .map_err(|e| DbError::Migration(format!("v{target}: {e}")))?;
        tx.pragma_update(None, "user_version", target)?;
        tx.commit()?;
    }

    let reached = user_version(conn)?;
    if reached != SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "no migration path from v{reached} to v{SCHEMA_VERSION}"
        )));
    }
    Ok(())
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
