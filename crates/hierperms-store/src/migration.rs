//! Database schema migrations for SQLite.
//!
//! Versioned migrations: each one moves the schema from version N to N+1 and
//! is recorded in `schema_migrations`.

use rusqlite::Connection;

use hierperms_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// Safe to call on every open.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current = schema_version(conn)?;
    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!("applied schema migration v{}", version);
        }

        tx.commit()?;
    }

    Ok(())
}

/// The highest applied migration, 0 for a fresh database.
pub fn schema_version(conn: &Connection) -> Result<u32> {
    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: groups, users and memberships.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per group
        CREATE TABLE groups (
            name TEXT PRIMARY KEY,
            parent TEXT,                       -- NULL means the default group
            priority INTEGER NOT NULL DEFAULT 0,
            permissions BLOB NOT NULL,         -- CBOR array of tokens
            metadata BLOB NOT NULL             -- CBOR map of key -> value
        );

        -- Direct grants per user
        CREATE TABLE users (
            user_id TEXT PRIMARY KEY,          -- hyphenated UUID
            permissions BLOB NOT NULL,
            metadata BLOB NOT NULL
        );

        -- Explicit memberships; the default group is never stored
        CREATE TABLE memberships (
            user_id TEXT NOT NULL,
            group_name TEXT NOT NULL,
            expires_at INTEGER,                -- epoch ms, NULL for permanent
            PRIMARY KEY (user_id, group_name)
        );

        -- Present once state has been saved at least once
        CREATE TABLE snapshot_info (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            saved_at INTEGER NOT NULL,
            group_count INTEGER NOT NULL,
            user_count INTEGER NOT NULL
        );

        CREATE INDEX idx_memberships_group ON memberships(group_name);
        "#,
    )?;

    Ok(())
}
