//! SQLite implementation of the Store trait.
//!
//! This is the persistent backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via `tokio::task::spawn_blocking`.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use hierperms_core::{now_millis, GroupRecord, Snapshot};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::Store;

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = lock(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|e| {
        StoreError::Database(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
            Some(format!("mutex poisoned: {}", e)),
        ))
    })
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> std::result::Result<T, String> {
    ciborium::from_reader(bytes).map_err(|e| e.to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────────────

fn read_snapshot(conn: &Connection) -> Result<Option<Snapshot>> {
    let saved_at: Option<i64> = conn
        .query_row("SELECT saved_at FROM snapshot_info WHERE id = 1", [], |row| {
            row.get(0)
        })
        .optional()?;
    let Some(saved_at) = saved_at else {
        return Ok(None);
    };

    let mut snapshot = Snapshot::new();
    read_groups(conn, &mut snapshot)?;
    let skipped = read_users(conn, &mut snapshot)?;
    read_memberships(conn, &skipped, &mut snapshot)?;

    tracing::debug!(
        "read snapshot saved at {}: {} groups, {} users",
        saved_at,
        snapshot.groups.len(),
        snapshot.users.len()
    );
    Ok(Some(snapshot))
}

fn read_groups(conn: &Connection, snapshot: &mut Snapshot) -> Result<()> {
    let mut stmt = conn.prepare("SELECT name, parent, priority, permissions, metadata FROM groups")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, i32>(2)?,
            row.get::<_, Vec<u8>>(3)?,
            row.get::<_, Vec<u8>>(4)?,
        ))
    })?;

    for row in rows {
        let (name, parent, priority, permissions, metadata) = row?;
        let decoded = decode::<BTreeSet<String>>(&permissions)
            .and_then(|p| decode::<BTreeMap<String, String>>(&metadata).map(|m| (p, m)));
        match decoded {
            Ok((permissions, metadata)) => {
                snapshot.groups.insert(
                    name,
                    GroupRecord {
                        parent,
                        permissions,
                        metadata,
                        priority,
                    },
                );
            }
            Err(e) => tracing::warn!("skipping stored group '{}': {}", name, e),
        }
    }

    Ok(())
}

/// Returns the ids of user rows that could not be decoded.
fn read_users(conn: &Connection, snapshot: &mut Snapshot) -> Result<HashSet<String>> {
    let mut skipped = HashSet::new();
    let mut stmt = conn.prepare("SELECT user_id, permissions, metadata FROM users")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Vec<u8>>(1)?,
            row.get::<_, Vec<u8>>(2)?,
        ))
    })?;

    for row in rows {
        let (id, permissions, metadata) = row?;
        let decoded = decode::<BTreeSet<String>>(&permissions)
            .and_then(|p| decode::<BTreeMap<String, String>>(&metadata).map(|m| (p, m)));
        match decoded {
            Ok((permissions, metadata)) => {
                let record = snapshot.users.entry(id).or_default();
                record.permissions = permissions;
                record.metadata = metadata;
            }
            Err(e) => {
                tracing::warn!("skipping stored user '{}': {}", id, e);
                skipped.insert(id);
            }
        }
    }

    Ok(skipped)
}

fn read_memberships(
    conn: &Connection,
    skipped: &HashSet<String>,
    snapshot: &mut Snapshot,
) -> Result<()> {
    let mut stmt = conn.prepare("SELECT user_id, group_name, expires_at FROM memberships")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;

    for row in rows {
        let (user, group, expires_at) = row?;
        if skipped.contains(&user) {
            continue;
        }
        snapshot
            .users
            .entry(user)
            .or_default()
            .groups
            .insert(group, expires_at);
    }

    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────────────

fn write_snapshot(conn: &mut Connection, snapshot: &Snapshot) -> Result<()> {
    // Encode up front so a bad value never leaves a half-written transaction
    let mut groups = Vec::with_capacity(snapshot.groups.len());
    for (name, record) in &snapshot.groups {
        groups.push((name, record, encode(&record.permissions)?, encode(&record.metadata)?));
    }
    let mut users = Vec::with_capacity(snapshot.users.len());
    for (id, record) in &snapshot.users {
        users.push((id, record, encode(&record.permissions)?, encode(&record.metadata)?));
    }

    let tx = conn.transaction()?;
    tx.execute_batch("DELETE FROM memberships; DELETE FROM users; DELETE FROM groups;")?;

    {
        let mut insert = tx.prepare(
            "INSERT INTO groups (name, parent, priority, permissions, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (name, record, permissions, metadata) in &groups {
            insert.execute(params![name, record.parent, record.priority, permissions, metadata])?;
        }
    }

    {
        let mut insert_user = tx.prepare(
            "INSERT INTO users (user_id, permissions, metadata) VALUES (?1, ?2, ?3)",
        )?;
        let mut insert_membership = tx.prepare(
            "INSERT INTO memberships (user_id, group_name, expires_at) VALUES (?1, ?2, ?3)",
        )?;
        for (id, record, permissions, metadata) in &users {
            insert_user.execute(params![id, permissions, metadata])?;
            for (group, expires_at) in &record.groups {
                insert_membership.execute(params![id, group, expires_at])?;
            }
        }
    }

    tx.execute(
        "INSERT OR REPLACE INTO snapshot_info (id, saved_at, group_count, user_count)
         VALUES (1, ?1, ?2, ?3)",
        params![now_millis(), groups.len() as i64, users.len() as i64],
    )?;
    tx.commit()?;

    Ok(())
}

#[async_trait]
impl Store for SqliteStore {
    async fn load(&self) -> Result<Option<Snapshot>> {
        self.run(|conn| read_snapshot(conn)).await
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let (groups, users) = (snapshot.groups.len(), snapshot.users.len());
        let snapshot = snapshot.clone();
        self.run(move |conn| write_snapshot(conn, &snapshot)).await?;
        tracing::debug!("saved {} groups and {} users", groups, users);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hierperms_core::UserRecord;

    const ALICE: &str = "00000000-0000-0000-0000-0000000000a1";

    fn sample() -> Snapshot {
        let mut snapshot = Snapshot::new();
        snapshot.groups.insert(
            "default".into(),
            GroupRecord {
                permissions: ["chat".to_string()].into(),
                ..Default::default()
            },
        );
        snapshot.groups.insert(
            "vip".into(),
            GroupRecord {
                parent: Some("default".into()),
                permissions: ["fly".to_string(), "-kick".to_string()].into(),
                metadata: [("prefix".to_string(), "[vip]".to_string())].into(),
                priority: 5,
            },
        );

        let mut alice = UserRecord::default();
        alice.permissions.insert("build".into());
        alice.groups.insert("vip".into(), Some(1_700_000_060_000));
        snapshot.users.insert(ALICE.into(), alice);
        snapshot
    }

    #[tokio::test]
    async fn test_empty_database_loads_nothing() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = SqliteStore::open_memory().unwrap();
        let snapshot = sample();

        store.save(&snapshot).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(snapshot));
    }

    #[tokio::test]
    async fn test_save_replaces_previous_state() {
        let store = SqliteStore::open_memory().unwrap();
        store.save(&sample()).await.unwrap();

        let mut smaller = Snapshot::new();
        smaller.groups.insert("default".into(), GroupRecord::default());
        store.save(&smaller).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(smaller));
    }

    #[tokio::test]
    async fn test_undecodable_rows_skipped() {
        let store = SqliteStore::open_memory().unwrap();
        store.save(&sample()).await.unwrap();
        {
            let conn = lock(&store.conn).unwrap();
            conn.execute("UPDATE groups SET permissions = x'ff' WHERE name = 'vip'", [])
                .unwrap();
            conn.execute("UPDATE users SET metadata = x'ff'", []).unwrap();
        }

        let loaded = store.load().await.unwrap().unwrap();
        assert!(loaded.groups.contains_key("default"));
        assert!(!loaded.groups.contains_key("vip"));
        // The user's memberships go with the bad row
        assert!(loaded.users.is_empty());
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perms.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save(&sample()).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load().await.unwrap(), Some(sample()));
    }
}
