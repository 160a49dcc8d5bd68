// 🗄️ Store - repository capability + SQLite implementation
//
// The engine talks to the store through two traits:
// - Store:        acquires one session per reconciliation, answers the summary query
// - StoreSession: one transaction; bulk lookup, bulk writes, commit/rollback
//
// A session that is dropped without commit rolls back.

use crate::entities::{LocationRecord, LocationSnapshot, ObjectRecord, ObjectSnapshot};
use crate::movement::{Movement, StoredMovement};
use crate::temporal::{bookkeeping, from_storage, to_storage};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, ToSql};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

/// Max keys bound per `IN (...)` statement
const LOOKUP_CHUNK: usize = 500;

/// How long a writer waits for a concurrent writer's lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// REPOSITORY TRAITS
// ============================================================================

pub trait Store: Send + Sync {
    /// Begin a new transaction-scoped session.
    fn session(&self) -> Result<Box<dyn StoreSession + '_>>;

    /// Aggregate counts over current state. Movements created at or after
    /// `since` count as "today".
    fn summary(&self, since: DateTime<Utc>) -> Result<StoreSummary>;
}

pub trait StoreSession {
    fn existing_locations(&mut self, ids: &[i64]) -> Result<HashMap<i64, LocationSnapshot>>;
    fn existing_objects(&mut self, idcodes: &[String]) -> Result<HashMap<String, ObjectSnapshot>>;

    fn insert_locations(&mut self, rows: &[LocationRecord]) -> Result<()>;
    fn update_locations(&mut self, rows: &[&LocationRecord]) -> Result<()>;

    fn insert_objects(&mut self, rows: &[ObjectRecord]) -> Result<()>;
    fn update_objects(&mut self, rows: &[&ObjectRecord]) -> Result<()>;

    fn insert_movements(&mut self, rows: &[Movement]) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;
    fn rollback(self: Box<Self>) -> Result<()>;
}

// ============================================================================
// SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationCount {
    pub location_id: i64,
    pub name: Option<String>,
    pub count: i64,
}

/// Read-only counts over current state. Per-location lists only carry
/// locations with a non-zero count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub locations_count: i64,
    pub objects_count: i64,
    pub objects_in_locations: Vec<LocationCount>,
    pub movements_count: i64,
    pub movements_today: i64,
    pub movements_entries_today: Vec<LocationCount>,
    pub movements_exits_today: Vec<LocationCount>,
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS locations (
            id INTEGER PRIMARY KEY,
            name TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS objects (
            idcode TEXT PRIMARY KEY NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            location_id INTEGER,
            description TEXT,
            last_seen TEXT,
            home_location_id INTEGER,
            last_modified TEXT,
            last_location TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS movements (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            object_idcode TEXT NOT NULL,
            from_location_id INTEGER,
            to_location_id INTEGER,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_objects_location ON objects(location_id);
        CREATE INDEX IF NOT EXISTS idx_movements_created_at ON movements(created_at);
        CREATE INDEX IF NOT EXISTS idx_movements_object ON movements(object_idcode);",
    )
    .context("Failed to create schema")?;

    Ok(())
}

// ============================================================================
// SQLITE STORE
// ============================================================================

pub struct SqliteStore {
    backing: Backing,
}

enum Backing {
    /// A fresh connection per session
    File(PathBuf),
    /// One connection shared behind a lock (in-memory databases)
    Shared(Mutex<Connection>),
}

enum Conn<'a> {
    Owned(Connection),
    Shared(MutexGuard<'a, Connection>),
}

impl Deref for Conn<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        match self {
            Conn::Owned(c) => c,
            Conn::Shared(g) => &**g,
        }
    }
}

fn open_file(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

impl SqliteStore {
    /// Open (creating if needed) a database file and bootstrap the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = open_file(&path)?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            backing: Backing::File(path),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(SqliteStore {
            backing: Backing::Shared(Mutex::new(conn)),
        })
    }

    fn connect(&self) -> Result<Conn<'_>> {
        match &self.backing {
            Backing::File(path) => Ok(Conn::Owned(open_file(path)?)),
            Backing::Shared(lock) => lock
                .lock()
                .map(Conn::Shared)
                .map_err(|_| anyhow!("store connection lock poisoned")),
        }
    }

    pub fn location(&self, id: i64) -> Result<Option<LocationRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT id, name FROM locations WHERE id = ?1")?;
        let mut rows = stmt.query_map([id], |row| {
            Ok(LocationRecord {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        let record = rows.next().transpose()?;
        Ok(record)
    }

    pub fn object(&self, idcode: &str) -> Result<Option<ObjectRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT idcode, active, location_id, description, last_seen,
                    home_location_id, last_modified, last_location
             FROM objects WHERE idcode = ?1",
        )?;
        let mut rows = stmt.query_map([idcode], |row| {
            let idcode: String = row.get(0)?;
            let snapshot = object_snapshot(row)?;
            Ok(ObjectRecord {
                idcode,
                active: snapshot.active,
                location_id: snapshot.location_id,
                description: snapshot.description,
                last_seen: snapshot.last_seen,
                home_location_id: snapshot.home_location_id,
                last_modified: snapshot.last_modified,
                last_location: snapshot.last_location,
            })
        })?;
        let record = rows.next().transpose()?;
        Ok(record)
    }

    /// Movement history of one object, oldest first.
    pub fn movements_for_object(&self, idcode: &str) -> Result<Vec<StoredMovement>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, object_idcode, from_location_id, to_location_id, created_at
             FROM movements
             WHERE object_idcode = ?1
             ORDER BY id",
        )?;

        let movements = stmt
            .query_map([idcode], |row| {
                Ok(StoredMovement {
                    id: row.get(0)?,
                    object_idcode: row.get(1)?,
                    from_location_id: row.get(2)?,
                    to_location_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(movements)
    }
}

impl Store for SqliteStore {
    fn session(&self) -> Result<Box<dyn StoreSession + '_>> {
        let conn = self.connect()?;
        // Take the write lock up front so concurrent reconciliations of the
        // same kind serialize instead of failing on upgrade
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("Failed to begin transaction")?;

        Ok(Box::new(SqliteSession {
            conn,
            now: bookkeeping(Utc::now()),
            finished: false,
        }))
    }

    fn summary(&self, since: DateTime<Utc>) -> Result<StoreSummary> {
        let conn = self.connect()?;
        let since = bookkeeping(since);

        Ok(StoreSummary {
            locations_count: count(&conn, "SELECT COUNT(*) FROM locations", &[])?,
            objects_count: count(&conn, "SELECT COUNT(*) FROM objects", &[])?,
            objects_in_locations: per_location(
                &conn,
                "SELECT l.id, l.name, COUNT(*)
                 FROM locations l JOIN objects o ON o.location_id = l.id
                 GROUP BY l.id, l.name
                 ORDER BY l.id",
                &[],
            )?,
            movements_count: count(&conn, "SELECT COUNT(*) FROM movements", &[])?,
            movements_today: count(
                &conn,
                "SELECT COUNT(*) FROM movements WHERE created_at >= ?1",
                &[&since],
            )?,
            movements_entries_today: per_location(
                &conn,
                "SELECT l.id, l.name, COUNT(*)
                 FROM locations l JOIN movements m ON m.to_location_id = l.id
                 WHERE m.created_at >= ?1
                 GROUP BY l.id, l.name
                 ORDER BY l.id",
                &[&since],
            )?,
            movements_exits_today: per_location(
                &conn,
                "SELECT l.id, l.name, COUNT(*)
                 FROM locations l JOIN movements m ON m.from_location_id = l.id
                 WHERE m.created_at >= ?1
                 GROUP BY l.id, l.name
                 ORDER BY l.id",
                &[&since],
            )?,
        })
    }
}

fn count(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<i64> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0))?;
    Ok(n)
}

fn per_location(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> Result<Vec<LocationCount>> {
    let mut stmt = conn.prepare(sql)?;
    let counts = stmt
        .query_map(params, |row| {
            Ok(LocationCount {
                location_id: row.get(0)?,
                name: row.get(1)?,
                count: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Reads columns 1..=7 of an objects row (column 0 is the idcode).
fn object_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObjectSnapshot> {
    Ok(ObjectSnapshot {
        active: row.get(1)?,
        location_id: row.get(2)?,
        description: row.get(3)?,
        last_seen: from_storage(row.get(4)?),
        home_location_id: row.get(5)?,
        last_modified: from_storage(row.get(6)?),
        last_location: from_storage(row.get(7)?),
    })
}

// ============================================================================
// SQLITE SESSION
// ============================================================================

pub struct SqliteSession<'a> {
    conn: Conn<'a>,
    /// Bookkeeping time for every row written in this session
    now: String,
    finished: bool,
}

impl StoreSession for SqliteSession<'_> {
    fn existing_locations(&mut self, ids: &[i64]) -> Result<HashMap<i64, LocationSnapshot>> {
        let mut existing = HashMap::with_capacity(ids.len());

        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT id, name FROM locations WHERE id IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, i64>(0)?, LocationSnapshot { name: row.get(1)? }))
            })?;
            for row in rows {
                let (id, snapshot) = row?;
                existing.insert(id, snapshot);
            }
        }

        Ok(existing)
    }

    fn existing_objects(&mut self, idcodes: &[String]) -> Result<HashMap<String, ObjectSnapshot>> {
        let mut existing = HashMap::with_capacity(idcodes.len());

        for chunk in idcodes.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT idcode, active, location_id, description, last_seen,
                        home_location_id, last_modified, last_location
                 FROM objects WHERE idcode IN ({})",
                placeholders(chunk.len())
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
                Ok((row.get::<_, String>(0)?, object_snapshot(row)?))
            })?;
            for row in rows {
                let (idcode, snapshot) = row?;
                existing.insert(idcode, snapshot);
            }
        }

        Ok(existing)
    }

    fn insert_locations(&mut self, rows: &[LocationRecord]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO locations (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
        )?;
        for loc in rows {
            stmt.execute(params![loc.id, loc.name, self.now])
                .with_context(|| format!("Failed to insert location {}", loc.id))?;
        }
        debug!(rows = rows.len(), "locations inserted");
        Ok(())
    }

    fn update_locations(&mut self, rows: &[&LocationRecord]) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE locations SET name = ?2, updated_at = ?3 WHERE id = ?1")?;
        for loc in rows {
            stmt.execute(params![loc.id, loc.name, self.now])
                .with_context(|| format!("Failed to update location {}", loc.id))?;
        }
        debug!(rows = rows.len(), "locations updated");
        Ok(())
    }

    fn insert_objects(&mut self, rows: &[ObjectRecord]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO objects (
                idcode, active, location_id, description, last_seen,
                home_location_id, last_modified, last_location, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
        )?;
        for obj in rows {
            stmt.execute(params![
                obj.idcode,
                obj.active,
                obj.location_id,
                obj.description,
                obj.last_seen.as_ref().map(to_storage),
                obj.home_location_id,
                obj.last_modified.as_ref().map(to_storage),
                obj.last_location.as_ref().map(to_storage),
                self.now,
            ])
            .with_context(|| format!("Failed to insert object {}", obj.idcode))?;
        }
        debug!(rows = rows.len(), "objects inserted");
        Ok(())
    }

    fn update_objects(&mut self, rows: &[&ObjectRecord]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "UPDATE objects SET
                active = ?2,
                location_id = ?3,
                description = ?4,
                last_seen = ?5,
                home_location_id = ?6,
                last_modified = ?7,
                last_location = ?8,
                updated_at = ?9
             WHERE idcode = ?1",
        )?;
        for obj in rows {
            stmt.execute(params![
                obj.idcode,
                obj.active,
                obj.location_id,
                obj.description,
                obj.last_seen.as_ref().map(to_storage),
                obj.home_location_id,
                obj.last_modified.as_ref().map(to_storage),
                obj.last_location.as_ref().map(to_storage),
                self.now,
            ])
            .with_context(|| format!("Failed to update object {}", obj.idcode))?;
        }
        debug!(rows = rows.len(), "objects updated");
        Ok(())
    }

    fn insert_movements(&mut self, rows: &[Movement]) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO movements (
                object_idcode, from_location_id, to_location_id, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?4)",
        )?;
        for m in rows {
            stmt.execute(params![
                m.object_idcode,
                m.from_location_id,
                m.to_location_id,
                bookkeeping(m.timestamp),
            ])
            .with_context(|| format!("Failed to insert movement for {}", m.object_idcode))?;
        }
        debug!(rows = rows.len(), "movements inserted");
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT").context("Failed to commit")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK").context("Failed to roll back")?;
        Ok(())
    }
}

impl Drop for SqliteSession<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                debug!(error = %e, "rollback on drop failed");
            }
        }
    }
}
