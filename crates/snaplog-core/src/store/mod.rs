//! Durable event log backed by SQLite.
//!
//! Runtime defaults follow the projection database conventions:
//! - `journal_mode = WAL` so readers never block the single writer
//! - `busy_timeout = 5s` to ride out short lock windows
//! - schema versioned through `PRAGMA user_version` (see [`migrations`])
//!
//! The store owns id and timestamp assignment. Ids come from a high-water
//! mark kept in `store_meta`, so purging the table never lets an id repeat.

pub mod migrations;
pub mod schema;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, Transaction, params, types::Type};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::error::{CoreError, Result};
use crate::event::validate::{validate_actor, validate_file_name, validate_payload};
use crate::event::{Event, Payload};

/// Busy timeout used for store connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const EVENT_COLUMNS: &str = "id, timestamp, actor, payload";

/// Metadata for a file artifact waiting to be archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingFile {
    pub name: String,
    pub actor: String,
    /// Epoch seconds when the file was added.
    pub added_at: i64,
    /// BLAKE3 hex digest of the file bytes.
    pub digest: String,
    pub size: u64,
}

/// SQLite-backed append-only event log.
#[derive(Debug)]
pub struct EventStore {
    conn: Connection,
}

impl EventStore {
    /// Open (or create) the store at `path`, apply pragmas and migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or SQLite fails
    /// to open, configure or migrate the database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite fails to migrate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        configure_connection(&conn)?;
        let version = migrations::migrate(&mut conn)?;
        debug!(version, "event store ready");
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------------
    // Appends
    // -----------------------------------------------------------------------

    /// Validate and durably append one event.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for a bad actor or empty payload,
    /// or a storage error if the write fails. Nothing is written on error.
    pub fn append(&mut self, actor: &str, payload: Payload) -> Result<Event> {
        self.append_checked(actor, payload, |_| Ok(()))
    }

    /// Append one event, running `check` on the assigned event before the
    /// transaction commits. An error from `check` rolls the append back.
    ///
    /// # Errors
    ///
    /// Returns validation, storage, or whatever error `check` produced.
    #[instrument(skip(self, payload, check), fields(categories = payload.len()))]
    pub fn append_checked<F>(&mut self, actor: &str, payload: Payload, check: F) -> Result<Event>
    where
        F: FnOnce(&Event) -> Result<()>,
    {
        validate_actor(actor)?;
        validate_payload(&payload)?;
        let payload_json = serde_json::to_string(&payload)?;

        let tx = self.conn.transaction()?;
        let id = next_id(&tx)?;
        let timestamp = next_timestamp(&tx, chrono::Utc::now().timestamp())?;

        let event = Event {
            id,
            timestamp,
            actor: actor.to_string(),
            payload,
        };
        check(&event)?;

        tx.execute(
            "INSERT INTO events (id, timestamp, actor, payload) VALUES (?1, ?2, ?3, ?4)",
            params![id_to_sql(id)?, timestamp, actor, payload_json],
        )?;
        put_meta(&tx, schema::META_HIGH_WATER, &id.to_string())?;
        put_meta(&tx, schema::META_CLOCK, &timestamp.to_string())?;
        tx.commit()?;

        debug!(id, timestamp, "event appended");
        Ok(event)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// All stored events with id strictly greater than `after` (all when
    /// `None`), ascending by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn events_since(&self, after: Option<u64>) -> Result<Vec<Event>> {
        let after = id_to_sql(after.unwrap_or(0))?;
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id > ?1 ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![after], event_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Fetch one event by id.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no stored event has this id.
    pub fn event_by_id(&self, id: u64) -> Result<Event> {
        self.conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id_to_sql(id)?],
                event_from_row,
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("event", id))
    }

    /// Oldest and newest stored events, or `None` for an empty table.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn boundary_events(&self) -> Result<Option<(Event, Event)>> {
        let oldest = self
            .conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id ASC LIMIT 1"),
                [],
                event_from_row,
            )
            .optional()?;
        let Some(oldest) = oldest else {
            return Ok(None);
        };
        let newest = self.conn.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events ORDER BY id DESC LIMIT 1"),
            [],
            event_from_row,
        )?;
        Ok(Some((oldest, newest)))
    }

    /// Number of stored events with id strictly greater than `after`.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn count_since(&self, after: u64) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM events WHERE id > ?1",
            params![id_to_sql(after)?],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Highest id ever assigned or covered by a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn high_water(&self) -> Result<u64> {
        high_water(&self.conn)
    }

    // -----------------------------------------------------------------------
    // Purges and metadata
    // -----------------------------------------------------------------------

    /// Delete events with ids in `[start, end]`. Deleting an already empty
    /// range is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn delete_range(&mut self, start: u64, end: u64) -> Result<usize> {
        delete_range(&self.conn, start, end)
    }

    /// Raise the id high-water mark to at least `id`. Never lowers it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the update fails.
    pub fn raise_high_water(&mut self, id: u64) -> Result<()> {
        let tx = self.conn.transaction()?;
        if id > high_water(&tx)? {
            put_meta(&tx, schema::META_HIGH_WATER, &id.to_string())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Read a `store_meta` value.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn meta(&self, key: &str) -> Result<Option<String>> {
        get_meta(&self.conn, key)
    }

    /// Write a `store_meta` value.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_meta(&mut self, key: &str, value: &str) -> Result<()> {
        put_meta(&self.conn, key, value)
    }

    /// Run `f` inside one SQLite transaction. The transaction commits only
    /// when `f` returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns the error from `f` or from committing.
    pub fn transact<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T>,
    {
        let tx = StoreTx {
            tx: self.conn.transaction()?,
        };
        let value = f(&tx)?;
        tx.tx.commit()?;
        Ok(value)
    }

    // -----------------------------------------------------------------------
    // Pending files
    // -----------------------------------------------------------------------

    /// Store a file artifact until the next sync archives it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for a bad actor or name, or when a
    /// file with the same name is already pending.
    pub fn add_file(&mut self, name: &str, actor: &str, bytes: &[u8]) -> Result<PendingFile> {
        validate_actor(actor)?;
        validate_file_name(name)?;

        let tx = self.conn.transaction()?;
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM files WHERE name = ?1)",
            params![name],
            |row| row.get(0),
        )?;
        if exists {
            return Err(CoreError::Validation(format!(
                "file '{name}' is already pending"
            )));
        }

        let added_at = next_timestamp(&tx, chrono::Utc::now().timestamp())?;
        let digest = blake3::hash(bytes).to_hex().to_string();
        tx.execute(
            "INSERT INTO files (name, actor, added_at, digest, bytes) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![name, actor, added_at, digest, bytes],
        )?;
        put_meta(&tx, schema::META_CLOCK, &added_at.to_string())?;
        tx.commit()?;

        debug!(name, size = bytes.len(), "file added");
        Ok(PendingFile {
            name: name.to_string(),
            actor: actor.to_string(),
            added_at,
            digest,
            size: bytes.len() as u64,
        })
    }

    /// Pending files, newest first.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the query fails.
    pub fn pending_files(&self) -> Result<Vec<PendingFile>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT name, actor, added_at, digest, length(bytes)
             FROM files ORDER BY added_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let size: i64 = row.get(4)?;
            Ok(PendingFile {
                name: row.get(0)?,
                actor: row.get(1)?,
                added_at: row.get(2)?,
                digest: row.get(3)?,
                size: u64::try_from(size).unwrap_or(0),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoreError::from)
    }

    /// Raw bytes of a pending file.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if no such file is pending.
    pub fn file_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.conn
            .query_row(
                "SELECT bytes FROM files WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CoreError::not_found("file", name))
    }

    /// Remove a pending file. Removing an absent file is a no-op.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn delete_file(&mut self, name: &str) -> Result<bool> {
        delete_file(&self.conn, name)
    }
}

/// Mutations available inside [`EventStore::transact`].
pub struct StoreTx<'conn> {
    tx: Transaction<'conn>,
}

impl StoreTx<'_> {
    /// See [`EventStore::delete_range`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn delete_range(&self, start: u64, end: u64) -> Result<usize> {
        delete_range(&self.tx, start, end)
    }

    /// See [`EventStore::delete_file`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the delete fails.
    pub fn delete_file(&self, name: &str) -> Result<bool> {
        delete_file(&self.tx, name)
    }

    /// See [`EventStore::set_meta`].
    ///
    /// # Errors
    ///
    /// Returns a storage error if the write fails.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        put_meta(&self.tx, key, value)
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String =
        conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

fn id_to_sql(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| CoreError::Validation(format!("event id {id} out of range")))
}

fn id_from_sql(idx: usize, raw: i64) -> rusqlite::Result<u64> {
    u64::try_from(raw)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(error)))
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let payload_text: String = row.get(3)?;
    let payload: Payload = serde_json::from_str(&payload_text)
        .map_err(|error| rusqlite::Error::FromSqlConversionFailure(3, Type::Text, Box::new(error)))?;
    Ok(Event {
        id: id_from_sql(0, row.get(0)?)?,
        timestamp: row.get(1)?,
        actor: row.get(2)?,
        payload,
    })
}

fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
    .map_err(CoreError::from)
}

fn put_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO store_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![key, value],
    )?;
    Ok(())
}

fn meta_i64(conn: &Connection, key: &str) -> Result<i64> {
    Ok(get_meta(conn, key)?
        .and_then(|value| value.trim().parse::<i64>().ok())
        .unwrap_or(0))
}

fn high_water(conn: &Connection) -> Result<u64> {
    let recorded = u64::try_from(meta_i64(conn, schema::META_HIGH_WATER)?).unwrap_or(0);
    let stored: Option<i64> = conn.query_row("SELECT MAX(id) FROM events", [], |row| row.get(0))?;
    let stored = stored.map(|raw| id_from_sql(0, raw)).transpose()?.unwrap_or(0);
    Ok(recorded.max(stored))
}

fn next_id(conn: &Connection) -> Result<u64> {
    high_water(conn)?
        .checked_add(1)
        .ok_or_else(|| CoreError::Validation("event id space exhausted".into()))
}

/// `next = max(now, last)`: never backwards, ties allowed.
fn next_timestamp(conn: &Connection, now: i64) -> Result<i64> {
    let last = meta_i64(conn, schema::META_CLOCK)?;
    Ok(now.max(last))
}

fn delete_range(conn: &Connection, start: u64, end: u64) -> Result<usize> {
    if start > end {
        return Ok(0);
    }
    let removed = conn.execute(
        "DELETE FROM events WHERE id BETWEEN ?1 AND ?2",
        params![id_to_sql(start)?, id_to_sql(end)?],
    )?;
    debug!(start, end, removed, "deleted event range");
    Ok(removed)
}

fn delete_file(conn: &Connection, name: &str) -> Result<bool> {
    let removed = conn.execute("DELETE FROM files WHERE name = ?1", params![name])?;
    Ok(removed > 0)
}
