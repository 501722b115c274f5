//! SQLite-backed store holding the state in a single row.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};

use super::{PersistError, PersistResult, StateStore};

const STATE_FORMAT_VERSION: i64 = 1;
const STATE_ROW_ID: i64 = 0;

/// SQLite implementation of [`crate::persist::StateStore`].
pub struct SqliteStateStore {
    conn: Connection,
}

impl SqliteStateStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let mut store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Millisecond timestamp of the last write, if any.
    pub fn updated_ms(&self) -> PersistResult<Option<u64>> {
        let ts: Option<i64> = self
            .conn
            .query_row(
                "SELECT updated_ms FROM state WHERE id = ?1",
                params![STATE_ROW_ID],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts.map(|v| v as u64))
    }

    /// Number of rows in the state table; never more than one.
    pub fn row_count(&self) -> PersistResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM state", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl StateStore for SqliteStateStore {
    fn init(&mut self) -> PersistResult<()> {
        self.conn.execute_batch(include_str!("schema.sql"))?;
        tracing::info!("state table ready");
        Ok(())
    }

    fn update(&mut self, data: &str) -> PersistResult<()> {
        self.conn.execute(
            "INSERT INTO state(id, format_version, updated_ms, data) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                format_version = excluded.format_version,
                updated_ms = excluded.updated_ms,
                data = excluded.data",
            params![STATE_ROW_ID, STATE_FORMAT_VERSION, now_ms() as i64, data],
        )?;
        tracing::debug!(bytes = data.len(), "state row written");
        Ok(())
    }

    fn load(&mut self) -> PersistResult<Option<String>> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT format_version, data FROM state WHERE id = ?1",
                params![STATE_ROW_ID],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((format_version, data)) = row else {
            return Ok(None);
        };
        if format_version != STATE_FORMAT_VERSION {
            return Err(PersistError::Message(format!(
                "unsupported state format version: {format_version}"
            )));
        }
        Ok(Some(data))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
