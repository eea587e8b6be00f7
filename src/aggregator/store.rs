use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{CountLogEntry, CountSink, EntryExitEvent, DEFAULT_LOG_LIMIT};
use crate::now_s;

/// Default number of undelivered records kept; older ones are dropped first.
pub const DEFAULT_OUTBOX_LIMIT: usize = 10_000;

/// Kind of record waiting in the outbox.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutboxKind {
    Count,
    EntryExit,
}

impl OutboxKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OutboxKind::Count => "count",
            OutboxKind::EntryExit => "entry_exit",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "count" => Ok(OutboxKind::Count),
            "entry_exit" => Ok(OutboxKind::EntryExit),
            other => Err(anyhow!("unknown outbox kind '{}'", other)),
        }
    }
}

/// A record that could not be delivered to the backend yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboxItem {
    pub id: i64,
    pub kind: OutboxKind,
    pub payload_json: String,
    pub created_at: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LocationMirror {
    capacity: Option<u32>,
}

/// SQLite-backed local state for one location.
///
/// `mirror` keeps the last-known count log, entry/exit log and location record as JSON
/// values; `outbox` queues records for the backend in insertion order.
pub struct LocalStore {
    conn: Connection,
    location_id: String,
    mirror_limit: usize,
    outbox_limit: usize,
}

impl LocalStore {
    pub fn open(db_path: &str, location_id: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("open local store {}", db_path))?;
        Self::with_connection(conn, location_id)
    }

    pub fn open_in_memory(location_id: &str) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, location_id)
    }

    fn with_connection(conn: Connection, location_id: &str) -> Result<Self> {
        let store = Self {
            conn,
            location_id: location_id.to_string(),
            mirror_limit: DEFAULT_LOG_LIMIT,
            outbox_limit: DEFAULT_OUTBOX_LIMIT,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS mirror (
              key TEXT PRIMARY KEY,
              value_json TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS outbox (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              kind TEXT NOT NULL,
              payload_json TEXT NOT NULL,
              created_at INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Cap the outbox at `limit` records.
    pub fn with_outbox_limit(mut self, limit: usize) -> Self {
        self.outbox_limit = limit.max(1);
        self
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", suffix, self.location_id)
    }

    pub fn put_mirror<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value_json = serde_json::to_string(value)?;
        self.conn.execute(
            "INSERT INTO mirror (key, value_json, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json,
                                            updated_at = excluded.updated_at",
            params![key, value_json, now_s()? as i64],
        )?;
        Ok(())
    }

    pub fn get_mirror<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let value_json: Option<String> = self
            .conn
            .query_row(
                "SELECT value_json FROM mirror WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        match value_json {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).with_context(|| format!("corrupt mirror value {}", key))?,
            )),
            None => Ok(None),
        }
    }

    fn append_mirror<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        let mut values: Vec<T> = self.get_mirror(key)?.unwrap_or_default();
        values.push(value.clone());
        if values.len() > self.mirror_limit {
            let excess = values.len() - self.mirror_limit;
            values.drain(..excess);
        }
        self.put_mirror(key, &values)
    }

    /// Last-known count log, oldest first.
    pub fn count_log(&self) -> Result<Vec<CountLogEntry>> {
        Ok(self.get_mirror(&self.key("counts"))?.unwrap_or_default())
    }

    /// Last-known entry/exit log, oldest first.
    pub fn entry_exit_log(&self) -> Result<Vec<EntryExitEvent>> {
        Ok(self.get_mirror(&self.key("entry-exit"))?.unwrap_or_default())
    }

    pub fn cache_capacity(&self, capacity: Option<u32>) -> Result<()> {
        self.put_mirror(&self.key("location"), &LocationMirror { capacity })
    }

    /// Queue a record, dropping the oldest ones beyond the outbox limit.
    pub fn enqueue(&self, kind: OutboxKind, payload_json: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO outbox (kind, payload_json, created_at) VALUES (?1, ?2, ?3)",
            params![kind.as_str(), payload_json, now_s()? as i64],
        )?;
        let dropped = self.conn.execute(
            "DELETE FROM outbox WHERE id <= (
               SELECT id FROM outbox ORDER BY id DESC LIMIT 1 OFFSET ?1
             )",
            params![self.outbox_limit as i64],
        )?;
        if dropped > 0 {
            log::warn!(
                "LocalStore: outbox full, dropped {} oldest record(s) for {}",
                dropped,
                self.location_id
            );
        }
        Ok(())
    }

    /// Up to `limit` queued records, oldest first.
    pub fn pending(&self, limit: usize) -> Result<Vec<OutboxItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, payload_json, created_at FROM outbox ORDER BY id ASC LIMIT ?1",
        )?;
        let mut rows = stmt.query(params![limit as i64])?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let kind: String = row.get(1)?;
            let created_at: i64 = row.get(3)?;
            items.push(OutboxItem {
                id: row.get(0)?,
                kind: OutboxKind::parse(&kind)?,
                payload_json: row.get(2)?,
                created_at: created_at.max(0) as u64,
            });
        }
        Ok(items)
    }

    pub fn pending_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM outbox", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM outbox WHERE id = ?1", params![id])?;
        Ok(())
    }
}

impl CountSink for LocalStore {
    fn record_count(&mut self, entry: &CountLogEntry) -> Result<()> {
        self.append_mirror(&self.key("counts"), entry)
    }

    fn record_entry_exit(&mut self, event: &EntryExitEvent) -> Result<()> {
        self.append_mirror(&self.key("entry-exit"), event)
    }

    fn fetch_capacity(&mut self) -> Result<Option<u32>> {
        let location: Option<LocationMirror> = self.get_mirror(&self.key("location"))?;
        Ok(location.and_then(|location| location.capacity))
    }
}
