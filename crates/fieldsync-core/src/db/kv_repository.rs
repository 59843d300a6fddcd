//! `SQLite`-backed key-value store

use std::path::Path;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::Mutex;

use super::Database;
use crate::error::Result;
use crate::store::{KeyValueStore, UpdateFn};

/// `SQLite` implementation of [`KeyValueStore`]
///
/// Each `set` is a single upsert inside its own transaction, so a reader
/// sees either the previous value or the new one, never a partial write.
/// `update` reads and writes inside one `BEGIN IMMEDIATE` transaction, so
/// several processes can share the file without losing each other's writes.
pub struct SqliteKeyValueStore {
    db: Mutex<Database>,
}

impl SqliteKeyValueStore {
    /// Open (or create) the store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_database(Database::open(path)?))
    }

    /// Open an in-memory store (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self::from_database(Database::open_in_memory()?))
    }

    pub fn from_database(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }
}

fn read_value(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM kv_store WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(value)
}

fn write_value(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT OR REPLACE INTO kv_store (key, value, updated_at) VALUES (?, ?, ?)",
        params![key, value, now],
    )?;
    Ok(())
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = self.db.lock().await;
        read_value(db.connection(), key)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db.connection_mut().transaction()?;
        write_value(&tx, key, value)?;
        tx.commit()?;
        Ok(())
    }

    async fn update(&self, key: &str, apply: UpdateFn<'_>) -> Result<()> {
        let mut db = self.db.lock().await;
        let tx = db
            .connection_mut()
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let next = apply(read_value(&tx, key)?)?;
        write_value(&tx, key, &next)?;
        tx.commit()?;
        Ok(())
    }
}
