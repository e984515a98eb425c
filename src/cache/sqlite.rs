// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! SQLite-backed durable cache.
//!
//! The database file is the coordination domain: any number of handles (in
//! this process or others) may open it. WAL lets readers proceed while one
//! writer holds the lock, and every write runs in an `IMMEDIATE`
//! transaction so concurrent writers queue on the busy timeout instead of
//! failing mid-write.

use crate::cache::{CacheMode, LocalCache};
use crate::error::{AppError, Result};
use crate::time_utils::format_utc_rfc3339;
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_entries (
    key        TEXT PRIMARY KEY NOT NULL,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    writer     TEXT NOT NULL
);
";

fn cache_err(e: impl std::fmt::Display) -> AppError {
    AppError::Database(format!("local cache: {e}"))
}

/// Durable [`LocalCache`] handle. Each handle is one consumer ("tab").
#[derive(Clone)]
pub struct SqliteCache {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
    /// Identifies this handle in `writer` for diagnostics.
    consumer_id: String,
}

impl SqliteCache {
    /// Open (creating if needed) the cache file and join its coordination domain.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(cache_err)?;
        }

        let conn = Connection::open(path).map_err(cache_err)?;
        conn.busy_timeout(BUSY_TIMEOUT).map_err(cache_err)?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String = conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(cache_err)?;
        conn.execute_batch(SCHEMA).map_err(cache_err)?;

        let consumer_id = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(path = %path.display(), consumer_id = %consumer_id, "Joined local cache");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
            consumer_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a blocking SQLite operation off the async executor.
    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("cache task failed: {e}")))?
        .map_err(cache_err)
    }
}

#[async_trait]
impl LocalCache for SqliteCache {
    fn mode(&self) -> CacheMode {
        CacheMode::Durable
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let key = key.to_string();
        let raw: Option<String> = self
            .run(move |conn| {
                conn.query_row(
                    "SELECT value FROM cache_entries WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;

        raw.map(|s| serde_json::from_str(&s).map_err(cache_err))
            .transpose()
    }

    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let key = key.to_string();
        let body = serde_json::to_string(&value).map_err(cache_err)?;
        let writer = self.consumer_id.clone();
        let now = format_utc_rfc3339(chrono::Utc::now());
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute(
                "INSERT INTO cache_entries (key, value, updated_at, writer)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at,
                    writer = excluded.writer",
                params![key, body, now, writer],
            )?;
            tx.commit()
        })
        .await
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
            tx.commit()
        })
        .await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key FROM cache_entries
                 WHERE substr(key, 1, length(?1)) = ?1
                 ORDER BY key",
            )?;
            let keys = stmt
                .query_map(params![prefix], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(keys)
        })
        .await
    }

    async fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        let prefix = prefix.to_string();
        self.run(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let removed = tx.execute(
                "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
                params![prefix],
            )?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }
}
