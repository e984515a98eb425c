// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local document cache shared by every open consumer of the app.
//!
//! Consistency contract:
//! - All handles opened on the same backing file form one coordination
//!   domain. Writes are serialized by the backing store, never interleaved.
//! - A completed `put`/`remove` from any handle is visible to every other
//!   handle's subsequent reads.
//! - Callers never assume exclusive access.
//!
//! If durable storage is unavailable the cache degrades to memory-only and
//! the rest of the system carries on without durability.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCache;
pub use sqlite::SqliteCache;

use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Whether cached values survive a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Durable,
    MemoryOnly,
}

/// Key/value capability over JSON documents.
#[async_trait]
pub trait LocalCache: Send + Sync {
    fn mode(&self) -> CacheMode;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, sorted.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize>;
}

/// Open the durable cache at `path`, falling back to memory-only.
///
/// Never fails: an unusable backing store is logged and replaced.
pub fn open_local_cache(path: &Path) -> Arc<dyn LocalCache> {
    match SqliteCache::open(path) {
        Ok(cache) => {
            tracing::info!(path = %path.display(), "Durable local cache ready");
            Arc::new(cache)
        }
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Durable cache unavailable, continuing with memory-only cache"
            );
            Arc::new(MemoryCache::new())
        }
    }
}
