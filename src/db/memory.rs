// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-process document store.
//!
//! Behaves like the remote store as seen from the client: owner scoping,
//! server-assigned IDs and timestamps, field deletion, and live snapshots
//! that coalesce rapid changes. Used for tests and offline development.
//! Can be switched "offline" to exercise failure paths.

use crate::db::{DocumentStore, SnapshotStream};
use crate::error::{AppError, Result};
use crate::models::recipe::normalize_snapshot;
use crate::models::{NewRecipe, RecipeDocument, RecipePatch, RecipeRecord, StoredTimestamp};
use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

struct Inner {
    docs: Mutex<BTreeMap<String, RecipeRecord>>,
    /// Bumped on every change; watchers re-read on each bump.
    revision: watch::Sender<u64>,
    offline: AtomicBool,
}

/// In-memory [`DocumentStore`].
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                docs: Mutex::new(BTreeMap::new()),
                revision,
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Simulate loss (or return) of connectivity to the remote store.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
        self.bump();
    }

    /// Seed a document with an arbitrary stored shape, bypassing the client path.
    pub fn insert_raw(&self, id: &str, record: RecipeRecord) {
        self.inner.docs.lock().insert(id.to_string(), record);
        self.bump();
    }

    /// Stored JSON of a document, exactly as a fresh reader would see it.
    pub fn raw(&self, id: &str) -> Option<serde_json::Value> {
        let docs = self.inner.docs.lock();
        docs.get(id).and_then(|r| serde_json::to_value(r).ok())
    }

    pub fn len(&self) -> usize {
        self.inner.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn bump(&self) {
        self.inner.revision.send_modify(|rev| *rev += 1);
    }

    fn check_online(&self) -> Result<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(AppError::Network("remote store unreachable".to_string()));
        }
        Ok(())
    }

    fn snapshot(&self, owner: &str) -> Result<Vec<RecipeDocument>> {
        self.check_online()?;
        let docs: Vec<RecipeDocument> = self
            .inner
            .docs
            .lock()
            .iter()
            .filter(|(_, record)| record.user_id == owner)
            .map(|(id, record)| RecipeDocument {
                id: id.clone(),
                record: record.clone(),
            })
            .collect();

        // Order with the same normalization readers use, but return stored shapes.
        let now = Utc::now();
        let order: Vec<String> = normalize_snapshot(docs.clone(), now)
            .into_iter()
            .map(|r| r.id)
            .collect();
        let mut by_id: BTreeMap<String, RecipeDocument> =
            docs.into_iter().map(|d| (d.id.clone(), d)).collect();
        Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn query_owned(&self, owner: &str) -> Result<Vec<RecipeDocument>> {
        self.snapshot(owner)
    }

    async fn get(&self, owner: &str, id: &str) -> Result<Option<RecipeDocument>> {
        self.check_online()?;
        let docs = self.inner.docs.lock();
        Ok(docs
            .get(id)
            .filter(|record| record.user_id == owner)
            .map(|record| RecipeDocument {
                id: id.to_string(),
                record: record.clone(),
            }))
    }

    async fn add(&self, owner: &str, recipe: NewRecipe) -> Result<RecipeDocument> {
        self.check_online()?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        let record = recipe.into_record(owner, StoredTimestamp::server(Utc::now()));
        self.inner.docs.lock().insert(id.clone(), record.clone());
        self.bump();
        Ok(RecipeDocument { id, record })
    }

    async fn update(&self, owner: &str, id: &str, patch: &RecipePatch) -> Result<()> {
        self.check_online()?;
        {
            let mut docs = self.inner.docs.lock();
            let record = docs
                .get_mut(id)
                .filter(|record| record.user_id == owner)
                .ok_or_else(|| AppError::NotFound(format!("recipe {id}")))?;
            patch.apply_to_record(record);
        }
        self.bump();
        Ok(())
    }

    async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        self.check_online()?;
        {
            let mut docs = self.inner.docs.lock();
            match docs.get(id) {
                Some(record) if record.user_id == owner => {
                    docs.remove(id);
                }
                Some(_) => return Err(AppError::NotFound(format!("recipe {id}"))),
                // Deleting a missing document is not an error remotely either.
                None => return Ok(()),
            }
        }
        self.bump();
        Ok(())
    }

    async fn watch(&self, owner: &str) -> Result<SnapshotStream> {
        // Opening a listener needs the remote; an open one survives outages.
        self.check_online()?;
        let store = self.clone();
        let owner = owner.to_string();
        let stream = WatchStream::new(self.inner.revision.subscribe())
            .map(move |_| store.snapshot(&owner));
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queries_are_owner_scoped() {
        let store = MemoryDocumentStore::new();
        store.add("u1", NewRecipe::new("Soup", "water", "boil")).await.unwrap();
        store.add("u2", NewRecipe::new("Cake", "flour", "bake")).await.unwrap();

        let docs = store.query_owned("u1").await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].record.title, "Soup");
        assert_eq!(docs[0].record.user_id, "u1");
    }

    #[tokio::test]
    async fn foreign_documents_look_missing() {
        let store = MemoryDocumentStore::new();
        let doc = store.add("u1", NewRecipe::new("Soup", "water", "boil")).await.unwrap();

        assert!(store.get("u2", &doc.id).await.unwrap().is_none());
        let err = store
            .update("u2", &doc.id, &RecipePatch::favorite(true))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.delete("u2", &doc.id).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn offline_store_rejects_writes() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        let err = store
            .add("u1", NewRecipe::new("Soup", "water", "boil"))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn listener_cannot_open_offline() {
        let store = MemoryDocumentStore::new();
        store.set_offline(true);
        assert!(store.watch("u1").await.is_err());
        store.set_offline(false);
        assert!(store.watch("u1").await.is_ok());
    }

    #[tokio::test]
    async fn watch_emits_current_state_then_changes() {
        let store = MemoryDocumentStore::new();
        let mut stream = store.watch("u1").await.unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert!(first.is_empty());

        store.add("u1", NewRecipe::new("Soup", "water", "boil")).await.unwrap();
        let second = stream.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 1);
    }
}
