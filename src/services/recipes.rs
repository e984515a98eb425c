// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recipe reconciliation store.
//!
//! Holds the signed-in user's recipes in memory, kept in step with the
//! remote store by one live subscription and written through to the local
//! cache so the list is available at the next offline start.
//!
//! Every subscription start and every `clear` bumps an epoch under the
//! state lock. Snapshot delivery checks the epoch under that same lock, so
//! a snapshot that was in flight when the user signed out is dropped.

use crate::auth::SessionTracker;
use crate::cache::LocalCache;
use crate::db::DocumentStore;
use crate::error::{AppError, Result};
use crate::models::{normalize_snapshot, Identity, NewRecipe, Recipe, RecipePatch};
use crate::services::connectivity::ConnectivityMonitor;
use crate::services::storage::{fallback_path, BlobStore, StorageRef};
use crate::services::subscription::{SnapshotSink, SubscriptionEvent, SubscriptionManager};
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Local cache key of an owner's recipe list.
pub fn cache_key(uid: &str) -> String {
    format!("recipes:{uid}")
}

#[derive(Default)]
struct StoreState {
    recipes: Vec<Recipe>,
    loading: bool,
    last_error: Option<String>,
    owner: Option<String>,
    /// A live snapshot has arrived for the current epoch.
    synced: bool,
    epoch: u64,
}

struct StoreInner {
    db: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    session: SessionTracker,
    cache: Arc<dyn LocalCache>,
    state: RwLock<StoreState>,
    subscription: SubscriptionManager,
    /// Ordered write-through queue to the local cache.
    writer: mpsc::UnboundedSender<(String, Value)>,
    version: watch::Sender<u64>,
    /// Serializes subscription starts.
    starting: tokio::sync::Mutex<()>,
}

impl StoreInner {
    fn notify(&self) {
        self.version.send_modify(|v| *v += 1);
    }

    /// Queue the current list for the local cache. Call with the state lock held.
    fn persist_locked(&self, state: &StoreState) {
        let Some(owner) = state.owner.as_deref() else {
            return;
        };
        match serde_json::to_value(&state.recipes) {
            Ok(value) => {
                if let Err(e) = self.writer.send((cache_key(owner), value)) {
                    tracing::warn!(owner, error = %e, "Local cache write-through queue closed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Recipe list encode failed"),
        }
    }

    fn on_event(&self, epoch: u64, event: SubscriptionEvent) {
        match event {
            SubscriptionEvent::Snapshot(docs) => {
                let recipes = normalize_snapshot(docs, Utc::now());
                let count = recipes.len();
                {
                    let mut state = self.state.write();
                    if state.epoch != epoch {
                        tracing::debug!(epoch, "Dropping stale snapshot");
                        return;
                    }
                    state.recipes = recipes;
                    state.loading = false;
                    state.last_error = None;
                    state.synced = true;
                    self.persist_locked(&state);
                }
                tracing::debug!(count, "Snapshot applied");
                self.notify();
            }
            SubscriptionEvent::Error(e) => {
                {
                    let mut state = self.state.write();
                    if state.epoch != epoch {
                        return;
                    }
                    state.loading = false;
                    state.last_error = Some(e.to_string());
                }
                tracing::error!(error = %e, "Recipe subscription failed, keeping last known recipes");
                self.notify();
            }
        }
    }
}

/// In-memory recipe list of the signed-in user.
#[derive(Clone)]
pub struct RecipeStore {
    inner: Arc<StoreInner>,
}

impl RecipeStore {
    /// Build the store. Must be called inside a Tokio runtime.
    pub fn new(
        db: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn LocalCache>,
        session: SessionTracker,
    ) -> Self {
        let (writer, mut queue) = mpsc::unbounded_channel::<(String, Value)>();
        let cache_writer = cache.clone();
        tokio::spawn(async move {
            while let Some((key, value)) = queue.recv().await {
                if let Err(e) = cache_writer.put(&key, value).await {
                    tracing::warn!(key = %key, error = %e, "Local cache write-through failed");
                }
            }
        });

        let (version, _) = watch::channel(0);
        let store = Self {
            inner: Arc::new(StoreInner {
                subscription: SubscriptionManager::new(db.clone()),
                db,
                blobs,
                session,
                cache,
                state: RwLock::new(StoreState::default()),
                writer,
                version,
                starting: tokio::sync::Mutex::new(()),
            }),
        };

        // Logout drops the previous user's recipes before it returns.
        let weak = Arc::downgrade(&store.inner);
        store.inner.session.on_logout(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                RecipeStore { inner }.clear();
            }
        }));
        store
    }

    pub fn recipes(&self) -> Vec<Recipe> {
        self.inner.state.read().recipes.clone()
    }

    pub fn recipe(&self, id: &str) -> Option<Recipe> {
        self.inner
            .state
            .read()
            .recipes
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.read().loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.read().last_error.clone()
    }

    /// UID the current state belongs to.
    pub fn owner(&self) -> Option<String> {
        self.inner.state.read().owner.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.subscription.is_active()
    }

    /// Bumped on every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    fn require_identity(&self) -> Result<Identity> {
        self.inner.session.current().ok_or(AppError::Unauthenticated)
    }

    /// Start (or restart) the live subscription for the current identity.
    ///
    /// Without an identity the state is cleared and `false` returned. The
    /// list is seeded from the local cache before the first snapshot lands.
    /// Concurrent calls run one at a time.
    pub async fn start_subscription(&self) -> bool {
        let _starting = self.inner.starting.lock().await;
        let Some(identity) = self.inner.session.current() else {
            self.clear();
            return false;
        };
        let uid = identity.uid.clone();

        let epoch = {
            let mut state = self.inner.state.write();
            state.epoch += 1;
            if state.owner.as_deref() != Some(uid.as_str()) {
                state.recipes.clear();
            }
            state.owner = Some(uid.clone());
            state.loading = true;
            state.last_error = None;
            state.synced = false;
            state.epoch
        };
        self.inner.notify();

        self.seed_from_cache(&uid, epoch).await;

        if self.inner.state.read().epoch != epoch {
            tracing::debug!(owner = %uid, "Subscription start superseded");
            return false;
        }

        let weak: Weak<StoreInner> = Arc::downgrade(&self.inner);
        let sink: SnapshotSink = Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_event(epoch, event);
            }
        });
        let opened = self.inner.subscription.subscribe(Some(&identity), sink);

        // A clear() that raced the subscribe above must not leave a listener behind.
        let superseded = self.inner.state.read().epoch != epoch;
        if superseded {
            tracing::debug!(owner = %uid, "Subscription superseded after subscribe");
            self.inner.subscription.teardown();
            return false;
        }
        opened
    }

    async fn seed_from_cache(&self, uid: &str, epoch: u64) {
        let cached = match self.inner.cache.get(&cache_key(uid)).await {
            Ok(Some(value)) => match serde_json::from_value::<Vec<Recipe>>(value) {
                Ok(recipes) => recipes,
                Err(e) => {
                    tracing::warn!(owner = %uid, error = %e, "Ignoring unreadable cached recipes");
                    return;
                }
            },
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(owner = %uid, error = %e, "Local cache read failed");
                return;
            }
        };

        let count = cached.len();
        {
            let mut state = self.inner.state.write();
            if state.epoch != epoch || state.synced {
                return;
            }
            state.recipes = cached;
        }
        tracing::debug!(owner = %uid, count, "Seeded recipes from local cache");
        self.inner.notify();
    }

    /// One-shot read of the current user's recipes, newest first.
    ///
    /// Leaves the live subscription and the in-memory state untouched.
    pub async fn fetch_once(&self) -> Result<Vec<Recipe>> {
        let Some(identity) = self.inner.session.current() else {
            return Ok(Vec::new());
        };
        let docs = self.inner.db.query_owned(&identity.uid).await?;
        Ok(normalize_snapshot(docs, Utc::now()))
    }

    /// Create a recipe owned by the current user.
    pub async fn create(&self, recipe: NewRecipe) -> Result<Recipe> {
        recipe.check()?;
        let identity = self.require_identity()?;

        let doc = self.inner.db.add(&identity.uid, recipe).await?;
        let created = Recipe::from_document(doc, Utc::now());
        tracing::info!(id = %created.id, owner = %identity.uid, "Recipe created");

        {
            let mut state = self.inner.state.write();
            if state.owner.as_deref() == Some(identity.uid.as_str())
                && !state.recipes.iter().any(|r| r.id == created.id)
            {
                let pos = state
                    .recipes
                    .iter()
                    .position(|r| r.created_at <= created.created_at)
                    .unwrap_or(state.recipes.len());
                state.recipes.insert(pos, created.clone());
                self.inner.persist_locked(&state);
            }
        }
        self.inner.notify();
        Ok(created)
    }

    /// Write only the fields `patch` changes, then patch the local copy.
    pub async fn update(&self, id: &str, patch: RecipePatch) -> Result<()> {
        patch.check()?;
        let identity = self.require_identity()?;
        if patch.is_empty() {
            return Ok(());
        }

        self.inner.db.update(&identity.uid, id, &patch).await?;
        tracing::info!(id, fields = ?patch.field_paths(), "Recipe updated");

        {
            let mut state = self.inner.state.write();
            if state.owner.as_deref() == Some(identity.uid.as_str()) {
                if let Some(recipe) = state.recipes.iter_mut().find(|r| r.id == id) {
                    patch.apply_to(recipe);
                    self.inner.persist_locked(&state);
                }
            }
        }
        self.inner.notify();
        Ok(())
    }

    /// Delete a recipe and, best-effort, its image.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let identity = self.require_identity()?;

        let image_url = match self.recipe(id) {
            Some(recipe) => recipe.image_url,
            None => match self.inner.db.get(&identity.uid, id).await {
                Ok(doc) => doc.and_then(|d| d.record.image_url),
                Err(e) => {
                    tracing::warn!(id, error = %e, "Could not look up recipe image");
                    None
                }
            },
        };
        if let Some(url) = image_url {
            self.delete_image(id, &url).await;
        }

        self.inner.db.delete(&identity.uid, id).await?;
        tracing::info!(id, owner = %identity.uid, "Recipe deleted");

        {
            let mut state = self.inner.state.write();
            if state.owner.as_deref() == Some(identity.uid.as_str()) {
                let before = state.recipes.len();
                state.recipes.retain(|r| r.id != id);
                if state.recipes.len() != before {
                    self.inner.persist_locked(&state);
                }
            }
        }
        self.inner.notify();
        Ok(())
    }

    async fn delete_image(&self, id: &str, url: &str) {
        let (bucket, path) = match StorageRef::parse(url) {
            Ok(reference) => (Some(reference.bucket), Some(reference.path)),
            Err(e) => {
                tracing::debug!(id, error = %e, "Image URL not decodable, trying fallback");
                (None, fallback_path(url))
            }
        };
        let Some(path) = path else {
            tracing::warn!(id, url, "Could not derive image path, leaving blob in place");
            return;
        };
        if let Err(e) = self.inner.blobs.delete(bucket.as_deref(), &path).await {
            tracing::warn!(id, ?bucket, path = %path, error = %e, "Image deletion failed");
        }
    }

    /// Flip the favorite flag. Unknown IDs are ignored.
    pub async fn toggle_favorite(&self, id: &str) -> Result<()> {
        let Some(current) = self.recipe(id).map(|r| r.is_favorite) else {
            tracing::debug!(id, "Toggle favorite on unknown recipe ignored");
            return Ok(());
        };
        self.update(id, RecipePatch::favorite(!current)).await
    }

    /// Tear down the subscription and empty all state. Idempotent.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.write();
            state.epoch += 1;
            state.recipes.clear();
            state.loading = false;
            state.last_error = None;
            state.owner = None;
            state.synced = false;
        }
        self.inner.subscription.teardown();
        self.inner.notify();
    }

    /// Follow identity changes: sign-in rebuilds, sign-out clears.
    pub fn bind_session(&self) -> JoinHandle<()> {
        let mut changes = self.inner.session.changes();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let identity = changes.borrow_and_update().clone();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = RecipeStore { inner };
                match identity {
                    Some(_) => {
                        store.start_subscription().await;
                    }
                    None => store.clear(),
                }
                drop(store);

                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Resubscribe whenever connectivity comes back.
    pub fn watch_connectivity(&self, monitor: &ConnectivityMonitor) -> JoinHandle<()> {
        let mut online = monitor.subscribe();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut was_online = *online.borrow_and_update();
            while online.changed().await.is_ok() {
                let now_online = *online.borrow_and_update();
                let reconnected = now_online && !was_online;
                was_online = now_online;
                if !reconnected {
                    continue;
                }
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let store = RecipeStore { inner };
                if store.owner().is_some() {
                    tracing::info!("Connectivity restored, resyncing recipes");
                    store.start_subscription().await;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::LocalIdentityProvider;
    use crate::cache::MemoryCache;
    use crate::db::MemoryDocumentStore;
    use crate::services::storage::MemoryBlobStore;

    async fn signed_out_store() -> RecipeStore {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let provider = LocalIdentityProvider::restore(cache.clone(), None).await;
        let tracker = SessionTracker::start(Arc::new(provider));
        RecipeStore::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::new()),
            cache,
            tracker,
        )
    }

    #[test]
    fn cache_key_is_per_owner() {
        assert_eq!(cache_key("u1"), "recipes:u1");
    }

    #[tokio::test]
    async fn unauthenticated_reads_are_empty() {
        let store = signed_out_store().await;
        assert!(store.fetch_once().await.unwrap().is_empty());
        assert!(!store.start_subscription().await);
        assert!(!store.is_subscribed());
    }

    #[tokio::test]
    async fn unauthenticated_writes_fail() {
        let store = signed_out_store().await;
        let err = store
            .create(NewRecipe::new("Soup", "water", "boil"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unauthenticated));
        assert!(matches!(
            store.delete("x").await.unwrap_err(),
            AppError::Unauthenticated
        ));
    }

    #[tokio::test]
    async fn invalid_recipe_rejected_before_auth() {
        let store = signed_out_store().await;
        let err = store.create(NewRecipe::new(" ", "water", "boil")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn image_delete_targets_the_referenced_bucket() {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let provider = LocalIdentityProvider::restore(cache.clone(), None).await;
        let tracker = SessionTracker::start(Arc::new(provider));
        let db = MemoryDocumentStore::new();
        let blobs = MemoryBlobStore::with_bucket("demo.appspot.com");
        blobs.insert("recipes/a.jpg", vec![1]);
        let store = RecipeStore::new(
            Arc::new(db.clone()),
            Arc::new(blobs.clone()),
            cache,
            tracker.clone(),
        );

        let uid = tracker.login_anonymously().await.unwrap().uid;
        let mut changes = tracker.changes();
        changes.wait_for(|c| c.is_some()).await.unwrap();

        let image = |bucket: &str| {
            let mut record = NewRecipe::new("Cake", "flour", "bake")
                .into_record(&uid, crate::models::StoredTimestamp::Absent);
            record.image_url = Some(format!(
                "https://firebasestorage.googleapis.com/v0/b/{bucket}/o/recipes%2Fa.jpg?alt=media"
            ));
            record
        };
        db.insert_raw("foreign", image("other.appspot.com"));
        db.insert_raw("own", image("demo.appspot.com"));

        store.delete("foreign").await.unwrap();
        assert!(blobs.contains("recipes/a.jpg"));

        store.delete("own").await.unwrap();
        assert!(blobs.is_empty());
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn toggle_unknown_is_noop() {
        let store = signed_out_store().await;
        store.toggle_favorite("missing").await.unwrap();
    }
}
