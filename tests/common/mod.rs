// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{HeaderMap, StatusCode};
use dashmap::DashMap;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use recipe_sync::auth::{IdentityProvider, Persistence, SessionTracker};
use recipe_sync::cache::{LocalCache, MemoryCache};
use recipe_sync::config::Config;
use recipe_sync::db::{FirestoreDb, MemoryDocumentStore};
use recipe_sync::error::{AppError, Result};
use recipe_sync::models::{Identity, Recipe};
use recipe_sync::routes::{create_router, NavigationGate};
use recipe_sync::services::{ConnectivityMonitor, MemoryBlobStore, RecipeStore, TagStore};
use recipe_sync::worker::{
    CacheStorage, FetchRequest, FetchResponse, Fetcher, ResponseSource, ServiceWorker,
};
use recipe_sync::AppState;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

pub const WAIT: Duration = Duration::from_secs(2);

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Identity provider whose identity the test sets directly.
pub struct TestIdentityProvider {
    state: watch::Sender<Option<Identity>>,
    /// Never resolve the initial identity.
    stalled: bool,
    minted: AtomicUsize,
}

#[allow(dead_code)]
impl TestIdentityProvider {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state,
            stalled: false,
            minted: AtomicUsize::new(0),
        }
    }

    /// Provider that never reports its initial state.
    pub fn stalled() -> Self {
        Self {
            stalled: true,
            ..Self::new()
        }
    }

    pub fn set(&self, identity: Option<Identity>) {
        self.state.send_replace(identity);
    }
}

#[async_trait]
impl IdentityProvider for TestIdentityProvider {
    async fn sign_in_anonymously(&self) -> Result<Identity> {
        let n = self.minted.fetch_add(1, Ordering::SeqCst);
        let identity = Identity::anonymous(format!("anon-{n}"));
        self.set(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_in_with_google(&self, _id_token: &str) -> Result<Identity> {
        Err(AppError::Unsupported("test provider".to_string()))
    }

    async fn sign_out(&self) -> Result<()> {
        self.set(None);
        Ok(())
    }

    async fn set_persistence(&self, _persistence: Persistence) -> Result<()> {
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    fn listen(&self) -> BoxStream<'static, Option<Identity>> {
        if self.stalled {
            return futures_util::stream::pending().boxed();
        }
        WatchStream::new(self.state.subscribe()).boxed()
    }
}

/// Everything a recipe store test needs, wired over in-memory backends.
#[allow(dead_code)]
pub struct TestEnv {
    pub db: MemoryDocumentStore,
    pub blobs: MemoryBlobStore,
    pub cache: Arc<dyn LocalCache>,
    pub provider: Arc<TestIdentityProvider>,
    pub session: SessionTracker,
    pub store: RecipeStore,
}

#[allow(dead_code)]
impl TestEnv {
    pub async fn new() -> Self {
        Self::with_cache(Arc::new(MemoryCache::new())).await
    }

    pub async fn with_cache(cache: Arc<dyn LocalCache>) -> Self {
        let db = MemoryDocumentStore::new();
        let blobs = MemoryBlobStore::new();
        let provider = Arc::new(TestIdentityProvider::new());
        let session = SessionTracker::start(provider.clone());
        let store = RecipeStore::new(
            Arc::new(db.clone()),
            Arc::new(blobs.clone()),
            cache.clone(),
            session.clone(),
        );
        session.wait_ready().await;
        Self {
            db,
            blobs,
            cache,
            provider,
            session,
            store,
        }
    }

    /// Switch identity and wait until the tracker has seen it.
    pub async fn sign_in(&self, uid: &str) -> Identity {
        let identity = Identity::anonymous(uid);
        self.provider.set(Some(identity.clone()));
        self.wait_for_identity(Some(uid)).await;
        identity
    }

    pub async fn sign_out(&self) {
        self.session.logout().await.unwrap();
        self.wait_for_identity(None).await;
    }

    async fn wait_for_identity(&self, uid: Option<&str>) {
        let mut changes = self.session.changes();
        tokio::time::timeout(
            WAIT,
            changes.wait_for(|current| current.as_ref().map(|i| i.uid.as_str()) == uid),
        )
        .await
        .expect("identity change not observed")
        .expect("tracker dropped");
    }

    /// Wait until the in-memory list satisfies `pred`.
    pub async fn wait_for_recipes(&self, pred: impl Fn(&[Recipe]) -> bool) -> Vec<Recipe> {
        let mut changes = self.store.changes();
        let store = self.store.clone();
        tokio::time::timeout(WAIT, changes.wait_for(|_| pred(&store.recipes())))
            .await
            .expect("recipes never reached expected state")
            .expect("store dropped");
        self.store.recipes()
    }
}

/// Scripted origin for network cache tests.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    routes: Arc<DashMap<String, (StatusCode, &'static str)>>,
    offline: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    /// Serves every default shell asset with 200.
    pub fn with_shell() -> Self {
        let fetcher = Self::default();
        for asset in recipe_sync::worker::SHELL_ASSETS {
            fetcher.serve(asset, StatusCode::OK, "shell");
        }
        fetcher
    }

    pub fn serve(&self, url: &str, status: StatusCode, body: &'static str) {
        self.routes.insert(url.to_string(), (status, body));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::Network("offline".to_string()));
        }
        let (status, body) = self
            .routes
            .get(&request.url)
            .map(|entry| *entry.value())
            .unwrap_or((StatusCode::NOT_FOUND, "not found"));
        Ok(FetchResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            source: ResponseSource::Network,
        })
    }
}

/// Create a test app over in-memory backends and a scripted origin.
#[allow(dead_code)]
pub async fn create_test_app(fetcher: ScriptedFetcher) -> (axum::Router, Arc<AppState>, TestEnv) {
    let config = Config {
        auth_ready_timeout: Duration::from_millis(200),
        ..Config::default()
    };
    let env = TestEnv::new().await;

    let worker = Arc::new(ServiceWorker::new(
        config.cache_version.clone(),
        Arc::new(fetcher),
        CacheStorage::new(env.cache.clone()),
    ));
    worker.start().await.expect("worker install");

    let state = Arc::new(AppState {
        gate: NavigationGate::new(env.session.clone(), config.auth_ready_timeout),
        config,
        worker,
        session: env.session.clone(),
        recipes: env.store.clone(),
        tags: TagStore::load(env.cache.clone()).await,
        connectivity: ConnectivityMonitor::default(),
    });

    (create_router(state.clone()), state, env)
}
