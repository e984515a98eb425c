// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Network cache (service worker).
//!
//! Lifecycle:
//! 1. `install` opens the versioned bucket and pre-caches the app shell
//! 2. waiting is skipped, so `activate` follows immediately
//! 3. `activate` purges every bucket from older versions and claims clients
//! 4. `handle_fetch` serves GETs network-first with cache fallback; other
//!    methods pass straight through

pub mod cache_storage;
pub mod fetch;

pub use cache_storage::{CacheBucket, CacheStorage};
pub use fetch::{FetchRequest, FetchResponse, Fetcher, HttpFetcher, ResponseSource};

use crate::error::{AppError, Result};
use axum::http::StatusCode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// App shell assets cached at install time.
pub const SHELL_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/manifest.json",
    "/favicon.ico",
    "/manifest-icon-192.png",
    "/manifest-icon-512.png",
    "/apple-icon-180.png",
];

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Parsed,
    Installing,
    Installed,
    Activating,
    Activated,
    /// Install failed; this version never takes over.
    Redundant,
}

/// Network-first caching worker for one deploy version.
pub struct ServiceWorker {
    version: String,
    shell_assets: Vec<String>,
    fetcher: Arc<dyn Fetcher>,
    caches: CacheStorage,
    state: Mutex<WorkerState>,
    clients_claimed: AtomicBool,
}

impl ServiceWorker {
    /// `version` doubles as the bucket name.
    pub fn new(version: impl Into<String>, fetcher: Arc<dyn Fetcher>, caches: CacheStorage) -> Self {
        Self {
            version: version.into(),
            shell_assets: SHELL_ASSETS.iter().map(|s| s.to_string()).collect(),
            fetcher,
            caches,
            state: Mutex::new(WorkerState::Parsed),
            clients_claimed: AtomicBool::new(false),
        }
    }

    pub fn with_shell_assets(mut self, assets: Vec<String>) -> Self {
        self.shell_assets = assets;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock()
    }

    pub fn clients_claimed(&self) -> bool {
        self.clients_claimed.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock() = state;
        tracing::debug!(version = %self.version, ?state, "Worker state changed");
    }

    /// Install then activate without waiting for old clients to go away.
    pub async fn start(&self) -> Result<()> {
        self.install().await?;
        // skipWaiting: the new version takes over immediately.
        self.activate().await
    }

    /// Pre-cache the app shell into this version's bucket.
    pub async fn install(&self) -> Result<()> {
        self.set_state(WorkerState::Installing);
        let bucket = self.caches.open(&self.version);

        if let Err(e) = bucket.add_all(self.fetcher.as_ref(), &self.shell_assets).await {
            tracing::error!(version = %self.version, error = %e, "App shell caching failed");
            self.set_state(WorkerState::Redundant);
            return Err(e);
        }

        tracing::info!(
            version = %self.version,
            assets = self.shell_assets.len(),
            "App shell cached"
        );
        self.set_state(WorkerState::Installed);
        Ok(())
    }

    /// Delete stale buckets and claim open clients.
    pub async fn activate(&self) -> Result<()> {
        if self.state() != WorkerState::Installed {
            return Err(AppError::Internal(anyhow::anyhow!(
                "cannot activate worker in state {:?}",
                self.state()
            )));
        }
        self.set_state(WorkerState::Activating);

        for name in self.caches.keys().await? {
            if name != self.version {
                tracing::info!(bucket = %name, "Deleting old cache");
                self.caches.delete(&name).await?;
            }
        }

        self.clients_claimed.store(true, Ordering::SeqCst);
        self.set_state(WorkerState::Activated);
        Ok(())
    }

    /// Intercept a request.
    ///
    /// Non-GET requests go to the network untouched; their network errors
    /// surface as `Err`. GET requests always produce a response.
    pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        if !request.is_cacheable_method() {
            return self.fetcher.fetch(request).await;
        }

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if response.status == StatusCode::OK {
                    let bucket = self.caches.open(&self.version);
                    if let Err(e) = bucket.put(&request.url, &response).await {
                        tracing::warn!(url = %request.url, error = %e, "Failed to cache response");
                    }
                }
                Ok(response)
            }
            Err(network_err) => {
                tracing::debug!(url = %request.url, error = %network_err, "Network failed, trying cache");
                match self.caches.match_url(&request.url).await {
                    Ok(Some(cached)) => {
                        tracing::info!(url = %request.url, "Serving from cache");
                        Ok(cached)
                    }
                    Ok(None) => Ok(FetchResponse::offline()),
                    Err(e) => {
                        tracing::warn!(url = %request.url, error = %e, "Cache lookup failed");
                        Ok(FetchResponse::offline())
                    }
                }
            }
        }
    }

    /// Refresh the app shell after connectivity returns. Best-effort.
    pub async fn resync(&self) {
        let bucket = self.caches.open(&self.version);
        match bucket.add_all(self.fetcher.as_ref(), &self.shell_assets).await {
            Ok(()) => tracing::info!(version = %self.version, "App shell refreshed"),
            Err(e) => tracing::warn!(version = %self.version, error = %e, "App shell refresh failed"),
        }
    }
}
