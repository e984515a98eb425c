// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Recipe-Sync server
//!
//! Runs the recipe sync core for one device and serves the app through a
//! network-first caching proxy.

use recipe_sync::{
    auth::{GoogleIdentityVerifier, LocalIdentityProvider, Persistence, SessionTracker},
    cache::{open_local_cache, CacheMode},
    config::Config,
    db::FirestoreDb,
    routes::NavigationGate,
    services::{ConnectivityMonitor, FirebaseStorage, RecipeStore, TagStore},
    worker::{CacheStorage, HttpFetcher, ServiceWorker},
    AppState,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured JSON logging
    init_logging();

    // Load configuration from environment
    let config = Config::from_env().expect("Failed to load configuration");
    tracing::info!(
        port = config.port,
        cache_version = %config.cache_version,
        "Starting Recipe-Sync"
    );

    // Local cache shared with every other consumer on this device
    let cache = open_local_cache(&config.cache_db_path);
    if cache.mode() == CacheMode::MemoryOnly {
        tracing::warn!("Running without durable cache; nothing survives a restart");
    }

    // Remote stores
    let db = FirestoreDb::new(&config.firebase_project_id)
        .await
        .expect("Failed to connect to Firestore");
    let blobs = FirebaseStorage::new(config.storage_bucket.clone());

    // Identity
    let verifier = match &config.google_client_id {
        Some(client_id) => Some(Arc::new(
            GoogleIdentityVerifier::new(client_id.clone())
                .expect("Failed to initialize Google identity verifier"),
        )),
        None => {
            tracing::info!("GOOGLE_CLIENT_ID not set, Google sign-in disabled");
            None
        }
    };
    let provider = LocalIdentityProvider::restore(cache.clone(), verifier).await;
    let session = SessionTracker::start(Arc::new(provider));
    session.configure_persistence(Persistence::Local).await;

    // Recipe store follows the session and connectivity
    let connectivity = ConnectivityMonitor::default();
    let recipes = RecipeStore::new(Arc::new(db), Arc::new(blobs), cache.clone(), session.clone());
    recipes.bind_session();
    recipes.watch_connectivity(&connectivity);

    let tags = TagStore::load(cache.clone()).await;

    // Network cache
    let fetcher = Arc::new(HttpFetcher::new(config.app_origin_url.clone())?);
    let worker = Arc::new(ServiceWorker::new(
        config.cache_version.clone(),
        fetcher,
        CacheStorage::new(cache.clone()),
    ));
    if let Err(e) = worker.start().await {
        // Without an installed shell the proxy still works network-only.
        tracing::error!(error = %e, "Service worker install failed");
    }
    spawn_shell_resync(worker.clone(), &connectivity);

    let gate = NavigationGate::new(session.clone(), config.auth_ready_timeout);

    // Build shared state
    let state = Arc::new(AppState {
        config: config.clone(),
        worker,
        session,
        gate,
        recipes,
        tags,
        connectivity,
    });

    // Build router
    let app = recipe_sync::routes::create_router(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Re-warm the app shell whenever connectivity comes back.
fn spawn_shell_resync(worker: Arc<ServiceWorker>, connectivity: &ConnectivityMonitor) {
    let mut online = connectivity.subscribe();
    tokio::spawn(async move {
        while online.changed().await.is_ok() {
            let now_online = *online.borrow_and_update();
            if now_online {
                worker.resync().await;
            }
        }
    });
}

/// Initialize structured JSON logging.
fn init_logging() {
    let format = tracing_subscriber::fmt::layer()
        .json()
        .with_target(false)
        .with_current_span(true)
        .flatten_event(true);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("recipe_sync=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .with(format)
        .init();
}
