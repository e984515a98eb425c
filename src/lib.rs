// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Recipe-Sync: offline-first sync core for a personal recipe collection
//!
//! This crate keeps a signed-in user's recipes in step with a remote
//! document store, caches them locally for offline starts, and serves the
//! app shell through a network-first caching proxy.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
pub mod worker;

use auth::SessionTracker;
use config::Config;
use routes::NavigationGate;
use services::{ConnectivityMonitor, RecipeStore, TagStore};
use std::sync::Arc;
use worker::ServiceWorker;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub worker: Arc<ServiceWorker>,
    pub session: SessionTracker,
    pub gate: NavigationGate,
    pub recipes: RecipeStore,
    pub tags: TagStore,
    pub connectivity: ConnectivityMonitor,
}
