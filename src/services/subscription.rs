// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Live query subscription manager.
//!
//! At most one snapshot listener is active at a time. Subscribing always
//! tears the previous listener down first, so two listeners can never feed
//! the same sink.

use crate::db::DocumentStore;
use crate::error::AppError;
use crate::models::{Identity, RecipeDocument};
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a live subscription delivers.
#[derive(Debug)]
pub enum SubscriptionEvent {
    /// Full owner-filtered snapshot, newest first.
    Snapshot(Vec<RecipeDocument>),
    Error(AppError),
}

/// Receives subscription events. Runs on the listener task.
pub type SnapshotSink = Box<dyn Fn(SubscriptionEvent) + Send + Sync>;

struct SubscriptionHandle {
    owner: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    fn stop(self) {
        self.cancel.cancel();
        self.task.abort();
        tracing::debug!(owner = %self.owner, "Subscription torn down");
    }
}

/// Owns the single active listener.
pub struct SubscriptionManager {
    db: Arc<dyn DocumentStore>,
    active: Mutex<Option<SubscriptionHandle>>,
}

impl SubscriptionManager {
    pub fn new(db: Arc<dyn DocumentStore>) -> Self {
        Self {
            db,
            active: Mutex::new(None),
        }
    }

    /// Open a listener for `owner`'s recipes, replacing any active one.
    ///
    /// Without an identity nothing is opened and `false` is returned.
    pub fn subscribe(&self, owner: Option<&Identity>, sink: SnapshotSink) -> bool {
        self.teardown();

        let Some(owner) = owner else {
            return false;
        };

        let db = self.db.clone();
        let uid = owner.uid.clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn({
            let uid = uid.clone();
            async move {
                let mut stream = tokio::select! {
                    _ = token.cancelled() => return,
                    opened = db.watch(&uid) => match opened {
                        Ok(stream) => stream,
                        Err(e) => {
                            tracing::error!(owner = %uid, error = %e, "Failed to open subscription");
                            sink(SubscriptionEvent::Error(e));
                            return;
                        }
                    },
                };

                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        next = stream.next() => match next {
                            Some(Ok(docs)) => {
                                if token.is_cancelled() {
                                    break;
                                }
                                sink(SubscriptionEvent::Snapshot(docs));
                            }
                            Some(Err(e)) => {
                                tracing::warn!(owner = %uid, error = %e, "Subscription error");
                                sink(SubscriptionEvent::Error(e));
                            }
                            None => {
                                tracing::debug!(owner = %uid, "Subscription stream ended");
                                break;
                            }
                        },
                    }
                }
            }
        });

        tracing::info!(owner = %uid, "Subscription opened");
        *self.active.lock() = Some(SubscriptionHandle {
            owner: uid,
            cancel,
            task,
        });
        true
    }

    /// Stop the active listener, if any. Safe to call repeatedly.
    pub fn teardown(&self) {
        let handle = self.active.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Owner of the active listener.
    pub fn active_owner(&self) -> Option<String> {
        self.active.lock().as_ref().map(|h| h.owner.clone())
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}
