// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authentication: identity provider seam and the session tracker.
//!
//! The [`SessionTracker`] is the single place the rest of the app learns who
//! is signed in. It registers exactly one listener with the provider and
//! exposes a one-shot readiness signal for "the initial identity is known".

pub mod google;
pub mod provider;

pub use google::{GoogleIdentityVerifier, IdentityError};
pub use provider::LocalIdentityProvider;

use crate::error::Result;
use crate::models::Identity;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

/// Runs synchronously on every logout, before and after the provider signs out.
pub type LogoutHook = Box<dyn Fn() + Send + Sync>;

/// How long a session survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    /// Survives restarts on this device.
    Local,
    /// Lives only as long as the current process.
    Session,
}

/// External identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in_anonymously(&self) -> Result<Identity>;

    /// Federated sign-in with a Google ID token.
    async fn sign_in_with_google(&self, id_token: &str) -> Result<Identity>;

    async fn sign_out(&self) -> Result<()>;

    /// Fails if the environment cannot honor the requested persistence.
    async fn set_persistence(&self, persistence: Persistence) -> Result<()>;

    fn current(&self) -> Option<Identity>;

    /// Identity changes. The first item is the resolved initial state.
    fn listen(&self) -> BoxStream<'static, Option<Identity>>;
}

struct TrackerInner {
    provider: Arc<dyn IdentityProvider>,
    identity: watch::Sender<Option<Identity>>,
    /// `None` until the first identity arrives, then set exactly once.
    ready: watch::Sender<Option<Option<Identity>>>,
    logout_hooks: Mutex<Vec<LogoutHook>>,
}

impl TrackerInner {
    fn observe(&self, identity: Option<Identity>) {
        // Identity first, so readiness waiters always see it.
        self.identity.send_if_modified(|current| {
            if *current == identity {
                return false;
            }
            tracing::debug!(
                from = current.as_ref().map(|i| i.uid.as_str()),
                to = identity.as_ref().map(|i| i.uid.as_str()),
                "Identity changed"
            );
            *current = identity.clone();
            true
        });

        let first = self.ready.send_if_modified(|ready| {
            if ready.is_some() {
                return false;
            }
            *ready = Some(identity.clone());
            true
        });
        if first {
            tracing::info!(
                uid = identity.as_ref().map(|i| i.uid.as_str()),
                "Session resolved"
            );
        }
    }
}

/// Tracks the current identity for the lifetime of the app.
#[derive(Clone)]
pub struct SessionTracker {
    inner: Arc<TrackerInner>,
}

impl SessionTracker {
    /// Start tracking. Must be called inside a Tokio runtime.
    pub fn start(provider: Arc<dyn IdentityProvider>) -> Self {
        let (identity, _) = watch::channel(None);
        let (ready, _) = watch::channel(None);
        let mut changes = provider.listen();

        let inner = Arc::new(TrackerInner {
            provider,
            identity,
            ready,
            logout_hooks: Mutex::new(Vec::new()),
        });

        // The one listener. Holds a weak reference so the tracker can drop.
        let weak: Weak<TrackerInner> = Arc::downgrade(&inner);
        tokio::spawn(async move {
            while let Some(identity) = changes.next().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.observe(identity);
            }
        });

        Self { inner }
    }

    /// Best-known identity right now (`None` also while unresolved).
    pub fn current(&self) -> Option<Identity> {
        self.inner.identity.borrow().clone()
    }

    /// Receiver notified on every identity change.
    pub fn changes(&self) -> watch::Receiver<Option<Identity>> {
        self.inner.identity.subscribe()
    }

    pub fn ready_now(&self) -> bool {
        self.inner.ready.borrow().is_some()
    }

    /// Wait for the first identity observed (including `None` for
    /// "definitely signed out"). Every caller gets that same first value.
    pub async fn wait_ready(&self) -> Option<Identity> {
        let mut rx = self.inner.ready.subscribe();
        let first = match rx.wait_for(|ready| ready.is_some()).await {
            Ok(ready) => ready.clone().flatten(),
            Err(_) => self.current(),
        };
        first
    }

    pub async fn login_anonymously(&self) -> Result<Identity> {
        self.inner.provider.sign_in_anonymously().await
    }

    pub async fn login_with_google(&self, id_token: &str) -> Result<Identity> {
        self.inner.provider.sign_in_with_google(id_token).await
    }

    /// Register state that must be dropped the moment the user logs out.
    pub fn on_logout(&self, hook: LogoutHook) {
        self.inner.logout_hooks.lock().push(hook);
    }

    fn run_logout_hooks(&self) {
        for hook in self.inner.logout_hooks.lock().iter() {
            hook();
        }
    }

    /// Sign out. Registered hooks run before the provider call returns, so
    /// no caller observes the previous user's state after `logout` resolves.
    pub async fn logout(&self) -> Result<()> {
        self.run_logout_hooks();
        let result = self.inner.provider.sign_out().await;
        // Anything started between the first pass and the sign-out.
        self.run_logout_hooks();
        if result.is_ok() {
            tracing::info!("Logged out");
        }
        result
    }

    /// Configure session persistence. Unsupported environments keep working
    /// for the current process; the failure is only logged.
    pub async fn configure_persistence(&self, persistence: Persistence) -> bool {
        match self.inner.provider.set_persistence(persistence).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    ?persistence,
                    error = %e,
                    "Session persistence unavailable; session will not survive a restart"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::time::Duration;

    async fn tracker() -> SessionTracker {
        let provider = LocalIdentityProvider::restore(Arc::new(MemoryCache::new()), None).await;
        SessionTracker::start(Arc::new(provider))
    }

    #[tokio::test]
    async fn ready_resolves_with_signed_out_state() {
        let tracker = tracker().await;
        let first = tokio::time::timeout(Duration::from_secs(1), tracker.wait_ready())
            .await
            .expect("readiness should resolve");
        assert_eq!(first, None);
        assert!(tracker.ready_now());
    }

    #[tokio::test]
    async fn ready_value_never_changes_after_login() {
        let tracker = tracker().await;
        assert_eq!(tracker.wait_ready().await, None);

        let mut changes = tracker.changes();
        let identity = tracker.login_anonymously().await.unwrap();
        changes
            .wait_for(|current| current.is_some())
            .await
            .unwrap();

        assert_eq!(tracker.current(), Some(identity));
        // Readiness stays at the first observed value.
        assert_eq!(tracker.wait_ready().await, None);
    }

    #[tokio::test]
    async fn logout_runs_hooks_before_returning() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let tracker = tracker().await;
        tracker.login_anonymously().await.unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        tracker.on_logout(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tracker.logout().await.unwrap();
        assert!(runs.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn persistence_failure_is_swallowed() {
        let tracker = tracker().await;
        assert!(!tracker.configure_persistence(Persistence::Local).await);
        assert!(tracker.configure_persistence(Persistence::Session).await);
        assert!(tracker.login_anonymously().await.is_ok());
    }
}
