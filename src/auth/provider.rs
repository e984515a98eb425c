// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Identity provider backed by the local cache.
//!
//! Anonymous sign-in mints a random UID; Google sign-in verifies an ID
//! token. With [`Persistence::Local`] the session survives restarts via the
//! local cache; with [`Persistence::Session`] it lives only in memory.

use crate::auth::google::{GoogleIdentityVerifier, IdentityError};
use crate::auth::{IdentityProvider, Persistence};
use crate::cache::{CacheMode, LocalCache};
use crate::error::{AppError, Result};
use crate::models::Identity;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Cache key of the persisted session.
pub const SESSION_KEY: &str = "auth:session";

/// [`IdentityProvider`] keeping sessions on this device.
pub struct LocalIdentityProvider {
    cache: Arc<dyn LocalCache>,
    verifier: Option<Arc<GoogleIdentityVerifier>>,
    persistence: Mutex<Persistence>,
    state: watch::Sender<Option<Identity>>,
}

impl LocalIdentityProvider {
    /// Restore any persisted session and build the provider.
    pub async fn restore(
        cache: Arc<dyn LocalCache>,
        verifier: Option<Arc<GoogleIdentityVerifier>>,
    ) -> Self {
        let persistence = match cache.mode() {
            CacheMode::Durable => Persistence::Local,
            CacheMode::MemoryOnly => Persistence::Session,
        };

        let restored = match cache.get(SESSION_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<Identity>(value) {
                Ok(identity) => {
                    tracing::info!(uid = %identity.uid, "Restored persisted session");
                    Some(identity)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Discarding unreadable persisted session");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read persisted session");
                None
            }
        };

        let (state, _) = watch::channel(restored);
        Self {
            cache,
            verifier,
            persistence: Mutex::new(persistence),
            state,
        }
    }

    async fn establish(&self, identity: Identity) -> Identity {
        let persist = *self.persistence.lock() == Persistence::Local;
        if persist {
            match serde_json::to_value(&identity) {
                Ok(value) => {
                    if let Err(e) = self.cache.put(SESSION_KEY, value).await {
                        tracing::warn!(error = %e, "Session will not survive a restart");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Session encode failed"),
            }
        }
        self.state.send_replace(Some(identity.clone()));
        identity
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in_anonymously(&self) -> Result<Identity> {
        let identity = Identity::anonymous(uuid::Uuid::new_v4().simple().to_string());
        tracing::info!(uid = %identity.uid, "Signed in anonymously");
        Ok(self.establish(identity).await)
    }

    async fn sign_in_with_google(&self, id_token: &str) -> Result<Identity> {
        let verifier = self
            .verifier
            .as_ref()
            .ok_or_else(|| AppError::Unsupported("Google sign-in is not configured".to_string()))?;

        let identity = verifier.verify(id_token).await.map_err(|e| match e {
            IdentityError::Rejected(msg) => AppError::Auth(msg),
            IdentityError::Transient(msg) => AppError::Network(msg),
        })?;
        Ok(self.establish(identity).await)
    }

    async fn sign_out(&self) -> Result<()> {
        let previous = self.state.send_replace(None);
        if let Err(e) = self.cache.remove(SESSION_KEY).await {
            tracing::warn!(error = %e, "Failed to clear persisted session");
        }
        if let Some(identity) = previous {
            tracing::info!(uid = %identity.uid, "Signed out");
        }
        Ok(())
    }

    async fn set_persistence(&self, persistence: Persistence) -> Result<()> {
        if persistence == Persistence::Local && self.cache.mode() == CacheMode::MemoryOnly {
            return Err(AppError::Unsupported(
                "durable storage unavailable for session persistence".to_string(),
            ));
        }

        *self.persistence.lock() = persistence;
        let current = self.current();
        match (persistence, current) {
            (Persistence::Local, Some(identity)) => {
                let value = serde_json::to_value(&identity)
                    .map_err(|e| AppError::Internal(anyhow::anyhow!("session encode failed: {e}")))?;
                self.cache.put(SESSION_KEY, value).await?;
            }
            (Persistence::Session, _) => self.cache.remove(SESSION_KEY).await?,
            (Persistence::Local, None) => {}
        }
        Ok(())
    }

    fn current(&self) -> Option<Identity> {
        self.state.borrow().clone()
    }

    fn listen(&self) -> BoxStream<'static, Option<Identity>> {
        WatchStream::new(self.state.subscribe()).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryCache, SqliteCache};

    #[tokio::test]
    async fn session_survives_restart_with_local_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        let cache: Arc<dyn LocalCache> = Arc::new(SqliteCache::open(&path).unwrap());
        let provider = LocalIdentityProvider::restore(cache, None).await;
        let identity = provider.sign_in_anonymously().await.unwrap();

        let reopened: Arc<dyn LocalCache> = Arc::new(SqliteCache::open(&path).unwrap());
        let restored = LocalIdentityProvider::restore(reopened, None).await;
        assert_eq!(restored.current(), Some(identity));
    }

    #[tokio::test]
    async fn sign_out_forgets_persisted_session() {
        let cache: Arc<dyn LocalCache> = Arc::new(MemoryCache::new());
        let provider = LocalIdentityProvider::restore(cache.clone(), None).await;
        provider.sign_in_anonymously().await.unwrap();
        provider.sign_out().await.unwrap();

        assert_eq!(provider.current(), None);
        assert_eq!(cache.get(SESSION_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn local_persistence_unsupported_without_durable_cache() {
        let provider = LocalIdentityProvider::restore(Arc::new(MemoryCache::new()), None).await;
        let err = provider
            .set_persistence(Persistence::Local)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
    }

    #[tokio::test]
    async fn google_sign_in_requires_configuration() {
        let provider = LocalIdentityProvider::restore(Arc::new(MemoryCache::new()), None).await;
        let err = provider.sign_in_with_google("token").await.unwrap_err();
        assert!(matches!(err, AppError::Unsupported(_)));
    }
}
