//! Named, versioned response buckets stored in the local cache.
//!
//! Entry keys are `sw:<bucket>:<sha256(url)>`; the URL itself is kept in
//! the entry so buckets can be enumerated without decoding keys.

use crate::cache::LocalCache;
use crate::error::{AppError, Result};
use crate::worker::fetch::{CachedResponse, FetchRequest, FetchResponse, Fetcher};
use axum::http::StatusCode;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

const KEY_PREFIX: &str = "sw:";

fn entry_key(bucket: &str, url: &str) -> String {
    let digest = hex::encode(Sha256::digest(url.as_bytes()));
    format!("{KEY_PREFIX}{bucket}:{digest}")
}

fn bucket_prefix(bucket: &str) -> String {
    format!("{KEY_PREFIX}{bucket}:")
}

/// All response buckets.
#[derive(Clone)]
pub struct CacheStorage {
    cache: Arc<dyn LocalCache>,
}

impl CacheStorage {
    pub fn new(cache: Arc<dyn LocalCache>) -> Self {
        Self { cache }
    }

    pub fn open(&self, name: &str) -> CacheBucket {
        CacheBucket {
            name: name.to_string(),
            cache: self.cache.clone(),
        }
    }

    /// Names of every bucket holding at least one entry.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let names: BTreeSet<String> = self
            .cache
            .keys_with_prefix(KEY_PREFIX)
            .await?
            .into_iter()
            .filter_map(|key| {
                let rest = key.strip_prefix(KEY_PREFIX)?;
                let (bucket, _digest) = rest.rsplit_once(':')?;
                Some(bucket.to_string())
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Drop a bucket. Returns whether anything was removed.
    pub async fn delete(&self, name: &str) -> Result<bool> {
        Ok(self.cache.remove_prefix(&bucket_prefix(name)).await? > 0)
    }

    /// Look `url` up across all buckets.
    pub async fn match_url(&self, url: &str) -> Result<Option<FetchResponse>> {
        for name in self.keys().await? {
            if let Some(hit) = self.open(&name).match_url(url).await? {
                return Ok(Some(hit));
            }
        }
        Ok(None)
    }
}

/// One named bucket.
#[derive(Clone)]
pub struct CacheBucket {
    name: String,
    cache: Arc<dyn LocalCache>,
}

impl CacheBucket {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn put(&self, url: &str, response: &FetchResponse) -> Result<()> {
        let entry = CachedResponse::from_response(url, response);
        let value = serde_json::to_value(entry)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cache entry encode failed: {e}")))?;
        self.cache.put(&entry_key(&self.name, url), value).await
    }

    pub async fn match_url(&self, url: &str) -> Result<Option<FetchResponse>> {
        let Some(value) = self.cache.get(&entry_key(&self.name, url)).await? else {
            return Ok(None);
        };
        let entry: CachedResponse = serde_json::from_value(value)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cache entry decode failed: {e}")))?;
        entry.into_response().map(Some)
    }

    /// Fetch and store every URL; fails if any fetch fails or is not 200.
    ///
    /// All responses are fetched before anything is written, so a failed
    /// run leaves the bucket as it was.
    pub async fn add_all(&self, fetcher: &dyn Fetcher, urls: &[String]) -> Result<()> {
        let mut fetched = Vec::with_capacity(urls.len());
        for url in urls {
            let response = fetcher.fetch(&FetchRequest::get(url.clone())).await?;
            if response.status != StatusCode::OK {
                return Err(AppError::Network(format!(
                    "{url}: unexpected status {}",
                    response.status
                )));
            }
            fetched.push((url, response));
        }
        for (url, response) in &fetched {
            self.put(url, response).await?;
        }
        Ok(())
    }
}
