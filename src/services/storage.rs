// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Remote blob storage for recipe images.
//!
//! Recipes keep an image as a download URL. Deleting the image needs the
//! object path back, so [`StorageRef`] decodes both URL forms the storage
//! service hands out:
//! - `https://firebasestorage.googleapis.com/v0/b/<bucket>/o/<encoded path>?alt=media&token=..`
//! - `gs://<bucket>/<path>`

use crate::error::{AppError, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use url::Url;

const DOWNLOAD_HOST: &str = "firebasestorage.googleapis.com";
const API_BASE: &str = "https://firebasestorage.googleapis.com/v0";

/// Storage reference decode errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StorageRefError {
    #[error("not a storage URL: {0}")]
    Unrecognized(String),

    #[error("storage URL has no object path: {0}")]
    MissingPath(String),

    #[error("object path is not valid UTF-8 after decoding")]
    BadEncoding,
}

/// Bucket plus object path of a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRef {
    pub bucket: String,
    pub path: String,
}

impl StorageRef {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Parse a download URL or `gs://` reference.
    pub fn parse(reference: &str) -> std::result::Result<Self, StorageRefError> {
        let url = Url::parse(reference)
            .map_err(|_| StorageRefError::Unrecognized(reference.to_string()))?;

        match url.scheme() {
            "gs" => {
                let bucket = url
                    .host_str()
                    .filter(|b| !b.is_empty())
                    .ok_or_else(|| StorageRefError::Unrecognized(reference.to_string()))?;
                let path = decode(url.path().trim_start_matches('/'))?;
                if path.is_empty() {
                    return Err(StorageRefError::MissingPath(reference.to_string()));
                }
                Ok(Self::new(bucket, path))
            }
            "https" | "http" if url.host_str() == Some(DOWNLOAD_HOST) => {
                let segments: Vec<&str> = url
                    .path_segments()
                    .map(|s| s.collect())
                    .unwrap_or_default();
                match segments.as_slice() {
                    ["v0", "b", bucket, "o", encoded] if !encoded.is_empty() => {
                        Ok(Self::new(decode(bucket)?, decode(encoded)?))
                    }
                    ["v0", "b", _, "o", ..] => {
                        Err(StorageRefError::MissingPath(reference.to_string()))
                    }
                    _ => Err(StorageRefError::Unrecognized(reference.to_string())),
                }
            }
            _ => Err(StorageRefError::Unrecognized(reference.to_string())),
        }
    }

    /// Public download URL (without access token).
    pub fn download_url(&self) -> String {
        format!("{}?alt=media", self.object_url())
    }

    pub fn gs_url(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.path)
    }

    /// REST endpoint of the object itself.
    pub fn object_url(&self) -> String {
        format!(
            "{API_BASE}/b/{}/o/{}",
            self.bucket,
            urlencoding::encode(&self.path)
        )
    }
}

fn decode(segment: &str) -> std::result::Result<String, StorageRefError> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|_| StorageRefError::BadEncoding)
}

/// Best-effort object path for a reference [`StorageRef::parse`] rejected.
///
/// Takes whatever sits between `/o/` and the query string and decodes it.
pub fn fallback_path(reference: &str) -> Option<String> {
    let (_, rest) = reference.split_once("/o/")?;
    let encoded = rest.split(['?', '#']).next()?;
    if encoded.is_empty() {
        return None;
    }
    decode(encoded).ok()
}

/// Remote blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Delete the object at `path` in `bucket`, or in the default bucket
    /// when the reference did not name one.
    async fn delete(&self, bucket: Option<&str>, path: &str) -> Result<()>;
}

/// Firebase Storage over its REST API.
#[derive(Clone)]
pub struct FirebaseStorage {
    http: reqwest::Client,
    bucket: String,
    token: Option<String>,
}

impl FirebaseStorage {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            bucket: bucket.into(),
            token: None,
        }
    }

    /// Send `Authorization: Bearer` with every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn target(&self, bucket: Option<&str>, path: &str) -> StorageRef {
        StorageRef::new(bucket.unwrap_or(self.bucket.as_str()), path)
    }
}

#[async_trait]
impl BlobStore for FirebaseStorage {
    async fn delete(&self, bucket: Option<&str>, path: &str) -> Result<()> {
        let object = self.target(bucket, path);
        let mut request = self.http.delete(object.object_url());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(bucket = %object.bucket, path, "Deleted blob");
            return Ok(());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("blob {path}")));
        }
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Storage(format!("delete {path}: {status} {body}")))
    }
}

/// In-process blob store for tests and offline development.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<DashMap<String, Vec<u8>>>,
    /// Only this bucket holds objects; `None` accepts any bucket.
    bucket: Option<String>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: Some(bucket.into()),
            ..Self::default()
        }
    }

    pub fn insert(&self, path: impl Into<String>, data: Vec<u8>) {
        self.objects.insert(path.into(), data);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn delete(&self, bucket: Option<&str>, path: &str) -> Result<()> {
        if let (Some(own), Some(requested)) = (self.bucket.as_deref(), bucket) {
            if own != requested {
                return Err(AppError::NotFound(format!("blob {requested}/{path}")));
            }
        }
        self.objects
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("blob {path}")))
    }
}
