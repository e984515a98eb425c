// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Request/response types seen by the network cache, and the network seam.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Body served when the network is down and nothing is cached.
pub const OFFLINE_BODY: &str = "Offline - this page is not available";

/// Outbound request intercepted by the worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    /// Path and query relative to the app origin (e.g. `/index.html`).
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Only read-only requests are ever cached.
    pub fn is_cacheable_method(&self) -> bool {
        self.method == Method::GET
    }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Synthesized,
}

/// Response handed back to the caller.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub source: ResponseSource,
}

impl FetchResponse {
    /// Synthesized "service unavailable" used when offline with no cache entry.
    pub fn offline() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            headers,
            body: Bytes::from_static(OFFLINE_BODY.as_bytes()),
            source: ResponseSource::Synthesized,
        }
    }
}

/// Serialized cache entry (body base64-encoded).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub url: String,
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub stored_at: String,
}

impl CachedResponse {
    pub fn from_response(url: &str, response: &FetchResponse) -> Self {
        Self {
            url: url.to_string(),
            status: response.status.as_u16(),
            headers: response
                .headers
                .iter()
                .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
                .collect(),
            body: BASE64.encode(&response.body),
            stored_at: crate::time_utils::format_utc_rfc3339(chrono::Utc::now()),
        }
    }

    pub fn into_response(self) -> Result<FetchResponse> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cached status invalid: {e}")))?;
        let body = BASE64
            .decode(&self.body)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("cached body decode failed: {e}")))?;

        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.append(name, value);
            }
        }

        Ok(FetchResponse {
            status,
            headers,
            body: Bytes::from(body),
            source: ResponseSource::Cache,
        })
    }
}

/// The network, as far as the worker is concerned.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform the request. `Err` means the network itself failed (no
    /// response); HTTP error statuses are `Ok`.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse>;
}

/// Fetches from the app origin over HTTP.
#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    origin: String,
}

impl HttpFetcher {
    pub fn new(origin: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("failed building HTTP client: {e}")))?;
        Ok(Self {
            http,
            origin: origin.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let url = format!("{}{}", self.origin, request.url);

        let mut headers = request.headers.clone();
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let response = self
            .http
            .request(request.method.clone(), &url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| AppError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| AppError::Network(format!("{url}: body read failed: {e}")))?;

        Ok(FetchResponse {
            status,
            headers,
            body,
            source: ResponseSource::Network,
        })
    }
}
