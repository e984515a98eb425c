// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP surface: health check plus the caching proxy in front of the app origin.

pub mod gate;

pub use gate::{Navigation, NavigationGate};

use crate::error::AppError;
use crate::worker::{FetchRequest, FetchResponse, ResponseSource};
use crate::AppState;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// Response header naming where a proxied response came from.
pub const SOURCE_HEADER: &str = "x-served-from";

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub build_id: String,
    pub cache_version: String,
}

/// Health check response
async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let build_id = option_env!("BUILD_ID").unwrap_or("unknown").to_string();
    Json(HealthResponse {
        status: "ok".to_string(),
        build_id,
        cache_version: state.worker.version().to_string(),
    })
}

fn into_http(fetched: FetchResponse) -> Response {
    let mut headers = fetched.headers;
    // The body is buffered; let hyper frame it.
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::CONNECTION);

    let source = match fetched.source {
        ResponseSource::Network => "network",
        ResponseSource::Cache => "cache",
        ResponseSource::Synthesized => "offline",
    };
    headers.insert(SOURCE_HEADER, HeaderValue::from_static(source));

    let mut response = Response::new(Body::from(fetched.body));
    *response.status_mut() = fetched.status;
    *response.headers_mut() = headers;
    response
}

/// Every other request: gate app navigations, then go through the worker.
async fn proxy(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let url = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());

    if method == Method::GET {
        if let Navigation::Redirect(to) = state.gate.check(uri.path()).await {
            return Ok(Redirect::temporary(to).into_response());
        }
    }

    let request = FetchRequest {
        method,
        url,
        headers,
        body,
    };
    let fetched = state.worker.handle_fetch(&request).await?;
    if request.is_cacheable_method() {
        state
            .connectivity
            .set_online(fetched.source == ResponseSource::Network);
    }
    Ok(into_http(fetched))
}

/// Build the complete router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(proxy)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
