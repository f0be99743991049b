// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test harness for gatekeeper attack simulation.
//!
//! Builds gated routers over controllable block stores and drives requests
//! through them the way a reverse proxy would.

#![allow(dead_code)]

pub mod generators;
pub mod metrics;
pub mod stores;

use axum::{
    body::{to_bytes, Body},
    http::{HeaderMap, Request, StatusCode},
    routing::get,
    Json, Router,
};
use quote_gatekeeper::{
    config::{AdmissionConfig, Config},
    gate::AdmissionGate,
    handlers::{self, AppState},
    metrics::Metrics,
    store::BlockStore,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Downstream stand-in for the quote API.
pub fn quotes_api() -> Router {
    Router::new().route(
        "/api/quotes",
        get(|| async { Json(json!({ "quotes": [{ "text": "Stay hungry." }] })) }),
    )
}

/// Admission config with the given window (ms), limit and threshold.
pub fn admission(window_ms: u64, rate_limit: u64, violation_threshold: u32) -> AdmissionConfig {
    AdmissionConfig {
        window_ms,
        rate_limit,
        violation_threshold,
        ..Default::default()
    }
}

/// One gatekeeper instance over `store`.
pub fn instance(admission: AdmissionConfig, store: Arc<dyn BlockStore>) -> (Router, Arc<AppState>) {
    let config = Config {
        admission,
        ..Default::default()
    };
    let gate = AdmissionGate::new(
        config.admission.clone(),
        store,
        config.store.blocklist_key.clone(),
        Metrics::new().unwrap(),
    );
    let state = Arc::new(AppState { gate, config });
    (handlers::app(state.clone(), quotes_api()), state)
}

/// GET /api/quotes as forwarded by the trusted proxy for `client`.
pub fn quote_request(client: &str) -> Request<Body> {
    Request::builder()
        .uri("/api/quotes")
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

/// Response parts that tests inspect.
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub async fn send(app: &Router, request: Request<Body>) -> Reply {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn get_quotes(app: &Router, client: &str) -> Reply {
    send(app, quote_request(client)).await
}
