// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! HTTP surface of the gatekeeper.
//!
//! The gate runs as axum middleware in front of the downstream router.
//! Operational routes (`/health`, `/metrics`, `/check`) are never gated and
//! the binary serves them on their own listener.

use crate::config::Config;
use crate::gate::{Admission, AdmissionGate, Quota};
use crate::identity::{self, ClientIdentity};
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");

/// Shared application state.
pub struct AppState {
    pub gate: AdmissionGate,
    pub config: Config,
}

/// Body of a 403 response.
#[derive(Debug, Serialize, Deserialize)]
pub struct BlockedResponse {
    pub error: String,
}

/// Body of a 429 response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedResponse {
    pub error: String,
    pub retry_after: u64,
    pub violation_count: u32,
    pub threshold: u32,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub admission_enabled: bool,
    pub blocked_identities: usize,
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Admission check request (for external authorization).
#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub ip: String,
}

/// Admission check response.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub allowed: bool,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
}

/// Build the service router: operational routes plus the gated downstream.
///
/// Suitable when the gate is embedded in front of an API in the same
/// process. In authorizer mode the proxy forwards arbitrary client paths, so
/// serve [`gated`] and [`operations`] on separate listeners instead.
pub fn app(state: Arc<AppState>, downstream: Router) -> Router {
    operations(state.clone()).merge(gated(state, downstream))
}

/// The downstream router with every route behind the gate.
pub fn gated(state: Arc<AppState>, downstream: Router) -> Router {
    downstream.layer(middleware::from_fn_with_state(state, admission_control))
}

/// Ungated operational routes: health, metrics and the admission check.
pub fn operations(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/check", post(check))
        .with_state(state)
}

/// Downstream used when the service runs as an external authorizer: every
/// admitted request gets an empty 200.
pub fn authorizer() -> Router {
    Router::new().fallback(admitted)
}

async fn admitted() -> StatusCode {
    StatusCode::OK
}

/// Gate middleware: deny with 403/429 or forward unchanged.
pub async fn admission_control(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let identity = identity::resolve(request.headers());
    let admission = state.gate.admit(&identity).await;
    let emit_headers = state.config.admission.emit_headers;

    match admission {
        Admission::Pass { quota } => {
            let mut response = next.run(request).await;
            if emit_headers {
                insert_quota_headers(&mut response, &quota);
            }
            response
        }
        Admission::Bypassed | Admission::FailedOpen => next.run(request).await,
        Admission::RateLimited {
            quota,
            retry_after_secs,
            violation_count,
            threshold,
        } => {
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                [(header::RETRY_AFTER, HeaderValue::from(retry_after_secs))],
                Json(RateLimitedResponse {
                    error: "Too many requests, please try again later.".to_string(),
                    retry_after: retry_after_secs,
                    violation_count,
                    threshold,
                }),
            )
                .into_response();
            if emit_headers {
                insert_quota_headers(&mut response, &quota);
            }
            response
        }
        Admission::Blocked => blocked_response(),
    }
}

fn blocked_response() -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(BlockedResponse {
            error: "Access denied due to repeated rate limit violations.".to_string(),
        }),
    )
        .into_response()
}

fn insert_quota_headers(response: &mut Response, quota: &Quota) {
    let headers = response.headers_mut();
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(quota.reset_after_secs));
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let blocklist = state.gate.blocklist().await;
    Json(HealthResponse {
        status: "healthy",
        service: "quote-gatekeeper",
        version: env!("CARGO_PKG_VERSION"),
        admission_enabled: state.config.admission.enabled,
        blocked_identities: blocklist.blocked,
        last_refresh: blocklist.last_refresh,
    })
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.gate.metrics().render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "Failed to render metrics");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// Check admission for an identity supplied by a reverse proxy.
///
/// Always answers 200 so the proxy can read the decision from the body.
pub async fn check(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CheckRequest>,
) -> Json<CheckResponse> {
    let identity = if req.ip.trim().is_empty() {
        ClientIdentity::unknown()
    } else {
        ClientIdentity::from(req.ip.as_str())
    };
    debug!(%identity, "Processing admission check");

    let admission = state.gate.admit(&identity).await;
    let mut response = CheckResponse {
        allowed: admission.is_admitted(),
        decision: admission.decision().to_string(),
        retry_after: None,
        violation_count: None,
        threshold: None,
        remaining: admission.quota().map(|q| q.remaining),
    };
    if let Admission::RateLimited {
        retry_after_secs,
        violation_count,
        threshold,
        ..
    } = admission
    {
        response.retry_after = Some(retry_after_secs);
        response.violation_count = Some(violation_count);
        response.threshold = Some(threshold);
    }

    Json(response)
}
