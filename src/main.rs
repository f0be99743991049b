// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Quote Gatekeeper Service
//!
//! Runs the admission gate as an external authorizer: a reverse proxy
//! forwards each client request's headers here and relays anything other
//! than `200` back to the client.
//!
//! ## Configuration
//!
//! Configuration is loaded from environment variables (and `.env` if
//! present):
//!
//! - `BIND_ADDR`: Authorizer bind address, reachable by the proxy (default: 0.0.0.0:8080)
//! - `OPS_BIND_ADDR`: Health, metrics and `/check` bind address; keep it off
//!   the client path (default: 0.0.0.0:9090)
//! - `RATE_LIMITING_ENABLED`: Set to `false` to bypass the gate (default: true)
//! - `WINDOW_DURATION`: Rate-limit window (default: 15m)
//! - `RATE_LIMIT`: Requests per window per client (default: 100)
//! - `VIOLATION_THRESHOLD`: Overflows before a permanent block (default: 3)
//! - `REFRESH_INTERVAL`: Shared block list refresh period (default: 5m)
//! - `KV_REST_API_URL` / `KV_REST_API_TOKEN`: Shared block store; blocks stay
//!   in memory when unset
//!
//! Invalid values stop the service at startup.

use axum::Router;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use quote_gatekeeper::{
    config::Config,
    gate::AdmissionGate,
    handlers::{self, AppState},
    metrics::Metrics,
    store::{BlockStore, MemoryStore, RestKvStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    info!(
        bind_addr = %config.bind_addr,
        ops_bind_addr = %config.ops_bind_addr,
        enabled = config.admission.enabled,
        window_ms = config.admission.window_ms,
        rate_limit = config.admission.rate_limit,
        violation_threshold = config.admission.violation_threshold,
        refresh_interval_ms = config.admission.refresh_interval_ms,
        "Starting quote gatekeeper"
    );

    let store: Arc<dyn BlockStore> = match &config.store.rest_url {
        Some(url) => {
            info!(url = %url, key = %config.store.blocklist_key, "Using shared block store");
            Arc::new(RestKvStore::new(Url::parse(url)?, &config.store)?)
        }
        None => {
            warn!("KV_REST_API_URL not set, blocks will not be shared between instances");
            Arc::new(MemoryStore::new())
        }
    };

    let metrics = Metrics::new()?;
    let gate = AdmissionGate::new(
        config.admission.clone(),
        store,
        config.store.blocklist_key.clone(),
        metrics,
    );
    gate.initialize().await;

    let state = Arc::new(AppState {
        gate,
        config: config.clone(),
    });

    let app: Router = handlers::gated(state.clone(), handlers::authorizer())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));
    let ops: Router = handlers::operations(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr: SocketAddr = config.bind_addr.parse()?;
    let ops_addr: SocketAddr = config.ops_bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    let ops_listener = TcpListener::bind(ops_addr).await?;
    info!(addr = %addr, ops_addr = %ops_addr, "Server listening");

    tokio::try_join!(
        axum::serve(listener, app).into_future(),
        axum::serve(ops_listener, ops).into_future(),
    )?;

    Ok(())
}
