// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Admission gate.
//!
//! Every request walks `CHECK_BLOCK -> CHECK_RATE -> PASS | RATE_LIMITED |
//! BLOCKED`:
//!
//! 1. Refresh the block cache if the refresh interval has passed, then deny
//!    blocked identities without touching their window.
//! 2. Count the request in the identity's window. Within the limit it passes.
//! 3. Over the limit it is a violation. Reaching the violation threshold
//!    promotes the identity to the block registry; otherwise the client is
//!    told when its window closes.
//!
//! Infrastructure failures never decide the outcome. They all go through the
//! [`FailurePolicy`], which logs them and lets the request continue.

use crate::blocklist::{BlockRegistry, BlocklistSnapshot};
use crate::config::AdmissionConfig;
use crate::error::StoreError;
use crate::identity::ClientIdentity;
use crate::metrics::Metrics;
use crate::store::BlockStore;
use crate::violations::ViolationTracker;
use crate::window::{WindowCounter, WindowSnapshot};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Rate-limit quota reported to admitted and throttled clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub limit: u64,
    pub remaining: u64,
    /// Whole seconds until the window closes
    pub reset_after_secs: u64,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Within the window limit
    Pass { quota: Quota },
    /// Over the limit, not yet blocked
    RateLimited {
        quota: Quota,
        retry_after_secs: u64,
        violation_count: u32,
        threshold: u32,
    },
    /// Permanently denied
    Blocked,
    /// Subsystem disabled by configuration
    Bypassed,
    /// The gate itself failed; the request proceeds
    FailedOpen,
}

impl Admission {
    /// Whether the request should reach the downstream service.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Pass { .. } | Self::Bypassed | Self::FailedOpen)
    }

    pub fn decision(&self) -> &'static str {
        match self {
            Self::Pass { .. } => "pass",
            Self::RateLimited { .. } => "rate_limited",
            Self::Blocked => "blocked",
            Self::Bypassed => "bypassed",
            Self::FailedOpen => "failed_open",
        }
    }

    pub fn quota(&self) -> Option<&Quota> {
        match self {
            Self::Pass { quota } | Self::RateLimited { quota, .. } => Some(quota),
            _ => None,
        }
    }
}

/// Where an infrastructure failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Initialize,
    Refresh,
    Promote,
    Unblock,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::Refresh => "refresh",
            Self::Promote => "promote",
            Self::Unblock => "unblock",
        }
    }
}

/// The single decision point for failures of the gate's own machinery.
///
/// Store failures are logged and counted; the local cache keeps whatever it
/// held. A failure of the evaluation itself admits the request.
#[derive(Clone)]
pub struct FailurePolicy {
    metrics: Metrics,
}

impl FailurePolicy {
    pub fn new(metrics: Metrics) -> Self {
        Self { metrics }
    }

    pub fn store_unavailable(&self, stage: FailureStage, err: &StoreError) {
        warn!(stage = stage.as_str(), error = %err, "Block store failure, continuing with local state");
        self.metrics.record_store_failure(stage.as_str());
    }

    pub fn internal_failure(&self, identity: &ClientIdentity, cause: &str) -> Admission {
        error!(%identity, cause, "Admission check failed, admitting request");
        Admission::FailedOpen
    }
}

#[derive(Debug)]
struct RateState {
    windows: WindowCounter,
    violations: ViolationTracker,
}

/// Per-process admission state, shared by every request handler.
pub struct AdmissionGate {
    config: AdmissionConfig,
    registry: BlockRegistry,
    state: Mutex<RateState>,
    policy: FailurePolicy,
    metrics: Metrics,
}

impl AdmissionGate {
    pub fn new(
        config: AdmissionConfig,
        store: Arc<dyn BlockStore>,
        blocklist_key: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        let registry = BlockRegistry::new(store, blocklist_key, config.refresh_interval());
        let state = RateState {
            windows: WindowCounter::new(config.window_duration()),
            violations: ViolationTracker::new(),
        };

        Self {
            config,
            registry,
            state: Mutex::new(state),
            policy: FailurePolicy::new(metrics.clone()),
            metrics,
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Load the block list once at startup.
    ///
    /// A store outage here is not fatal: the instance starts with an empty
    /// cache and retries after the refresh interval.
    pub async fn initialize(&self) {
        if !self.config.enabled {
            return;
        }
        match self.registry.refresh_if_due(Instant::now()).await {
            Some(Ok(blocked)) => {
                info!(blocked, "Block list loaded");
                self.metrics.set_blocked_identities(blocked);
            }
            Some(Err(err)) => self.policy.store_unavailable(FailureStage::Initialize, &err),
            None => {}
        }
    }

    /// Decide whether a request from `identity` may proceed.
    pub async fn admit(&self, identity: &ClientIdentity) -> Admission {
        if !self.config.enabled {
            self.metrics.record_decision(Admission::Bypassed.decision());
            return Admission::Bypassed;
        }

        let admission = match AssertUnwindSafe(self.evaluate(identity)).catch_unwind().await {
            Ok(admission) => admission,
            Err(panic) => self.policy.internal_failure(identity, &panic_message(panic.as_ref())),
        };
        self.metrics.record_decision(admission.decision());
        admission
    }

    async fn evaluate(&self, identity: &ClientIdentity) -> Admission {
        let now = Instant::now();

        match self.registry.refresh_if_due(now).await {
            Some(Ok(blocked)) => self.metrics.set_blocked_identities(blocked),
            Some(Err(err)) => self.policy.store_unavailable(FailureStage::Refresh, &err),
            None => {}
        }

        if self.registry.is_blocked(identity).await {
            debug!(%identity, "Blocked identity denied");
            return Admission::Blocked;
        }

        let limit = self.config.rate_limit;
        let threshold = self.config.violation_threshold;

        let (window, violation_count) = {
            let mut state = self.state.lock().await;
            let expired = state.windows.purge_expired(now);
            state.violations.forget(&expired);

            let window = state.windows.check_and_increment(identity, now);
            self.metrics.set_tracked_windows(state.windows.len());

            if window.count <= limit {
                debug!(%identity, count = window.count, "Request admitted");
                return Admission::Pass {
                    quota: self.quota(&window, now),
                };
            }
            (window, state.violations.record_overflow(identity))
        };

        if violation_count >= threshold {
            if let Err(err) = self.registry.promote(identity).await {
                self.policy.store_unavailable(FailureStage::Promote, &err);
            }
            self.metrics
                .set_blocked_identities(self.registry.snapshot().await.blocked);
            return Admission::Blocked;
        }

        let retry_after_secs = ceil_secs(window.remaining(now)).max(1);
        info!(
            %identity,
            count = window.count,
            violations = violation_count,
            threshold,
            retry_after_secs,
            "Request rate limited"
        );
        Admission::RateLimited {
            quota: self.quota(&window, now),
            retry_after_secs,
            violation_count,
            threshold,
        }
    }

    fn quota(&self, window: &WindowSnapshot, now: Instant) -> Quota {
        Quota {
            limit: self.config.rate_limit,
            remaining: self.config.rate_limit.saturating_sub(window.count),
            reset_after_secs: ceil_secs(window.remaining(now)),
        }
    }

    /// Lift a block everywhere; store failures are reported, not returned.
    pub async fn unblock(&self, identity: &ClientIdentity) -> bool {
        match self.registry.unblock(identity).await {
            Ok(removed) => removed,
            Err(err) => {
                self.policy.store_unavailable(FailureStage::Unblock, &err);
                !self.registry.is_blocked(identity).await
            }
        }
    }

    pub async fn is_blocked(&self, identity: &ClientIdentity) -> bool {
        self.registry.is_blocked(identity).await
    }

    /// Requests counted in the identity's open window, if any.
    pub async fn window_count(&self, identity: &ClientIdentity) -> Option<u64> {
        let state = self.state.lock().await;
        state.windows.peek(identity, Instant::now()).map(|w| w.count)
    }

    pub async fn violations(&self, identity: &ClientIdentity) -> u32 {
        self.state.lock().await.violations.current(identity)
    }

    pub async fn blocklist(&self) -> BlocklistSnapshot {
        self.registry.snapshot().await
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.as_millis() as u64;
    millis.div_ceil(1000)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
