// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Prometheus metrics for admission decisions and store health.

use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Metric handles registered on a private registry.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    admissions: IntCounterVec,
    store_failures: IntCounterVec,
    blocked_identities: IntGauge,
    tracked_windows: IntGauge,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let admissions = IntCounterVec::new(
            Opts::new("gatekeeper_admissions_total", "Admission decisions by outcome"),
            &["decision"],
        )?;
        let store_failures = IntCounterVec::new(
            Opts::new("gatekeeper_store_failures_total", "Block store failures by stage"),
            &["stage"],
        )?;
        let blocked_identities = IntGauge::new(
            "gatekeeper_blocked_identities",
            "Identities in the local block cache",
        )?;
        let tracked_windows = IntGauge::new(
            "gatekeeper_tracked_windows",
            "Identities with an open rate-limit window",
        )?;

        registry.register(Box::new(admissions.clone()))?;
        registry.register(Box::new(store_failures.clone()))?;
        registry.register(Box::new(blocked_identities.clone()))?;
        registry.register(Box::new(tracked_windows.clone()))?;

        Ok(Self {
            registry,
            admissions,
            store_failures,
            blocked_identities,
            tracked_windows,
        })
    }

    pub fn record_decision(&self, decision: &str) {
        self.admissions.with_label_values(&[decision]).inc();
    }

    pub fn record_store_failure(&self, stage: &str) {
        self.store_failures.with_label_values(&[stage]).inc();
    }

    pub fn set_blocked_identities(&self, count: usize) {
        self.blocked_identities.set(count as i64);
    }

    pub fn set_tracked_windows(&self, count: usize) {
        self.tracked_windows.set(count as i64);
    }

    pub fn decisions(&self, decision: &str) -> u64 {
        self.admissions.with_label_values(&[decision]).get()
    }

    pub fn store_failures(&self, stage: &str) -> u64 {
        self.store_failures.with_label_values(&[stage]).get()
    }

    /// Render every metric in the Prometheus text exposition format.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
