// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the gatekeeper.
//!
//! Values come from the environment (optionally seeded from a `.env` file by
//! the binary). Anything that does not parse is a [`ConfigError`] at startup,
//! never a surprise at request time.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Top-level configuration for the gatekeeper service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server bind address (default: 0.0.0.0:8080)
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Operational listener for health, metrics and checks (default: 0.0.0.0:9090)
    #[serde(default = "default_ops_bind_addr")]
    pub ops_bind_addr: String,

    /// Admission control configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Shared block store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Rate limiting and blocking thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Whether the subsystem is active at all (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Window length in milliseconds (default: 15 minutes)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Requests allowed per identity per window (default: 100)
    #[serde(default = "default_rate_limit")]
    pub rate_limit: u64,

    /// Overflows before an identity is blocked (default: 3)
    #[serde(default = "default_violation_threshold")]
    pub violation_threshold: u32,

    /// Block list refresh period in milliseconds (default: 5 minutes)
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Emit `RateLimit-*` headers (default: true)
    #[serde(default = "default_true")]
    pub emit_headers: bool,
}

/// Where the shared block list lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// REST endpoint of the key-value store; `None` keeps blocks in memory
    #[serde(default)]
    pub rest_url: Option<String>,

    /// Bearer token for the REST endpoint
    #[serde(default)]
    pub rest_token: Option<String>,

    /// Key holding the block list (default: blocked_ips)
    #[serde(default = "default_blocklist_key")]
    pub blocklist_key: String,

    /// Per-request timeout in milliseconds (default: 2000)
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_ops_bind_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_true() -> bool {
    true
}

fn default_window_ms() -> u64 {
    15 * 60 * 1000
}

fn default_rate_limit() -> u64 {
    100
}

fn default_violation_threshold() -> u32 {
    3
}

fn default_refresh_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_blocklist_key() -> String {
    "blocked_ips".to_string()
}

fn default_store_timeout_ms() -> u64 {
    2000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            ops_bind_addr: default_ops_bind_addr(),
            admission: AdmissionConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            window_ms: default_window_ms(),
            rate_limit: default_rate_limit(),
            violation_threshold: default_violation_threshold(),
            refresh_interval_ms: default_refresh_interval_ms(),
            emit_headers: default_true(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            rest_url: None,
            rest_token: None,
            blocklist_key: default_blocklist_key(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

impl AdmissionConfig {
    /// Get the window duration
    pub fn window_duration(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Get the block list refresh interval
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

impl StoreConfig {
    /// Get the store request timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    ///
    /// Unset variables keep their defaults; set but invalid ones fail.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();
        let admission = &mut config.admission;

        if let Some(v) = lookup("BIND_ADDR") {
            config.bind_addr = v;
        }
        if let Some(v) = lookup("OPS_BIND_ADDR") {
            config.ops_bind_addr = v;
        }
        if let Some(v) = lookup("RATE_LIMITING_ENABLED") {
            admission.enabled = parse_bool("RATE_LIMITING_ENABLED", &v)?;
        }
        if let Some(v) = lookup("WINDOW_DURATION") {
            admission.window_ms = parse_duration_ms("WINDOW_DURATION", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT") {
            admission.rate_limit = parse_positive("RATE_LIMIT", &v)?;
        }
        if let Some(v) = lookup("VIOLATION_THRESHOLD") {
            let threshold = parse_positive("VIOLATION_THRESHOLD", &v)?;
            admission.violation_threshold = u32::try_from(threshold)
                .map_err(|_| ConfigError::invalid("VIOLATION_THRESHOLD", &v, "too large"))?;
        }
        if let Some(v) = lookup("REFRESH_INTERVAL") {
            admission.refresh_interval_ms = parse_duration_ms("REFRESH_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("RATE_LIMIT_HEADERS") {
            admission.emit_headers = parse_bool("RATE_LIMIT_HEADERS", &v)?;
        }

        if let Some(v) = lookup("KV_REST_API_URL").filter(|v| !v.trim().is_empty()) {
            Url::parse(&v).map_err(|e| ConfigError::invalid("KV_REST_API_URL", &v, e.to_string()))?;
            config.store.rest_url = Some(v);
        }
        config.store.rest_token = lookup("KV_REST_API_TOKEN").filter(|v| !v.is_empty());
        if let Some(v) = lookup("BLOCKLIST_KEY") {
            if v.trim().is_empty() {
                return Err(ConfigError::invalid("BLOCKLIST_KEY", &v, "must not be empty"));
            }
            config.store.blocklist_key = v;
        }
        if let Some(v) = lookup("STORE_TIMEOUT") {
            config.store.timeout_ms = parse_duration_ms("STORE_TIMEOUT", &v)?;
        }

        Ok(config)
    }
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::invalid(var, value, "expected a boolean")),
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    let n: u64 = value
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid(var, value, "expected a positive integer"))?;
    if n == 0 {
        return Err(ConfigError::invalid(var, value, "must be greater than zero"));
    }
    Ok(n)
}

/// Parse `1500`, `1500ms`, `30s`, `15m` or `1h` into milliseconds.
fn parse_duration_ms(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    let amount: u64 = digits
        .parse()
        .map_err(|_| ConfigError::invalid(var, value, "expected a duration such as 1500ms or 15m"))?;
    let scale = match unit.trim() {
        "" | "ms" => 1,
        "s" => 1000,
        "m" => 60 * 1000,
        "h" => 60 * 60 * 1000,
        other => {
            return Err(ConfigError::invalid(
                var,
                value,
                format!("unknown duration unit {other:?}"),
            ))
        }
    };

    let ms = amount
        .checked_mul(scale)
        .ok_or_else(|| ConfigError::invalid(var, value, "duration overflows"))?;
    if ms == 0 {
        return Err(ConfigError::invalid(var, value, "must be greater than zero"));
    }
    Ok(ms)
}
