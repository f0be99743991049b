// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Client identity resolution.
//!
//! The gate sits behind exactly one trusted proxy. That proxy appends the
//! address it saw to `X-Forwarded-For`, so the rightmost entry is the only
//! one a client cannot forge. Anything to its left is client-supplied and
//! ignored.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::fmt;

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Key every unidentifiable request is counted under.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Stable per-client key used by every rate-limiting structure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The shared bucket for requests without a usable forwarding header.
    pub fn unknown() -> Self {
        Self(UNKNOWN_IDENTITY.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN_IDENTITY
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientIdentity {
    fn from(value: &str) -> Self {
        Self::new(value.trim())
    }
}

/// Resolve the client identity from request headers.
pub fn resolve(headers: &HeaderMap) -> ClientIdentity {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').map(str::trim).find(|s| !s.is_empty()));

    let real_ip = || {
        headers
            .get(X_REAL_IP)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .map(ClientIdentity::from)
        .unwrap_or_else(ClientIdentity::unknown)
}
