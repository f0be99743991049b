// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Error types for the gatekeeper.
//!
//! Only configuration errors are fatal. Store errors are handed to the
//! gate's [`FailurePolicy`](crate::gate::FailurePolicy) and never reach a
//! client.

use thiserror::Error;

/// Failure talking to the shared block store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Block store request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Block store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Block store payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Block store unavailable: {0}")]
    Unavailable(String),
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            var,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}
