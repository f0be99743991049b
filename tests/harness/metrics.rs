// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Outcome collection for attack simulations.

use axum::http::StatusCode;
use std::collections::HashMap;

/// Possible outcomes for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Allowed,
    RateLimited,
    Blocked,
    Other,
}

impl From<StatusCode> for Outcome {
    fn from(status: StatusCode) -> Self {
        match status {
            StatusCode::OK => Self::Allowed,
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimited,
            StatusCode::FORBIDDEN => Self::Blocked,
            _ => Self::Other,
        }
    }
}

/// Counts outcomes overall and per client.
#[derive(Debug, Default)]
pub struct AttackMetrics {
    outcomes: HashMap<Outcome, usize>,
    per_client: HashMap<String, HashMap<Outcome, usize>>,
}

impl AttackMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, client: &str, status: StatusCode) {
        let outcome = Outcome::from(status);
        *self.outcomes.entry(outcome).or_insert(0) += 1;
        *self
            .per_client
            .entry(client.to_string())
            .or_default()
            .entry(outcome)
            .or_insert(0) += 1;
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.outcomes.get(&outcome).copied().unwrap_or(0)
    }

    pub fn client_count(&self, client: &str, outcome: Outcome) -> usize {
        self.per_client
            .get(client)
            .and_then(|m| m.get(&outcome))
            .copied()
            .unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.outcomes.values().sum()
    }
}
