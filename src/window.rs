// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Fixed-window request counter.
//!
//! Each identity owns at most one window. A window starts with the first
//! request after the previous one expired and covers `[start, start + d)`.
//! Expired windows are swept lazily by [`WindowCounter::purge_expired`]
//! rather than by a background timer.

use crate::identity::ClientIdentity;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Per-identity count for the current window.
#[derive(Debug, Clone, Copy)]
struct WindowRecord {
    count: u64,
    expires_at: Instant,
}

impl WindowRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// State of an identity's window right after counting a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Requests counted in this window, including the current one
    pub count: u64,
    /// When the window closes
    pub expires_at: Instant,
}

impl WindowSnapshot {
    /// Time left in the window, zero once it has closed.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Counts requests per identity within a window.
#[derive(Debug)]
pub struct WindowCounter {
    window: Duration,
    records: HashMap<ClientIdentity, WindowRecord>,
}

impl WindowCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            records: HashMap::new(),
        }
    }

    /// Count one request, opening a fresh window when needed.
    pub fn check_and_increment(&mut self, identity: &ClientIdentity, now: Instant) -> WindowSnapshot {
        let window = self.window;
        let record = self
            .records
            .entry(identity.clone())
            .or_insert(WindowRecord {
                count: 0,
                expires_at: now + window,
            });

        if record.is_expired(now) {
            *record = WindowRecord {
                count: 0,
                expires_at: now + window,
            };
        }
        record.count = record.count.saturating_add(1);

        WindowSnapshot {
            count: record.count,
            expires_at: record.expires_at,
        }
    }

    /// Drop every expired window and return whose they were.
    pub fn purge_expired(&mut self, now: Instant) -> Vec<ClientIdentity> {
        let mut purged = Vec::new();
        self.records.retain(|identity, record| {
            if record.is_expired(now) {
                purged.push(identity.clone());
                false
            } else {
                true
            }
        });
        purged
    }

    /// Current window for an identity, if one is open.
    pub fn peek(&self, identity: &ClientIdentity, now: Instant) -> Option<WindowSnapshot> {
        self.records
            .get(identity)
            .filter(|r| !r.is_expired(now))
            .map(|r| WindowSnapshot {
                count: r.count,
                expires_at: r.expires_at,
            })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
