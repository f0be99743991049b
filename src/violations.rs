// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Overflow counting per identity.
//!
//! Counters live exactly as long as the identity's window record: when the
//! window counter purges a window, the gate calls [`ViolationTracker::forget`]
//! for the same identities.

use crate::identity::ClientIdentity;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ViolationTracker {
    violations: HashMap<ClientIdentity, u32>,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one overflow and return the identity's updated count.
    pub fn record_overflow(&mut self, identity: &ClientIdentity) -> u32 {
        let count = self.violations.entry(identity.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn current(&self, identity: &ClientIdentity) -> u32 {
        self.violations.get(identity).copied().unwrap_or(0)
    }

    /// Clear the counters of identities whose window expired.
    pub fn forget<'a, I>(&mut self, identities: I)
    where
        I: IntoIterator<Item = &'a ClientIdentity>,
    {
        for identity in identities {
            self.violations.remove(identity);
        }
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }
}
