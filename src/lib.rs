// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Quote Gatekeeper
//!
//! Admission control for the public quote API:
//!
//! - Fixed-window request cap per client identity
//! - Violation counting for identities that overflow their window
//! - Permanent blocking once the violation threshold is reached
//! - Block list shared between instances through a key-value store,
//!   cached locally and refreshed on an interval
//! - Fail-open on any failure of the gate itself

pub mod blocklist;
pub mod config;
pub mod error;
pub mod gate;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod store;
pub mod violations;
pub mod window;

pub use config::Config;
pub use gate::{Admission, AdmissionGate};
pub use identity::ClientIdentity;
pub use store::{BlockStore, MemoryStore, RestKvStore};
