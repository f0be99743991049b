// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Block stores whose failures tests can switch on and off.

use async_trait::async_trait;
use quote_gatekeeper::{error::StoreError, store::BlockStore, MemoryStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Memory-backed store that can go down, panic, and count calls.
#[derive(Default)]
pub struct ScriptedStore {
    pub inner: MemoryStore,
    down: AtomicBool,
    panicking: AtomicBool,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panicking.store(panicking, Ordering::SeqCst);
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.panicking.load(Ordering::SeqCst) {
            panic!("store client bug");
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl BlockStore for ScriptedStore {
    async fn get(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, identities: &[String]) -> Result<(), StoreError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, identities).await
    }
}
