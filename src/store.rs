// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Shared key-value store holding the block list.
//!
//! The store is the only state shared between instances. Its contract is
//! deliberately tiny: read a list, write a list. There is no compare-and-swap,
//! so concurrent writers can lose each other's updates.

use crate::config::StoreConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// Key-value store holding identity lists.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Read the list stored under `key`; a missing key is an empty list.
    async fn get(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Replace the list stored under `key`.
    async fn set(&self, key: &str, identities: &[String]) -> Result<(), StoreError>;
}

/// In-process store for single-instance deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    lists: RwLock<HashMap<String, Vec<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.lists.read().await.get(key).cloned().unwrap_or_default())
    }

    async fn set(&self, key: &str, identities: &[String]) -> Result<(), StoreError> {
        self.lists
            .write()
            .await
            .insert(key.to_string(), identities.to_vec());
        Ok(())
    }
}

/// Response envelope of the Redis-over-HTTP REST dialect.
#[derive(Debug, Deserialize)]
struct KvResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for a Redis-compatible REST endpoint (`/get/{key}`, `/set/{key}`).
pub struct RestKvStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RestKvStore {
    /// Create a client; every request is bounded by `config.timeout()`.
    pub fn new(base_url: Url, config: &StoreConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            token: config.rest_token.clone(),
            client,
        })
    }

    fn endpoint(&self, command: &str, key: &str) -> String {
        format!("{}/{}/{}", self.base_url, command, urlencoding::encode(key))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Option<serde_json::Value>, StoreError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: KvResponse = response.json().await?;
        if let Some(error) = envelope.error {
            return Err(StoreError::Unavailable(error));
        }
        Ok(envelope.result)
    }
}

#[async_trait]
impl BlockStore for RestKvStore {
    async fn get(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let result = self.send(self.client.get(self.endpoint("get", key))).await?;

        let identities = match result {
            None | Some(serde_json::Value::Null) => Vec::new(),
            // Values are stored JSON-encoded, so a list usually arrives as a string.
            Some(serde_json::Value::String(raw)) => serde_json::from_str(&raw)?,
            Some(other) => serde_json::from_value(other)?,
        };
        debug!(key, count = identities.len(), "Fetched block list");
        Ok(identities)
    }

    async fn set(&self, key: &str, identities: &[String]) -> Result<(), StoreError> {
        let body = serde_json::to_string(identities)?;
        self.send(self.client.post(self.endpoint("set", key)).body(body))
            .await?;
        debug!(key, count = identities.len(), "Stored block list");
        Ok(())
    }
}
