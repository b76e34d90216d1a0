// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Client Pool — caches per-endpoint model providers for multi-endpoint
//! routing (spec §4.5).
//!
//! A session's primary client always lives at the configured endpoint. When
//! the turn engine needs to escalate to a different endpoint (e.g. a bigger
//! model reachable through a separate gateway URL), the pool lazily builds
//! and caches a client for that endpoint so repeated escalations reuse the
//! same HTTP client instead of reconnecting every time.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use sven_config::ModelConfig;

use crate::provider::ModelProvider;

/// Normalize an endpoint URL for use as a cache key: trims whitespace and a
/// single trailing slash so that `https://x/v1` and `https://x/v1/` collide.
pub fn normalize_endpoint(endpoint: &str) -> String {
    endpoint.trim().trim_end_matches('/').to_string()
}

/// Caches one [`ModelProvider`] per distinct (normalized) endpoint.
pub struct ClientPool {
    primary_config: ModelConfig,
    primary: Arc<dyn ModelProvider>,
    primary_endpoint: String,
    cached: Mutex<HashMap<String, Arc<dyn ModelProvider>>>,
    probed: Mutex<std::collections::HashSet<String>>,
}

impl ClientPool {
    /// Build a pool seeded with the session's primary client.
    pub fn new(primary_config: ModelConfig, primary: Arc<dyn ModelProvider>) -> Self {
        let primary_endpoint = normalize_endpoint(primary_config.base_url.as_deref().unwrap_or(""));
        Self {
            primary_config,
            primary,
            primary_endpoint,
            cached: Mutex::new(HashMap::new()),
            probed: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Returns the primary client.
    pub fn primary(&self) -> Arc<dyn ModelProvider> {
        self.primary.clone()
    }

    /// Return the client for `endpoint`, constructing and caching it if
    /// necessary. An empty endpoint, or one equal to the primary, returns the
    /// primary client without constructing anything new.
    pub async fn get_for_endpoint(&self, endpoint: &str) -> anyhow::Result<Arc<dyn ModelProvider>> {
        let norm = normalize_endpoint(endpoint);
        if norm.is_empty() || norm == self.primary_endpoint {
            return Ok(self.primary.clone());
        }

        {
            let cache = self.cached.lock().await;
            if let Some(client) = cache.get(&norm) {
                return Ok(client.clone());
            }
        }

        let mut cfg = self.primary_config.clone();
        cfg.base_url = Some(norm.clone());
        let client: Arc<dyn ModelProvider> = Arc::from(crate::from_config(&cfg)?);

        self.cached.lock().await.insert(norm.clone(), client.clone());
        self.probe_if_needed(&norm).await;
        Ok(client)
    }

    /// Best-effort health check for `endpoint`; runs at most once per
    /// endpoint for the pool's lifetime. Failures are swallowed — this is
    /// advisory only, never a precondition for `get_for_endpoint`.
    pub async fn probe_if_needed(&self, endpoint: &str) {
        let norm = normalize_endpoint(endpoint);
        if norm.is_empty() {
            return;
        }
        {
            let mut probed = self.probed.lock().await;
            if probed.contains(&norm) {
                return;
            }
            probed.insert(norm.clone());
        }
        if let Ok(client) = self.get_for_endpoint(&norm).await {
            let _ = client.list_models().await;
        }
    }

    /// Drop every cached non-primary client. Best-effort; clients have no
    /// explicit close handle (connection pooling is owned by `reqwest`), so
    /// this simply releases the `Arc`s.
    pub async fn close_all(&self) {
        self.cached.lock().await.clear();
        self.probed.lock().await.clear();
    }

    /// Number of distinct non-primary endpoints currently cached.
    pub async fn cached_endpoint_count(&self) -> usize {
        self.cached.lock().await.len()
    }
}
