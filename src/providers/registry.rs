// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Registry of configured providers.
//!
//! Each entry wraps an adapter with the provider's call timeout, a capability
//! gate, a health flag and a semaphore bounding concurrent transitions.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;

use super::adapter::{
    Capability, CapabilitySet, DiscoveredModel, ProviderAdapter, ProviderError, ProviderKind,
};
use crate::config::{BrokerConfig, ConfigError, ProviderConfig};
use crate::models::PriorityTier;

/// Point-in-time view of one provider.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub healthy: bool,
    pub capabilities: CapabilitySet,
    pub max_concurrent_loads: usize,
    pub available_load_permits: usize,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct ProviderEntry {
    config: ProviderConfig,
    adapter: Arc<dyn ProviderAdapter>,
    healthy: AtomicBool,
    load_permits: Arc<Semaphore>,
    last_checked: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
}

impl ProviderEntry {
    fn new(config: ProviderConfig, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let permits = config.max_concurrent_loads.max(1);
        Self {
            config,
            adapter,
            healthy: AtomicBool::new(true),
            load_permits: Arc::new(Semaphore::new(permits)),
            last_checked: Mutex::new(None),
            last_error: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn kind(&self) -> ProviderKind {
        self.adapter.kind()
    }

    pub fn is_local(&self) -> bool {
        self.kind().is_local()
    }

    pub fn tier(&self) -> PriorityTier {
        self.config.priority_tier
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.adapter.capabilities()
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Update the health flag. Returns `true` when the flag changed.
    pub fn set_healthy(&self, healthy: bool, error: Option<String>) -> bool {
        *self.last_checked.lock() = Some(Utc::now());
        *self.last_error.lock() = error;
        self.healthy.swap(healthy, Ordering::AcqRel) != healthy
    }

    /// Semaphore bounding concurrent load/unload calls against this provider.
    pub fn load_permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.load_permits)
    }

    async fn call<T, F>(&self, capability: Option<Capability>, fut: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        if let Some(cap) = capability {
            if !self.capabilities().contains(cap) {
                return Err(ProviderError::Unsupported(cap));
            }
        }
        let timeout = self.config.timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        }
    }

    pub async fn discover(&self) -> Result<Vec<DiscoveredModel>, ProviderError> {
        self.call(Some(Capability::Discover), self.adapter.discover()).await
    }

    pub async fn currently_loaded(&self) -> Result<Vec<String>, ProviderError> {
        self.call(Some(Capability::Discover), self.adapter.currently_loaded()).await
    }

    pub async fn load(&self, model: &str) -> Result<(), ProviderError> {
        self.call(Some(Capability::Load), self.adapter.load(model)).await
    }

    pub async fn unload(&self, model: &str) -> Result<(), ProviderError> {
        self.call(Some(Capability::Unload), self.adapter.unload(model)).await
    }

    pub async fn health_check(&self) -> Result<(), ProviderError> {
        self.call(None, self.adapter.health_check()).await
    }

    pub fn status(&self) -> ProviderStatus {
        ProviderStatus {
            name: self.config.name.clone(),
            kind: self.kind(),
            endpoint: self.config.endpoint.clone(),
            healthy: self.is_healthy(),
            capabilities: self.capabilities(),
            max_concurrent_loads: self.config.max_concurrent_loads,
            available_load_permits: self.load_permits.available_permits(),
            last_checked: *self.last_checked.lock(),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Providers in registration order.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: Vec<Arc<ProviderEntry>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build adapters for every configured provider.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        for provider in &config.providers {
            let adapter = super::build_adapter(provider).map_err(|e| {
                ConfigError::Invalid(format!("provider '{}': {}", provider.name, e))
            })?;
            registry.register(provider.clone(), adapter)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        config: ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), ConfigError> {
        if self.get(&config.name).is_some() {
            return Err(ConfigError::Invalid(format!("duplicate provider '{}'", config.name)));
        }
        self.entries.push(Arc::new(ProviderEntry::new(config, adapter)));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<ProviderEntry>> {
        self.entries.iter().find(|e| e.name() == name).cloned()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ProviderEntry>> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Unknown providers count as unhealthy.
    pub fn is_healthy(&self, name: &str) -> bool {
        self.get(name).is_some_and(|e| e.is_healthy())
    }

    pub fn statuses(&self) -> Vec<ProviderStatus> {
        self.entries.iter().map(|e| e.status()).collect()
    }
}
