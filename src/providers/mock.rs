// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory provider for tests and dry runs.
//!
//! Failure injection, artificial latency, call counters and per-model
//! concurrency high-water marks.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::adapter::{
    CapabilitySet, DiscoveredModel, ProviderAdapter, ProviderError, ProviderKind,
};

#[derive(Default)]
struct MockState {
    models: BTreeMap<String, Option<u64>>,
    loaded: BTreeSet<String>,
    unhealthy: bool,
    unreachable: bool,
    fail_loads: HashMap<String, u32>,
    fail_unloads: HashMap<String, u32>,
    load_calls: HashMap<String, u32>,
    unload_calls: HashMap<String, u32>,
    active: HashMap<String, u32>,
    max_active: HashMap<String, u32>,
    total_active: u32,
    max_total_active: u32,
    health_calls: u32,
}

impl MockState {
    fn enter(&mut self, name: &str) {
        let active = self.active.entry(name.to_string()).or_insert(0);
        *active += 1;
        let current = *active;
        let peak = self.max_active.entry(name.to_string()).or_insert(0);
        *peak = (*peak).max(current);
        self.total_active += 1;
        self.max_total_active = self.max_total_active.max(self.total_active);
    }

    fn exit(&mut self, name: &str) {
        if let Some(active) = self.active.get_mut(name) {
            *active = active.saturating_sub(1);
        }
        self.total_active = self.total_active.saturating_sub(1);
    }

    fn take_failure(map: &mut HashMap<String, u32>, name: &str) -> bool {
        match map.get_mut(name) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Scriptable backend.
pub struct MockProvider {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockProvider {
    pub fn new() -> Self {
        Self { state: Mutex::new(MockState::default()), latency: Duration::ZERO }
    }

    pub fn with_model(self, name: &str, size_mb: u64) -> Self {
        self.state.lock().models.insert(name.to_string(), Some(size_mb));
        self
    }

    /// A model whose metadata carries no size.
    pub fn with_unsized_model(self, name: &str) -> Self {
        self.state.lock().models.insert(name.to_string(), None);
        self
    }

    /// Latency applied to every load and unload.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Simulate a model loaded outside the scheduler.
    pub fn load_externally(&self, name: &str) {
        self.state.lock().loaded.insert(name.to_string());
    }

    pub fn unload_externally(&self, name: &str) {
        self.state.lock().loaded.remove(name);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.state.lock().unhealthy = !healthy;
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().unreachable = !reachable;
    }

    pub fn fail_next_loads(&self, name: &str, count: u32) {
        self.state.lock().fail_loads.insert(name.to_string(), count);
    }

    pub fn fail_next_unloads(&self, name: &str, count: u32) {
        self.state.lock().fail_unloads.insert(name.to_string(), count);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state.lock().loaded.contains(name)
    }

    pub fn load_calls(&self, name: &str) -> u32 {
        self.state.lock().load_calls.get(name).copied().unwrap_or(0)
    }

    pub fn unload_calls(&self, name: &str) -> u32 {
        self.state.lock().unload_calls.get(name).copied().unwrap_or(0)
    }

    pub fn total_load_calls(&self) -> u32 {
        self.state.lock().load_calls.values().sum()
    }

    pub fn health_calls(&self) -> u32 {
        self.state.lock().health_calls
    }

    /// Highest number of overlapping load/unload calls seen for a model.
    pub fn max_concurrent_transitions(&self, name: &str) -> u32 {
        self.state.lock().max_active.get(name).copied().unwrap_or(0)
    }

    /// Highest number of overlapping load/unload calls across all models.
    pub fn max_concurrent_total(&self) -> u32 {
        self.state.lock().max_total_active
    }

    fn reachable(&self) -> Result<(), ProviderError> {
        if self.state.lock().unreachable {
            return Err(ProviderError::Unreachable("mock endpoint offline".to_string()));
        }
        Ok(())
    }

    async fn transition(&self, name: &str, loading: bool) -> Result<(), ProviderError> {
        self.reachable()?;
        {
            let mut state = self.state.lock();
            if !state.models.contains_key(name) && !state.loaded.contains(name) {
                return Err(ProviderError::ModelNotFound(name.to_string()));
            }
            let calls = if loading { &mut state.load_calls } else { &mut state.unload_calls };
            *calls.entry(name.to_string()).or_insert(0) += 1;
            state.enter(name);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();
        state.exit(name);
        let failures = if loading { &mut state.fail_loads } else { &mut state.fail_unloads };
        if MockState::take_failure(failures, name) {
            let verb = if loading { "load" } else { "unload" };
            return Err(ProviderError::Failed(format!("injected {} failure for {}", verb, name)));
        }
        if loading {
            state.loaded.insert(name.to_string());
        } else {
            state.loaded.remove(name);
        }
        Ok(())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProviderAdapter for MockProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::ALL
    }

    async fn discover(&self) -> Result<Vec<DiscoveredModel>, ProviderError> {
        self.reachable()?;
        let state = self.state.lock();
        Ok(state
            .models
            .iter()
            .map(|(name, size)| DiscoveredModel::new(name.clone(), *size))
            .collect())
    }

    async fn currently_loaded(&self) -> Result<Vec<String>, ProviderError> {
        self.reachable()?;
        Ok(self.state.lock().loaded.iter().cloned().collect())
    }

    async fn load(&self, model: &str) -> Result<(), ProviderError> {
        self.transition(model, true).await
    }

    async fn unload(&self, model: &str) -> Result<(), ProviderError> {
        self.transition(model, false).await
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.reachable()?;
        let mut state = self.state.lock();
        state.health_calls += 1;
        if state.unhealthy {
            return Err(ProviderError::Failed("mock reports unhealthy".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_and_unload_track_residency() {
        let mock = MockProvider::new().with_model("a", 100);
        mock.load("a").await.unwrap();
        assert!(mock.is_loaded("a"));
        assert_eq!(mock.currently_loaded().await.unwrap(), vec!["a".to_string()]);

        mock.unload("a").await.unwrap();
        assert!(!mock.is_loaded("a"));
        assert_eq!(mock.load_calls("a"), 1);
        assert_eq!(mock.unload_calls("a"), 1);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let mock = MockProvider::new().with_model("a", 100);
        mock.fail_next_loads("a", 1);
        assert!(matches!(mock.load("a").await, Err(ProviderError::Failed(_))));
        assert!(mock.load("a").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_model_is_not_found() {
        let mock = MockProvider::new();
        assert!(matches!(mock.load("ghost").await, Err(ProviderError::ModelNotFound(_))));
    }

    #[tokio::test]
    async fn offline_mock_is_unreachable() {
        let mock = MockProvider::new().with_model("a", 100);
        mock.set_reachable(false);
        assert!(mock.discover().await.unwrap_err().is_connectivity());
        assert!(mock.health_check().await.is_err());
    }
}
