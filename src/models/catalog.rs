// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model catalog: discovered and configured descriptors keyed by qualified id.
//!
//! Each model lives in a [`ModelSlot`] holding its descriptor and the async
//! transition lock that serializes load/unload for that id. Descriptor reads
//! and writes are short critical sections; the transition lock is held across
//! provider calls.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use super::descriptor::{ModelDescriptor, ModelId, ModelState};
use crate::config::{ModelOverride, ProviderConfig};
use crate::providers::DiscoveredModel;

pub struct ModelSlot {
    descriptor: Mutex<ModelDescriptor>,
    transition: Arc<tokio::sync::Mutex<()>>,
}

impl ModelSlot {
    fn new(descriptor: ModelDescriptor) -> Self {
        Self {
            descriptor: Mutex::new(descriptor),
            transition: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Copy of the current descriptor.
    pub fn descriptor(&self) -> ModelDescriptor {
        self.descriptor.lock().clone()
    }

    pub fn state(&self) -> ModelState {
        self.descriptor.lock().state
    }

    /// Run `f` against the descriptor under its lock.
    pub fn with_descriptor<R>(&self, f: impl FnOnce(&mut ModelDescriptor) -> R) -> R {
        f(&mut self.descriptor.lock())
    }

    /// Per-model transition lock.
    pub fn transition_lock(&self) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(&self.transition)
    }

    /// Whether a transition currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.transition.try_lock().is_err()
    }
}

/// Result of merging one provider's discovery listing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: Vec<ModelId>,
    pub resized: Vec<ModelId>,
    pub requalified: Vec<ModelId>,
}

/// Registry of every model the scheduler knows about.
pub struct ModelCatalog {
    slots: DashMap<ModelId, Arc<ModelSlot>>,
    overrides: HashMap<ModelId, ModelOverride>,
}

impl ModelCatalog {
    pub fn new(overrides: &[ModelOverride]) -> Self {
        Self {
            slots: DashMap::new(),
            overrides: overrides.iter().map(|o| (o.id.clone(), o.clone())).collect(),
        }
    }

    pub fn slot(&self, id: &ModelId) -> Option<Arc<ModelSlot>> {
        self.slots.get(id).map(|s| Arc::clone(s.value()))
    }

    pub fn get(&self, id: &ModelId) -> Option<ModelDescriptor> {
        self.slots.get(id).map(|s| s.descriptor())
    }

    pub fn contains(&self, id: &ModelId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Insert a descriptor directly, replacing any existing entry.
    pub fn insert(&self, mut descriptor: ModelDescriptor) -> Arc<ModelSlot> {
        self.apply_override(&mut descriptor, true);
        let slot = Arc::new(ModelSlot::new(descriptor.clone()));
        self.slots.insert(descriptor.id, Arc::clone(&slot));
        slot
    }

    /// Mutate one descriptor. Returns `None` for unknown ids.
    pub fn update<R>(&self, id: &ModelId, f: impl FnOnce(&mut ModelDescriptor) -> R) -> Option<R> {
        self.slot(id).map(|slot| slot.with_descriptor(f))
    }

    /// All descriptors ordered by id.
    pub fn snapshot(&self) -> Vec<ModelDescriptor> {
        let mut all: Vec<ModelDescriptor> = self.slots.iter().map(|s| s.descriptor()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    pub fn by_provider(&self, provider: &str) -> Vec<ModelDescriptor> {
        self.snapshot().into_iter().filter(|d| d.provider == provider).collect()
    }

    /// Merge a provider's discovery listing into the catalog.
    ///
    /// New models enter as `Unloaded`. Known models have their size refreshed
    /// only while not resident, since the ledger holds the size they were
    /// committed with. Being listed again clears quarantine.
    pub fn merge_discovered(
        &self,
        provider: &ProviderConfig,
        discovered: &[DiscoveredModel],
    ) -> MergeOutcome {
        let local = provider.kind.is_local();
        let mut outcome = MergeOutcome::default();
        let mut seen = HashSet::new();

        for model in discovered {
            let id = ModelId::qualified(&provider.name, &model.name);
            if !seen.insert(id.clone()) {
                continue;
            }
            let reported = if local {
                model.size_mb.unwrap_or(provider.default_model_mb)
            } else {
                0
            };

            if let Some(slot) = self.slot(&id) {
                let target = self.override_size(&id).filter(|_| local).unwrap_or(reported);
                let (resized, requalified) = slot.with_descriptor(|d| {
                    let settled = !d.is_resident() && !d.state.is_transitioning();
                    let resized = settled && d.size_mb != target;
                    if resized {
                        d.size_mb = target;
                    }
                    let requalified = d.quarantined;
                    d.quarantined = false;
                    d.local = local;
                    self.apply_override(d, false);
                    (resized, requalified)
                });
                if resized {
                    outcome.resized.push(id.clone());
                }
                if requalified {
                    debug!("catalog: {} re-discovered, quarantine cleared", id);
                    outcome.requalified.push(id);
                }
                continue;
            }

            let mut descriptor = ModelDescriptor::new(id.clone(), reported, provider.priority_tier);
            descriptor.local = local;
            self.insert(descriptor);
            outcome.added.push(id);
        }
        outcome
    }

    fn override_size(&self, id: &ModelId) -> Option<u64> {
        self.overrides.get(id).and_then(|o| o.size_mb)
    }

    fn apply_override(&self, descriptor: &mut ModelDescriptor, allow_resize: bool) {
        let Some(o) = self.overrides.get(&descriptor.id) else {
            return;
        };
        if let Some(size) = o.size_mb {
            if allow_resize && descriptor.local {
                descriptor.size_mb = size;
            }
        }
        if let Some(tier) = o.priority_tier {
            descriptor.tier = tier;
        }
        descriptor.pinned = o.pinned;
    }
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::new(&[])
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
