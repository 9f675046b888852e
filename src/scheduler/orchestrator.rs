// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Load/unload orchestrator.
//!
//! Drives every model state transition:
//!
//! ```text
//! Unloaded -> Loading -> Loaded -> Unloading -> Unloaded
//!                 \                    \
//!                  `-> Failed <---------'
//! ```
//!
//! One transition per model at a time (the slot's transition lock, held across
//! the provider call). Capacity is reserved before `Loading` and committed or
//! released when the call resolves. Transitions run on spawned tasks, so a
//! caller that stops waiting never interrupts a provider call halfway.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::events::{EventKind, EventLog};
use super::retry::retry_transient;
use crate::budget::BudgetLedger;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::models::{ModelCatalog, ModelDescriptor, ModelHandle, ModelId, ModelSlot, ModelState};
use crate::providers::{DiscoveredModel, ProviderEntry, ProviderError, ProviderRegistry};

/// Outcome of one provider discovery and reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub provider: String,
    pub discovered: usize,
    pub added: Vec<ModelId>,
    pub adopted: Vec<ModelId>,
    pub released: Vec<ModelId>,
    /// Models skipped because a transition held their lock.
    pub skipped: Vec<ModelId>,
}

pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    catalog: Arc<ModelCatalog>,
    ledger: Arc<BudgetLedger>,
    events: Arc<EventLog>,
    config: SchedulerConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        catalog: Arc<ModelCatalog>,
        ledger: Arc<BudgetLedger>,
        events: Arc<EventLog>,
        config: SchedulerConfig,
    ) -> Self {
        Self { registry, catalog, ledger, events, config }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// Cooldown after the `failures`-th consecutive failure. Zero until the
    /// count passes `failure_threshold`, then doubling from the base.
    pub fn cooldown_for(&self, failures: u32) -> Duration {
        let over = failures.saturating_sub(self.config.failure_threshold);
        if over == 0 {
            return Duration::ZERO;
        }
        let exp = (over - 1).min(5);
        self.config.cooldown().saturating_mul(1 << exp)
    }

    fn resolve(&self, id: &ModelId) -> Result<(Arc<ModelSlot>, Arc<ProviderEntry>), SchedulerError> {
        let slot = self.catalog.slot(id).ok_or_else(|| SchedulerError::UnknownModel(id.clone()))?;
        let entry = self
            .registry
            .get(id.provider())
            .ok_or_else(|| SchedulerError::UnknownProvider(id.provider().to_string()))?;
        Ok((slot, entry))
    }

    fn checkout(
        slot: &Arc<ModelSlot>,
        entry: &ProviderEntry,
        id: &ModelId,
    ) -> Result<ModelHandle, SchedulerError> {
        ModelHandle::checkout(slot, &entry.config().endpoint).ok_or_else(|| {
            SchedulerError::ModelUnavailable { model: id.clone(), reason: "no longer loaded".into() }
        })
    }

    fn unavailable(id: &ModelId, reason: impl Into<String>) -> SchedulerError {
        SchedulerError::ModelUnavailable { model: id.clone(), reason: reason.into() }
    }

    /// Load a model (or bind to it if already loaded) and return a handle.
    ///
    /// Concurrent calls for one id queue on its transition lock; only the
    /// first performs the provider load, the rest bind to the result.
    pub async fn load(self: &Arc<Self>, id: &ModelId) -> Result<ModelHandle, SchedulerError> {
        let this = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move { this.run_load(&id).await })
            .await
            .map_err(|e| SchedulerError::TransitionAborted(e.to_string()))?
    }

    async fn run_load(&self, id: &ModelId) -> Result<ModelHandle, SchedulerError> {
        let (slot, entry) = self.resolve(id)?;
        let lock = slot.transition_lock();
        let _guard = lock.lock().await;

        let mut descriptor = slot.descriptor();
        let now = Utc::now();
        if descriptor.quarantined {
            return Err(Self::unavailable(id, "quarantined until next discovery"));
        }
        if descriptor.state == ModelState::Loaded {
            return Self::checkout(&slot, &entry, id);
        }
        if !entry.is_healthy() {
            return Err(SchedulerError::ProviderUnreachable {
                provider: entry.name().to_string(),
                reason: "provider marked unhealthy".into(),
            });
        }
        match descriptor.state {
            ModelState::Loading | ModelState::Unloading => {
                return Err(Self::unavailable(id, "transition in progress"));
            }
            ModelState::Failed => {
                if descriptor.in_cooldown(now) {
                    return Err(Self::unavailable(id, "cooling down after failure"));
                }
                if self.recover_locked(&slot, &entry).await? == ModelState::Loaded {
                    return Self::checkout(&slot, &entry, id);
                }
                descriptor = slot.descriptor();
            }
            ModelState::Loaded | ModelState::Unloaded => {}
        }

        if !descriptor.local {
            slot.with_descriptor(|d| {
                d.state = ModelState::Loaded;
                d.generation += 1;
            });
            return Self::checkout(&slot, &entry, id);
        }

        let reservation = self
            .ledger
            .try_reserve(id, descriptor.size_mb)
            .map_err(|e| SchedulerError::from_budget(id, e))?;
        slot.with_descriptor(|d| d.state = ModelState::Loading);
        debug!("orchestrator: loading {} ({} MB reserved)", id, reservation.mb());

        let permit = entry.load_permits().acquire_owned().await;
        let result = match permit {
            Ok(_permit) => {
                let provider: &ProviderEntry = &entry;
                let name = id.name();
                let label = format!("load {}", id);
                retry_transient(&self.config.retry, &label, move || provider.load(name)).await
            }
            Err(e) => Err(ProviderError::Failed(e.to_string())),
        };

        match result {
            Ok(()) => {
                reservation.commit();
                slot.with_descriptor(|d| {
                    d.state = ModelState::Loaded;
                    d.consecutive_failures = 0;
                    d.cooldown_until = None;
                    d.generation += 1;
                });
                info!("orchestrator: loaded {} ({} MB)", id, descriptor.size_mb);
                metrics::counter!("vram_broker_loads_total").increment(1);
                self.events.record(
                    EventKind::Loaded,
                    Some(id),
                    format!("{} MB committed", descriptor.size_mb),
                );
                Self::checkout(&slot, &entry, id)
            }
            Err(e) => {
                reservation.release();
                metrics::counter!("vram_broker_load_failures_total").increment(1);
                self.fail(&slot, &entry, id, &e, EventKind::LoadFailed);
                Err(SchedulerError::from_provider(entry.name(), id, e, true))
            }
        }
    }

    /// Record a failed transition on the descriptor and the provider.
    fn fail(
        &self,
        slot: &ModelSlot,
        entry: &ProviderEntry,
        id: &ModelId,
        err: &ProviderError,
        kind: EventKind,
    ) {
        let now = Utc::now();
        let max_attempts = self.config.max_recovery_attempts;
        let (failures, quarantined) = slot.with_descriptor(|d| {
            d.state = ModelState::Failed;
            d.consecutive_failures += 1;
            let cooldown = self.cooldown_for(d.consecutive_failures);
            d.cooldown_until = if cooldown.is_zero() {
                None
            } else {
                chrono::Duration::from_std(cooldown).ok().map(|c| now + c)
            };
            if matches!(err, ProviderError::ModelNotFound(_)) || d.consecutive_failures >= max_attempts {
                d.quarantined = true;
            }
            (d.consecutive_failures, d.quarantined)
        });
        warn!("orchestrator: {} failed ({} consecutive): {}", id, failures, err);
        self.events.record(kind, Some(id), err.to_string());
        if quarantined {
            self.events.record(EventKind::Quarantined, Some(id), format!("after {} failures", failures));
        }
        if err.is_connectivity() {
            self.mark_unhealthy(entry, err);
        }
    }

    fn mark_unhealthy(&self, entry: &ProviderEntry, err: &ProviderError) {
        if entry.set_healthy(false, Some(err.to_string())) {
            warn!("orchestrator: provider {} marked unhealthy: {}", entry.name(), err);
            self.events.record_provider(EventKind::ProviderDown, entry.name(), err.to_string());
        }
    }

    fn mark_healthy(&self, entry: &ProviderEntry) -> bool {
        let changed = entry.set_healthy(true, None);
        if changed {
            info!("orchestrator: provider {} re-admitted", entry.name());
            self.events.record_provider(EventKind::ProviderUp, entry.name(), "health restored");
        }
        changed
    }

    /// Unload a model and release its commitment. Returns the MB freed.
    ///
    /// Refused for pinned models and models with live handles.
    pub async fn unload(self: &Arc<Self>, id: &ModelId, reason: &str) -> Result<u64, SchedulerError> {
        let this = Arc::clone(self);
        let id = id.clone();
        let reason = reason.to_string();
        tokio::spawn(async move { this.run_unload(&id, &reason).await })
            .await
            .map_err(|e| SchedulerError::TransitionAborted(e.to_string()))?
    }

    async fn run_unload(&self, id: &ModelId, reason: &str) -> Result<u64, SchedulerError> {
        let (slot, entry) = self.resolve(id)?;
        let lock = slot.transition_lock();
        let _guard = lock.lock().await;

        // Checked and flipped under one descriptor lock so no lease can slip in.
        let started = slot.with_descriptor(|d| {
            match d.state {
                ModelState::Unloaded => return Ok(false),
                ModelState::Loaded | ModelState::Failed => {}
                ModelState::Loading | ModelState::Unloading => {
                    return Err(Self::unavailable(id, "transition in progress"));
                }
            }
            if d.pinned {
                return Err(Self::unavailable(id, "pinned"));
            }
            if d.in_flight > 0 {
                return Err(Self::unavailable(id, format!("{} live handles", d.in_flight)));
            }
            if !d.local {
                d.state = ModelState::Unloaded;
                return Ok(false);
            }
            d.state = ModelState::Unloading;
            Ok(true)
        })?;
        if !started {
            return Ok(0);
        }

        let permit = entry.load_permits().acquire_owned().await;
        let result = match permit {
            Ok(_permit) => {
                let provider: &ProviderEntry = &entry;
                let name = id.name();
                let label = format!("unload {}", id);
                retry_transient(&self.config.retry, &label, move || provider.unload(name)).await
            }
            Err(e) => Err(ProviderError::Failed(e.to_string())),
        };

        match result {
            Ok(()) | Err(ProviderError::ModelNotFound(_)) => {
                let freed = self.ledger.release_commitment(id);
                slot.with_descriptor(|d| d.state = ModelState::Unloaded);
                info!("orchestrator: unloaded {} ({}), freed {} MB", id, reason, freed);
                metrics::counter!("vram_broker_unloads_total").increment(1);
                self.events.record(EventKind::Unloaded, Some(id), format!("{}: freed {} MB", reason, freed));
                Ok(freed)
            }
            Err(e) => {
                // The provider may still hold the weights; the commitment stays.
                self.fail(&slot, &entry, id, &e, EventKind::UnloadFailed);
                Err(SchedulerError::from_provider(entry.name(), id, e, false))
            }
        }
    }

    /// Try to bring a failed model back to a settled state.
    pub async fn recover(self: &Arc<Self>, id: &ModelId) -> Result<ModelState, SchedulerError> {
        let this = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move { this.run_recover(&id).await })
            .await
            .map_err(|e| SchedulerError::TransitionAborted(e.to_string()))?
    }

    async fn run_recover(&self, id: &ModelId) -> Result<ModelState, SchedulerError> {
        let (slot, entry) = self.resolve(id)?;
        let lock = slot.transition_lock();
        let _guard = lock.lock().await;
        let state = slot.state();
        if state != ModelState::Failed {
            return Ok(state);
        }
        self.recover_locked(&slot, &entry).await
    }

    /// Ask the provider whether a failed model is resident and settle the
    /// descriptor accordingly. Caller holds the transition lock.
    async fn recover_locked(
        &self,
        slot: &ModelSlot,
        entry: &ProviderEntry,
    ) -> Result<ModelState, SchedulerError> {
        let descriptor = slot.descriptor();
        let id = &descriptor.id;
        match entry.currently_loaded().await {
            Ok(loaded) => {
                let state = if loaded.iter().any(|n| n == id.name()) {
                    self.adopt_locked(slot, &descriptor);
                    ModelState::Loaded
                } else {
                    self.ledger.release_commitment(id);
                    slot.with_descriptor(|d| {
                        d.state = ModelState::Unloaded;
                        d.cooldown_until = None;
                    });
                    ModelState::Unloaded
                };
                info!("orchestrator: recovered {} as {}", id, state);
                self.events.record(EventKind::Recovered, Some(id), format!("settled as {}", state));
                Ok(state)
            }
            Err(e) => {
                self.fail(slot, entry, id, &e, EventKind::LoadFailed);
                Err(SchedulerError::from_provider(entry.name(), id, e, true))
            }
        }
    }

    /// Recover every failed model whose cooldown has passed. Returns how many
    /// were settled.
    pub async fn recover_due(self: &Arc<Self>) -> usize {
        let now = Utc::now();
        let due: Vec<ModelId> = self
            .catalog
            .snapshot()
            .into_iter()
            .filter(|d| d.state == ModelState::Failed && d.is_selectable(now))
            .filter(|d| self.registry.is_healthy(&d.provider))
            .map(|d| d.id)
            .collect();

        let mut settled = 0;
        for id in due {
            match self.recover(&id).await {
                Ok(ModelState::Failed) => {}
                Ok(_) => settled += 1,
                Err(e) => debug!("orchestrator: recovery of {} failed: {}", id, e),
            }
        }
        settled
    }

    fn adopt_locked(&self, slot: &ModelSlot, descriptor: &ModelDescriptor) {
        let id = &descriptor.id;
        let within = if descriptor.local {
            self.ledger.adopt(id, descriptor.size_mb)
        } else {
            true
        };
        slot.with_descriptor(|d| {
            d.state = ModelState::Loaded;
            d.consecutive_failures = 0;
            d.cooldown_until = None;
            d.generation += 1;
        });
        metrics::counter!("vram_broker_adoptions_total").increment(1);
        if descriptor.local {
            info!("orchestrator: adopted externally loaded {} ({} MB)", id, descriptor.size_mb);
            self.events.record(
                EventKind::Adopted,
                Some(id),
                format!("{} MB loaded outside the scheduler", descriptor.size_mb),
            );
        }
        if !within {
            warn!(
                "orchestrator: adopting {} put the ledger over budget ({} MB committed)",
                id,
                self.ledger.committed_mb()
            );
            self.events.record(
                EventKind::OverBudget,
                Some(id),
                format!("{} MB committed of {} MB usable", self.ledger.committed_mb(), self.ledger.usable_mb()),
            );
        }
    }

    /// Discover one provider's models and reconcile residency drift.
    ///
    /// On failure the provider is marked unhealthy and the catalog is left
    /// untouched.
    pub async fn sync_provider(&self, name: &str) -> Result<SyncReport, SchedulerError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownProvider(name.to_string()))?;
        let provider: &ProviderEntry = &entry;
        let policy = &self.config.retry;

        let listing = async {
            let mut discovered = retry_transient(policy, &format!("discover {}", name), move || {
                provider.discover()
            })
            .await?;
            let loaded = retry_transient(policy, &format!("loaded {}", name), move || {
                provider.currently_loaded()
            })
            .await?;
            for model in &loaded {
                if !discovered.iter().any(|m| &m.name == model) {
                    discovered.push(DiscoveredModel::new(model.clone(), None));
                }
            }
            Ok::<_, ProviderError>((discovered, loaded))
        };
        let (discovered, loaded) = match listing.await {
            Ok(listing) => listing,
            Err(e) => {
                self.mark_unhealthy(&entry, &e);
                return Err(SchedulerError::ProviderUnreachable {
                    provider: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        self.mark_healthy(&entry);

        let merged = self.catalog.merge_discovered(entry.config(), &discovered);
        if !merged.added.is_empty() {
            self.events.record_provider(
                EventKind::Discovered,
                name,
                format!("{} new models", merged.added.len()),
            );
        }

        let mut report = SyncReport {
            provider: name.to_string(),
            discovered: discovered.len(),
            added: merged.added,
            ..SyncReport::default()
        };
        let resident: HashSet<&str> = loaded.iter().map(String::as_str).collect();

        for descriptor in self.catalog.by_provider(name) {
            let Some(slot) = self.catalog.slot(&descriptor.id) else {
                continue;
            };
            let lock = slot.transition_lock();
            let Ok(_guard) = lock.try_lock() else {
                report.skipped.push(descriptor.id.clone());
                continue;
            };
            let descriptor = slot.descriptor();
            let reported = resident.contains(descriptor.id.name());

            match (descriptor.state, reported) {
                (ModelState::Unloaded | ModelState::Failed, true) => {
                    self.adopt_locked(&slot, &descriptor);
                    report.adopted.push(descriptor.id.clone());
                }
                (ModelState::Loaded, false) => {
                    let freed = self.ledger.release_commitment(&descriptor.id);
                    slot.with_descriptor(|d| d.state = ModelState::Unloaded);
                    warn!("orchestrator: {} vanished from {}, released {} MB", descriptor.id, name, freed);
                    self.events.record(
                        EventKind::DriftReleased,
                        Some(&descriptor.id),
                        format!("no longer loaded, released {} MB", freed),
                    );
                    report.released.push(descriptor.id.clone());
                }
                _ => {}
            }
        }

        debug!(
            "orchestrator: synced {}: {} discovered, {} adopted, {} released",
            name,
            report.discovered,
            report.adopted.len(),
            report.released.len()
        );
        Ok(report)
    }

    /// Sync every provider concurrently; failures are logged and reported per
    /// provider, in registration order.
    pub async fn sync_all(&self) -> Vec<Result<SyncReport, SchedulerError>> {
        let names: Vec<String> = self.registry.iter().map(|e| e.name().to_string()).collect();
        let results = join_all(names.iter().map(|name| self.sync_provider(name))).await;
        for (name, result) in names.iter().zip(&results) {
            if let Err(e) = result {
                warn!("orchestrator: sync of {} failed: {}", name, e);
            }
        }
        results
    }

    /// Probe one provider. Re-admission triggers a fresh sync.
    pub async fn check_health(&self, name: &str) -> Result<bool, SchedulerError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownProvider(name.to_string()))?;
        match entry.health_check().await {
            Ok(()) => {
                if self.mark_healthy(&entry) {
                    if let Err(e) = self.sync_provider(name).await {
                        warn!("orchestrator: resync after re-admitting {} failed: {}", name, e);
                    }
                }
                Ok(entry.is_healthy())
            }
            Err(e) => {
                self.mark_unhealthy(&entry, &e);
                Ok(false)
            }
        }
    }

    /// Probe every provider. Returns how many are healthy.
    pub async fn check_all_health(&self) -> usize {
        let names: Vec<String> = self.registry.iter().map(|e| e.name().to_string()).collect();
        join_all(names.iter().map(|name| self.check_health(name)))
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count()
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
