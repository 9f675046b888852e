// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Task router: turns a [`TaskRequest`] into a ready [`ModelHandle`].
//!
//! Selection order:
//! 1. the first preferred model that is already loaded on a healthy provider;
//! 2. otherwise the first viable preferred model, loaded directly when the
//!    ledger has room or after executing an eviction plan for the deficit;
//! 3. otherwise the fallback chain (smaller local models, then cloud).
//!
//! The router never picks a model the caller ranked lower while a higher
//! ranked preference is viable.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::EventKind;
use super::eviction::{EvictionError, EvictionPolicy};
use super::fallback::FallbackChain;
use super::orchestrator::Orchestrator;
use crate::config::{AgentProfile, ConfigError, SchedulerConfig};
use crate::error::SchedulerError;
use crate::models::{ModelDescriptor, ModelHandle, ModelId, ModelState};

/// One agent's request for a model.
#[derive(Debug, Clone, Default)]
pub struct TaskRequest {
    pub agent_role: String,
    /// Caller's estimate of task difficulty. Recorded, not used for selection.
    pub complexity_score: f32,
    /// Ordered preferences. Empty means "use the role's profile".
    pub preferred_model_ids: Vec<ModelId>,
    pub deadline: Option<Instant>,
}

impl TaskRequest {
    pub fn for_role(role: &str) -> Self {
        Self { agent_role: role.to_string(), ..Self::default() }
    }

    pub fn with_models<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<ModelId>,
    {
        self.preferred_model_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_complexity(mut self, score: f32) -> Self {
        self.complexity_score = score;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// How a request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutePath {
    /// A preferred model was already resident.
    Resident,
    /// A preferred model was loaded for this request.
    Loaded,
    /// A fallback alternative was used.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub handle: ModelHandle,
    pub path: RoutePath,
    /// Models unloaded to make room, in eviction order.
    pub evicted: Vec<ModelId>,
}

pub struct TaskRouter {
    orchestrator: Arc<Orchestrator>,
    policy: EvictionPolicy,
    fallback: FallbackChain,
    roles: BTreeMap<String, AgentProfile>,
    reservation_attempts: u32,
    conflict_wait: Duration,
}

impl TaskRouter {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        fallback: FallbackChain,
        roles: BTreeMap<String, AgentProfile>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            orchestrator,
            policy: EvictionPolicy::new(),
            fallback,
            roles,
            reservation_attempts: config.reservation_attempts.max(1),
            conflict_wait: config.conflict_wait(),
        }
    }

    pub fn policy(&self) -> &EvictionPolicy {
        &self.policy
    }

    /// Route a request to a ready model handle.
    pub async fn route(&self, request: &TaskRequest) -> Result<ModelHandle, SchedulerError> {
        self.route_detailed(request).await.map(|outcome| outcome.handle)
    }

    /// Route and report how the request was satisfied.
    pub async fn route_detailed(&self, request: &TaskRequest) -> Result<RouteOutcome, SchedulerError> {
        let work = self.select(request);
        let result = match request.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, work)
                .await
                .unwrap_or(Err(SchedulerError::Timeout)),
            None => work.await,
        };

        let events = self.orchestrator.events();
        match &result {
            Ok(outcome) => events.record(
                EventKind::Routed,
                Some(outcome.handle.model_id()),
                format!(
                    "role={} complexity={:.2} path={:?}",
                    request.agent_role, request.complexity_score, outcome.path
                ),
            ),
            Err(SchedulerError::Timeout) => {
                warn!("router: request for role '{}' hit its deadline", request.agent_role);
            }
            Err(_) => {}
        }
        result
    }

    fn preferences(&self, request: &TaskRequest) -> Result<Vec<ModelId>, SchedulerError> {
        if !request.preferred_model_ids.is_empty() {
            return Ok(request.preferred_model_ids.clone());
        }
        self.roles
            .get(&request.agent_role)
            .map(|profile| profile.models.clone())
            .filter(|models| !models.is_empty())
            .ok_or_else(|| ConfigError::UnknownRole(request.agent_role.clone()).into())
    }

    fn viable(&self, descriptor: &ModelDescriptor) -> bool {
        descriptor.is_selectable(Utc::now())
            && self.orchestrator.registry().is_healthy(&descriptor.provider)
    }

    async fn select(&self, request: &TaskRequest) -> Result<RouteOutcome, SchedulerError> {
        let preferred = self.preferences(request)?;
        debug!(
            "router: role={} complexity={:.2} preferences={:?}",
            request.agent_role, request.complexity_score, preferred
        );
        let catalog = self.orchestrator.catalog();

        for id in &preferred {
            let Some(descriptor) = catalog.get(id) else {
                continue;
            };
            if descriptor.state == ModelState::Loaded && self.viable(&descriptor) {
                if let Ok(handle) = self.orchestrator.load(id).await {
                    debug!("router: {} already resident", id);
                    return Ok(RouteOutcome { handle, path: RoutePath::Resident, evicted: Vec::new() });
                }
            }
        }

        let mut failures: Vec<SchedulerError> = Vec::new();
        for id in &preferred {
            match catalog.get(id) {
                None => failures.push(SchedulerError::UnknownModel(id.clone())),
                Some(d) if !self.viable(&d) => {
                    debug!("router: skipping {} (unhealthy provider, cooldown or quarantine)", id);
                    failures.push(self.unviable_error(&d));
                }
                Some(_) => match self.place(id).await {
                    Ok((handle, evicted)) => {
                        return Ok(RouteOutcome { handle, path: RoutePath::Loaded, evicted });
                    }
                    Err(e) => {
                        debug!("router: could not place {}: {}", id, e);
                        failures.push(e);
                    }
                },
            }
        }

        let alternatives = self.fallback.candidates(&preferred, &catalog.snapshot());
        for id in &alternatives {
            let Some(d) = catalog.get(id) else {
                continue;
            };
            if !self.viable(&d) {
                continue;
            }
            match self.place(id).await {
                Ok((handle, evicted)) => {
                    info!("router: role '{}' served by fallback {}", request.agent_role, id);
                    metrics::counter!("vram_broker_fallbacks_total").increment(1);
                    self.orchestrator.events().record(
                        EventKind::Fallback,
                        Some(id),
                        format!("preferences {:?} unavailable", preferred),
                    );
                    return Ok(RouteOutcome { handle, path: RoutePath::Fallback, evicted });
                }
                Err(e) => {
                    debug!("router: fallback {} failed: {}", id, e);
                    failures.push(e);
                }
            }
        }

        Err(self.exhausted(request, failures))
    }

    fn unviable_error(&self, d: &ModelDescriptor) -> SchedulerError {
        if !self.orchestrator.registry().is_healthy(&d.provider) {
            return SchedulerError::ProviderUnreachable {
                provider: d.provider.clone(),
                reason: "provider marked unhealthy".into(),
            };
        }
        let reason = if d.quarantined { "quarantined" } else { "cooling down after failure" };
        SchedulerError::ModelUnavailable { model: d.id.clone(), reason: reason.into() }
    }

    /// Error for a request nothing could satisfy. Unreachable providers are
    /// surfaced when they are the only reason; everything else is capacity.
    fn exhausted(&self, request: &TaskRequest, failures: Vec<SchedulerError>) -> SchedulerError {
        let all_unreachable = !failures.is_empty()
            && failures.iter().all(|e| matches!(e, SchedulerError::ProviderUnreachable { .. }));
        let detail = if failures.is_empty() {
            "no candidate models".to_string()
        } else {
            failures.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; ")
        };
        warn!("router: no capacity for role '{}': {}", request.agent_role, detail);
        self.orchestrator.events().record(
            EventKind::NoCapacity,
            None,
            format!("role '{}': {}", request.agent_role, detail),
        );

        if all_unreachable {
            if let Some(first) = failures.into_iter().next() {
                return first;
            }
        }
        SchedulerError::NoCapacityAvailable { role: request.agent_role.clone(), detail }
    }

    /// Make room for one model and load it.
    async fn place(&self, id: &ModelId) -> Result<(ModelHandle, Vec<ModelId>), SchedulerError> {
        let catalog = self.orchestrator.catalog();
        let ledger = self.orchestrator.ledger();
        let mut evicted = Vec::new();
        let mut last_err = None;

        for attempt in 1..=self.reservation_attempts {
            let mut descriptor = catalog.get(id).ok_or_else(|| SchedulerError::UnknownModel(id.clone()))?;

            // Settling a failed model is not a reservation attempt.
            if descriptor.state == ModelState::Failed {
                let settled = self.orchestrator.recover(id).await?;
                if settled == ModelState::Failed {
                    return Err(SchedulerError::ModelUnavailable {
                        model: id.clone(),
                        reason: "recovery did not settle the model".into(),
                    });
                }
                descriptor = catalog.get(id).ok_or_else(|| SchedulerError::UnknownModel(id.clone()))?;
            }

            let epoch = ledger.release_epoch();
            let deficit = deficit_for(&descriptor, ledger.free_mb());
            if deficit > 0 {
                if descriptor.size_mb > ledger.usable_mb() {
                    return Err(SchedulerError::NoCapacityAvailable {
                        role: String::new(),
                        detail: format!(
                            "{} needs {} MB, usable budget is {} MB",
                            id,
                            descriptor.size_mb,
                            ledger.usable_mb()
                        ),
                    });
                }
                match self.policy.plan(&catalog.snapshot(), deficit, id) {
                    Ok(plan) => {
                        debug!("router: evicting {:?} to free {} MB for {}", plan.ids(), deficit, id);
                        for victim in &plan.victims {
                            match self.orchestrator.unload(&victim.id, &format!("evicted for {}", id)).await {
                                Ok(freed) => {
                                    info!("router: evicted {} ({} MB) for {}", victim.id, freed, id);
                                    metrics::counter!("vram_broker_evictions_total").increment(1);
                                    self.orchestrator.events().record(
                                        EventKind::Evicted,
                                        Some(&victim.id),
                                        format!("freed {} MB for {}", freed, id),
                                    );
                                    evicted.push(victim.id.clone());
                                }
                                Err(e) => warn!("router: eviction of {} failed: {}", victim.id, e),
                            }
                        }
                    }
                    Err(EvictionError::Infeasible { deficit_mb, evictable_mb }) => {
                        if ledger.reserved_mb() == 0 {
                            return Err(SchedulerError::NoCapacityAvailable {
                                role: String::new(),
                                detail: format!(
                                    "{} needs {} MB more, only {} MB evictable",
                                    id, deficit_mb, evictable_mb
                                ),
                            });
                        }
                        // In-flight loads hold the room; wait for one to settle.
                        last_err = Some(SchedulerError::BudgetReservationConflict {
                            model: id.clone(),
                            requested_mb: descriptor.size_mb,
                        });
                        ledger.wait_for_release(epoch, self.conflict_wait).await;
                        continue;
                    }
                }
            }

            let epoch = ledger.release_epoch();
            match self.orchestrator.load(id).await {
                Ok(handle) => return Ok((handle, evicted)),
                Err(e @ SchedulerError::BudgetReservationConflict { .. }) => {
                    debug!("router: reservation for {} raced (attempt {}), waiting", id, attempt);
                    last_err = Some(e);
                    ledger.wait_for_release(epoch, self.conflict_wait).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_err.unwrap_or_else(|| SchedulerError::BudgetReservationConflict {
            model: id.clone(),
            requested_mb: catalog.get(id).map(|d| d.size_mb).unwrap_or(0),
        }))
    }
}

/// MB that must be freed before `descriptor` can be reserved, given one
/// reading of the ledger's free space.
fn deficit_for(descriptor: &ModelDescriptor, free_mb: u64) -> u64 {
    if !descriptor.local || descriptor.state != ModelState::Unloaded {
        return 0;
    }
    descriptor.size_mb.saturating_sub(free_mb)
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
