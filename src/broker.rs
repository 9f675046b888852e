// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Assembled broker: configuration wired into registry, catalog, ledger,
//! orchestrator, router and background tasks.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::budget::BudgetLedger;
use crate::config::BrokerConfig;
use crate::error::SchedulerError;
use crate::models::{ModelCatalog, ModelHandle, ModelId};
use crate::providers::ProviderRegistry;
use crate::scheduler::{
    spawn_health_monitor, spawn_recovery, BrokerSnapshot, EventLog, FallbackChain, Orchestrator,
    RouteOutcome, SyncReport, TaskRequest, TaskRouter,
};

pub struct Broker {
    config: BrokerConfig,
    orchestrator: Arc<Orchestrator>,
    router: TaskRouter,
}

impl Broker {
    /// Assemble a broker around an already-populated registry.
    pub fn new(config: BrokerConfig, registry: ProviderRegistry) -> Self {
        let ledger = BudgetLedger::new(config.budget.ceiling_mb, config.budget.safety_margin_mb);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(ModelCatalog::new(&config.models)),
            Arc::new(ledger),
            Arc::new(EventLog::new(config.scheduler.event_capacity)),
            config.scheduler.clone(),
        ));
        let router = TaskRouter::new(
            orchestrator.clone(),
            FallbackChain::new(&config.fallback),
            config.roles.clone(),
            &config.scheduler,
        );
        Self { config, orchestrator, router }
    }

    /// Validate the configuration and build adapters for every provider.
    pub fn from_config(config: BrokerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let registry = ProviderRegistry::from_config(&config)?;
        Ok(Self::new(config, registry))
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        self.orchestrator.ledger()
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        self.orchestrator.catalog()
    }

    pub fn events(&self) -> &Arc<EventLog> {
        self.orchestrator.events()
    }

    /// Discover every provider and reconcile residency.
    pub async fn sync(&self) -> Vec<Result<SyncReport, SchedulerError>> {
        self.orchestrator.sync_all().await
    }

    pub async fn route(&self, request: &TaskRequest) -> Result<ModelHandle, SchedulerError> {
        self.router.route(request).await
    }

    pub async fn route_detailed(&self, request: &TaskRequest) -> Result<RouteOutcome, SchedulerError> {
        self.router.route_detailed(request).await
    }

    /// Explicit unload. Refused while the model is pinned or has live handles.
    pub async fn unload(&self, id: &ModelId) -> Result<u64, SchedulerError> {
        self.orchestrator.unload(id, "requested").await
    }

    pub fn snapshot(&self, event_limit: usize) -> BrokerSnapshot {
        BrokerSnapshot::capture(&self.orchestrator, event_limit)
    }

    /// Spawn the health monitor and the recovery scheduler.
    pub fn start_background(&self) -> BackgroundTasks {
        let token = CancellationToken::new();
        let scheduler = &self.config.scheduler;
        let handles = vec![
            spawn_health_monitor(self.orchestrator.clone(), scheduler.health_interval(), token.clone()),
            spawn_recovery(self.orchestrator.clone(), scheduler.recovery_interval(), token.clone()),
        ];
        info!(
            "broker: background tasks started (health every {:?}, recovery every {:?})",
            scheduler.health_interval(),
            scheduler.recovery_interval()
        );
        BackgroundTasks { token, handles }
    }
}

/// Handles to the broker's background loops.
pub struct BackgroundTasks {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl BackgroundTasks {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    /// Cancel every loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!("broker: background task ended abnormally: {}", e);
            }
        }
    }
}
