// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Read-only observability snapshot for dashboards and the `status` command.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::events::SchedulerEvent;
use super::orchestrator::Orchestrator;
use crate::budget::LedgerSnapshot;
use crate::models::{ModelDescriptor, ModelState};
use crate::providers::ProviderStatus;

#[derive(Debug, Clone, Serialize)]
pub struct BrokerSnapshot {
    pub taken_at: DateTime<Utc>,
    pub ledger: LedgerSnapshot,
    pub models: Vec<ModelDescriptor>,
    pub providers: Vec<ProviderStatus>,
    /// Oldest first.
    pub events: Vec<SchedulerEvent>,
}

impl BrokerSnapshot {
    pub fn capture(orchestrator: &Orchestrator, event_limit: usize) -> Self {
        Self {
            taken_at: Utc::now(),
            ledger: orchestrator.ledger().snapshot(),
            models: orchestrator.catalog().snapshot(),
            providers: orchestrator.registry().statuses(),
            events: orchestrator.events().recent(event_limit),
        }
    }

    pub fn loaded(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter().filter(|d| d.state == ModelState::Loaded)
    }

    pub fn healthy_providers(&self) -> usize {
        self.providers.iter().filter(|p| p.healthy).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
