// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Status command implementation.

use serde::Serialize;

use super::status_format::print_status_human;
use crate::broker::Broker;
use crate::scheduler::BrokerSnapshot;

pub const STATUS_EVENT_LIMIT: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState { Healthy, Degraded, Unhealthy }

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthState::Healthy => write!(f, "healthy"),
            HealthState::Degraded => write!(f, "degraded"),
            HealthState::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

impl HealthState {
    /// Healthy when every provider answers and the ledger is within budget;
    /// unhealthy when no provider answers.
    pub fn of(snapshot: &BrokerSnapshot) -> Self {
        let healthy = snapshot.healthy_providers();
        if !snapshot.providers.is_empty() && healthy == 0 {
            HealthState::Unhealthy
        } else if healthy < snapshot.providers.len() || !snapshot.ledger.within_budget() {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            HealthState::Healthy | HealthState::Degraded => 0,
            HealthState::Unhealthy => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub health: HealthState,
    pub version: String,
    #[serde(flatten)]
    pub snapshot: BrokerSnapshot,
}

impl StatusReport {
    pub fn new(snapshot: BrokerSnapshot) -> Self {
        Self {
            health: HealthState::of(&snapshot),
            version: env!("CARGO_PKG_VERSION").to_string(),
            snapshot,
        }
    }
}

/// Sync every provider once and print the resulting snapshot.
pub async fn run_status(broker: &Broker, json_output: bool) -> i32 {
    for result in broker.sync().await {
        if let Err(e) = result {
            eprintln!("Warning: {}", e);
        }
    }
    let report = StatusReport::new(broker.snapshot(STATUS_EVENT_LIMIT));

    if json_output {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error encoding status: {}", e);
                return 1;
            }
        }
    } else {
        print_status_human(&report);
    }
    report.health.exit_code()
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
