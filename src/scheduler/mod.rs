// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduling: transitions, eviction, routing, fallback and the background
//! loops that keep provider state fresh.

pub mod events;
pub mod eviction;
pub mod fallback;
pub mod health;
pub mod orchestrator;
pub mod retry;
pub mod router;
pub mod snapshot;

pub use events::{EventKind, EventLog, EventSeverity, SchedulerEvent};
pub use eviction::{EvictionCandidate, EvictionError, EvictionPlan, EvictionPolicy};
pub use fallback::FallbackChain;
pub use health::{spawn_health_monitor, spawn_recovery};
pub use orchestrator::{Orchestrator, SyncReport};
pub use retry::{retry_transient, RetryPolicy};
pub use router::{RouteOutcome, RoutePath, TaskRequest, TaskRouter};
pub use snapshot::BrokerSnapshot;
