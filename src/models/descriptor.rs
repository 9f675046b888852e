// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Scheduler-owned model descriptors.
//!
//! Backends have no notion of these records; every field is maintained by the
//! catalog and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider-qualified model identifier (`provider/model-name`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn qualified(provider: &str, name: &str) -> Self {
        Self(format!("{}/{}", provider, name))
    }

    /// Provider half of the id. Empty when the id is unqualified.
    pub fn provider(&self) -> &str {
        self.0.split_once('/').map(|(p, _)| p).unwrap_or("")
    }

    /// Provider-native model name.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn is_qualified(&self) -> bool {
        self.0.split_once('/').is_some_and(|(p, n)| !p.is_empty() && !n.is_empty())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for ModelId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Residency priority. Lower values are more preferred to keep resident.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PriorityTier(pub u8);

impl PriorityTier {
    pub const CRITICAL: PriorityTier = PriorityTier(0);
    pub const STANDARD: PriorityTier = PriorityTier(1);
    pub const BULK: PriorityTier = PriorityTier(2);

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Lifecycle state of a model as seen by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
    Failed,
}

impl ModelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelState::Unloaded => "unloaded",
            ModelState::Loading => "loading",
            ModelState::Loaded => "loaded",
            ModelState::Unloading => "unloading",
            ModelState::Failed => "failed",
        }
    }

    /// Whether a transition is in flight.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, ModelState::Loading | ModelState::Unloading)
    }
}

impl std::fmt::Display for ModelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduler record for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: ModelId,
    pub provider: String,
    pub size_mb: u64,
    pub tier: PriorityTier,
    pub state: ModelState,
    pub last_used_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Excluded from selection until the next discovery cycle.
    pub quarantined: bool,
    /// Configured never-evict flag.
    pub pinned: bool,
    /// Non-local (cloud) models consume no budget.
    pub local: bool,
    /// Live handles; non-zero pins the model against eviction.
    pub in_flight: usize,
    /// Bumped on every successful load or adoption.
    pub generation: u64,
}

impl ModelDescriptor {
    pub fn new(id: ModelId, size_mb: u64, tier: PriorityTier) -> Self {
        let provider = id.provider().to_string();
        Self {
            id,
            provider,
            size_mb,
            tier,
            state: ModelState::Unloaded,
            last_used_at: None,
            consecutive_failures: 0,
            cooldown_until: None,
            quarantined: false,
            pinned: false,
            local: true,
            in_flight: 0,
            generation: 0,
        }
    }

    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }

    /// Eligible to be chosen by the router (state aside).
    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        !self.quarantined && !self.in_cooldown(now)
    }

    /// Whether the ledger should hold memory for this model.
    pub fn is_resident(&self) -> bool {
        self.local && matches!(self.state, ModelState::Loading | ModelState::Loaded)
    }
}
