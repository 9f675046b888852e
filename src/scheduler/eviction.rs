// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Eviction policy: which loaded models to unload to free a deficit.
//!
//! Candidates are ordered by priority tier (highest number first), then by
//! least recent use. Tier strictly dominates recency. The policy is pure; the
//! router executes the plan through the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::models::{ModelDescriptor, ModelId, ModelState, PriorityTier};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvictionError {
    #[error("Cannot free {deficit_mb} MB: only {evictable_mb} MB is evictable")]
    Infeasible { deficit_mb: u64, evictable_mb: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionCandidate {
    pub id: ModelId,
    pub size_mb: u64,
    pub tier: PriorityTier,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl EvictionCandidate {
    fn from_descriptor(d: &ModelDescriptor) -> Self {
        Self { id: d.id.clone(), size_mb: d.size_mb, tier: d.tier, last_used_at: d.last_used_at }
    }
}

/// Ordered list of models to unload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionPlan {
    pub victims: Vec<EvictionCandidate>,
    pub deficit_mb: u64,
    pub freed_mb: u64,
}

impl EvictionPlan {
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    pub fn ids(&self) -> Vec<ModelId> {
        self.victims.iter().map(|v| v.id.clone()).collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvictionPolicy;

impl EvictionPolicy {
    pub fn new() -> Self {
        Self
    }

    fn eligible(&self, d: &ModelDescriptor, exclude: &ModelId) -> bool {
        if d.id == *exclude || d.state != ModelState::Loaded || !d.local {
            return false;
        }
        !d.pinned && d.in_flight == 0
    }

    /// Evictable models in policy order.
    pub fn candidates(&self, descriptors: &[ModelDescriptor], exclude: &ModelId) -> Vec<EvictionCandidate> {
        let mut candidates: Vec<EvictionCandidate> = descriptors
            .iter()
            .filter(|d| self.eligible(d, exclude))
            .map(EvictionCandidate::from_descriptor)
            .collect();
        // Never-used sorts before any timestamp.
        candidates.sort_by(|a, b| {
            b.tier
                .cmp(&a.tier)
                .then_with(|| a.last_used_at.cmp(&b.last_used_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        candidates
    }

    /// Plan evictions freeing at least `deficit_mb`.
    ///
    /// Lower-priority tiers are emptied whole before a higher one is touched.
    /// Within the tier where the deficit is crossed the fewest models are
    /// taken, least recently used first among equally small sets.
    pub fn plan(
        &self,
        descriptors: &[ModelDescriptor],
        deficit_mb: u64,
        exclude: &ModelId,
    ) -> Result<EvictionPlan, EvictionError> {
        if deficit_mb == 0 {
            return Ok(EvictionPlan::default());
        }

        let candidates = self.candidates(descriptors, exclude);
        let evictable_mb: u64 = candidates.iter().map(|c| c.size_mb).sum();
        if evictable_mb < deficit_mb {
            return Err(EvictionError::Infeasible { deficit_mb, evictable_mb });
        }

        let mut victims = Vec::new();
        let mut freed = 0u64;
        let mut start = 0;
        while start < candidates.len() && freed < deficit_mb {
            let tier = candidates[start].tier;
            let end = candidates[start..]
                .iter()
                .position(|c| c.tier != tier)
                .map_or(candidates.len(), |n| start + n);
            let group = &candidates[start..end];
            let group_mb: u64 = group.iter().map(|c| c.size_mb).sum();

            if freed + group_mb < deficit_mb {
                victims.extend_from_slice(group);
                freed += group_mb;
            } else {
                for i in fewest_covering(group, deficit_mb - freed) {
                    freed += group[i].size_mb;
                    victims.push(group[i].clone());
                }
            }
            start = end;
        }

        Ok(EvictionPlan { victims, deficit_mb, freed_mb: freed })
    }
}

/// Indices, ascending, of the fewest entries in `group` whose sizes cover
/// `need_mb`. Among sets of that size the earliest entries win.
fn fewest_covering(group: &[EvictionCandidate], need_mb: u64) -> Vec<usize> {
    let mut count = 0;
    while count < group.len() && largest_sum(group, count) < need_mb {
        count += 1;
    }

    let mut picks = Vec::with_capacity(count);
    let mut covered = 0u64;
    let mut next = 0;
    while picks.len() < count {
        let slots = count - picks.len() - 1;
        let pick = (next..group.len()).find(|&i| {
            covered + group[i].size_mb + largest_sum(&group[i + 1..], slots) >= need_mb
        });
        let Some(i) = pick else {
            break;
        };
        covered += group[i].size_mb;
        picks.push(i);
        next = i + 1;
    }
    picks
}

fn largest_sum(group: &[EvictionCandidate], n: usize) -> u64 {
    let mut sizes: Vec<u64> = group.iter().map(|c| c.size_mb).collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    sizes.iter().take(n).sum()
}

#[cfg(test)]
#[path = "eviction_tests.rs"]
mod tests;
