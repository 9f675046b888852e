// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Fallback chain consulted once a request's preferences are exhausted.
//!
//! Local alternatives come first, non-local (cloud) models last. An explicit
//! chain from configuration keeps its configured order within each group;
//! otherwise the chain is derived from the catalog: local models smaller than
//! the first preference, largest first, then cloud models.

use std::collections::HashSet;

use crate::config::FallbackConfig;
use crate::models::{ModelDescriptor, ModelId};

#[derive(Debug, Clone)]
pub struct FallbackChain {
    configured: Vec<ModelId>,
    include_cloud: bool,
}

impl FallbackChain {
    pub fn new(config: &FallbackConfig) -> Self {
        Self { configured: config.chain.clone(), include_cloud: config.include_cloud }
    }

    pub fn is_configured(&self) -> bool {
        !self.configured.is_empty()
    }

    /// Alternatives to try, in order, for a request preferring `preferred`.
    pub fn candidates(&self, preferred: &[ModelId], catalog: &[ModelDescriptor]) -> Vec<ModelId> {
        let skip: HashSet<&ModelId> = preferred.iter().collect();
        let known = |id: &ModelId| catalog.iter().find(|d| &d.id == id);

        if self.is_configured() {
            let entries: Vec<&ModelDescriptor> = self
                .configured
                .iter()
                .filter(|id| !skip.contains(id))
                .filter_map(|id| known(id))
                .collect();
            let local = entries.iter().filter(|d| d.local);
            let remote = entries.iter().filter(|d| !d.local && self.include_cloud);
            return local.chain(remote).map(|d| d.id.clone()).collect();
        }

        let reference = preferred.iter().filter_map(|id| known(id)).find(|d| d.local).map(|d| d.size_mb);

        let mut local: Vec<&ModelDescriptor> = catalog
            .iter()
            .filter(|d| d.local && !skip.contains(&d.id))
            .filter(|d| reference.map_or(true, |limit| d.size_mb < limit))
            .collect();
        match reference {
            Some(_) => local.sort_by(|a, b| {
                b.size_mb.cmp(&a.size_mb).then(a.tier.cmp(&b.tier)).then(a.id.cmp(&b.id))
            }),
            None => local.sort_by(|a, b| {
                a.size_mb.cmp(&b.size_mb).then(a.tier.cmp(&b.tier)).then(a.id.cmp(&b.id))
            }),
        }

        let mut remote: Vec<&ModelDescriptor> = if self.include_cloud {
            catalog.iter().filter(|d| !d.local && !skip.contains(&d.id)).collect()
        } else {
            Vec::new()
        };
        remote.sort_by(|a, b| a.tier.cmp(&b.tier).then(a.id.cmp(&b.id)));

        local.into_iter().chain(remote).map(|d| d.id.clone()).collect()
    }
}
