// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Handles returned to callers for a ready model.

use std::sync::Arc;

use chrono::Utc;

use super::catalog::ModelSlot;
use super::descriptor::{ModelId, ModelState};

/// Keeps a model's in-flight count raised while any clone of its handle lives.
pub struct Lease {
    slot: Arc<ModelSlot>,
}

impl Lease {
    /// Take a lease if the model is currently `Loaded`.
    pub(crate) fn acquire(slot: &Arc<ModelSlot>) -> Option<Arc<Lease>> {
        slot.with_descriptor(|d| {
            if d.state != ModelState::Loaded {
                return None;
            }
            d.in_flight += 1;
            d.last_used_at = Some(Utc::now());
            Some(Arc::new(Lease { slot: Arc::clone(slot) }))
        })
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.slot.with_descriptor(|d| d.in_flight = d.in_flight.saturating_sub(1));
    }
}

/// Ready-to-use reference to a loaded model.
///
/// Handles to the same loaded instance compare equal. A live handle pins the
/// model against eviction.
#[derive(Clone)]
pub struct ModelHandle {
    model_id: ModelId,
    provider: String,
    endpoint: String,
    generation: u64,
    local: bool,
    lease: Arc<Lease>,
}

impl ModelHandle {
    /// Bind a handle to a loaded model. `None` when the model is not `Loaded`.
    pub(crate) fn checkout(slot: &Arc<ModelSlot>, endpoint: &str) -> Option<Self> {
        let lease = Lease::acquire(slot)?;
        let descriptor = slot.descriptor();
        Some(Self {
            model_id: descriptor.id,
            provider: descriptor.provider,
            endpoint: endpoint.to_string(),
            generation: descriptor.generation,
            local: descriptor.local,
            lease,
        })
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Provider endpoint to send inference traffic to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Identity of the loaded instance; changes on every reload.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Whether both handles share one lease (one routing decision).
    pub fn shares_lease(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.lease, &other.lease)
    }
}

impl PartialEq for ModelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.model_id == other.model_id && self.generation == other.generation
    }
}

impl Eq for ModelHandle {}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model_id", &self.model_id)
            .field("provider", &self.provider)
            .field("generation", &self.generation)
            .field("local", &self.local)
            .finish()
    }
}
