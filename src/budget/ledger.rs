// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Budget ledger: the single authority on committed memory.
//!
//! Capacity is claimed in two phases. A [`Reservation`] is taken before a load
//! begins and is either committed (becoming a standing commitment tied to the
//! model) or released. Dropping an unsettled reservation releases it, so a
//! cancelled caller cannot leak capacity.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use uuid::Uuid;

pub use super::ledger_types::*;
use crate::models::ModelId;

struct Pending {
    model_id: ModelId,
    mb: u64,
}

#[derive(Default)]
struct LedgerState {
    commitments: HashMap<ModelId, u64>,
    reservations: HashMap<Uuid, Pending>,
    standing_mb: u64,
    reserved_mb: u64,
    peak_mb: u64,
    releases: u64,
}

impl LedgerState {
    fn committed(&self) -> u64 {
        self.standing_mb + self.reserved_mb
    }

    fn note_peak(&mut self) {
        self.peak_mb = self.peak_mb.max(self.committed());
        metrics::gauge!("vram_broker_committed_mb").set(self.committed() as f64);
    }
}

/// Tracks committed memory against `ceiling - safety_margin`.
pub struct BudgetLedger {
    ceiling_mb: u64,
    safety_margin_mb: u64,
    state: Mutex<LedgerState>,
    released: Notify,
}

impl BudgetLedger {
    pub fn new(ceiling_mb: u64, safety_margin_mb: u64) -> Self {
        Self {
            ceiling_mb,
            safety_margin_mb,
            state: Mutex::new(LedgerState::default()),
            released: Notify::new(),
        }
    }

    pub fn ceiling_mb(&self) -> u64 {
        self.ceiling_mb
    }

    pub fn usable_mb(&self) -> u64 {
        self.ceiling_mb.saturating_sub(self.safety_margin_mb)
    }

    /// Standing commitments plus pending reservations.
    pub fn committed_mb(&self) -> u64 {
        self.state.lock().committed()
    }

    pub fn reserved_mb(&self) -> u64 {
        self.state.lock().reserved_mb
    }

    pub fn free_mb(&self) -> u64 {
        self.usable_mb().saturating_sub(self.committed_mb())
    }

    pub fn commitment(&self, model_id: &ModelId) -> Option<u64> {
        self.state.lock().commitments.get(model_id).copied()
    }

    pub fn is_within_budget(&self) -> bool {
        self.committed_mb() <= self.usable_mb()
    }

    /// Claim `mb` for `model_id` ahead of a load.
    pub fn try_reserve(
        self: &Arc<Self>,
        model_id: &ModelId,
        mb: u64,
    ) -> Result<Reservation, BudgetError> {
        let usable = self.usable_mb();
        if mb > usable {
            return Err(BudgetError::ExceedsCeiling { requested_mb: mb, usable_mb: usable });
        }

        let mut state = self.state.lock();
        let committed = state.committed();
        if committed + mb > usable {
            let free = usable.saturating_sub(committed);
            let without_pending = usable.saturating_sub(state.standing_mb);
            return Err(if mb <= without_pending {
                BudgetError::Conflict {
                    requested_mb: mb,
                    free_mb: free,
                    pending_mb: state.reserved_mb,
                }
            } else {
                BudgetError::Insufficient { requested_mb: mb, free_mb: free }
            });
        }

        let id = Uuid::new_v4();
        state.reservations.insert(id, Pending { model_id: model_id.clone(), mb });
        state.reserved_mb += mb;
        state.note_peak();

        Ok(Reservation {
            ledger: Arc::clone(self),
            id,
            model_id: model_id.clone(),
            mb,
            settled: false,
        })
    }

    fn settle(&self, id: Uuid, commit: bool) {
        let mut state = self.state.lock();
        let Some(pending) = state.reservations.remove(&id) else {
            return;
        };
        state.reserved_mb -= pending.mb;
        if commit {
            *state.commitments.entry(pending.model_id).or_insert(0) += pending.mb;
            state.standing_mb += pending.mb;
        }
        if !commit {
            state.releases += 1;
        }
        state.note_peak();
        drop(state);

        if !commit {
            self.released.notify_waiters();
        }
    }

    /// Release the standing commitment for a model after a confirmed unload.
    pub fn release_commitment(&self, model_id: &ModelId) -> u64 {
        let mut state = self.state.lock();
        let freed = state.commitments.remove(model_id).unwrap_or(0);
        state.standing_mb -= freed;
        if freed > 0 {
            state.releases += 1;
        }
        state.note_peak();
        drop(state);

        if freed > 0 {
            self.released.notify_waiters();
        }
        freed
    }

    /// Record a model loaded outside the scheduler's knowledge.
    ///
    /// Replaces any existing commitment for the id, so re-adopting never
    /// double-counts. The load already happened, so this cannot refuse;
    /// returns whether the ledger is still within budget.
    pub fn adopt(&self, model_id: &ModelId, mb: u64) -> bool {
        let mut state = self.state.lock();
        let previous = state.commitments.insert(model_id.clone(), mb).unwrap_or(0);
        state.standing_mb = state.standing_mb - previous + mb;
        state.note_peak();
        state.committed() <= self.usable_mb()
    }

    /// Count of releases so far. Read before checking capacity and hand it
    /// to [`wait_for_release`](Self::wait_for_release).
    pub fn release_epoch(&self) -> u64 {
        self.state.lock().releases
    }

    /// Wait until capacity is released after `since`, or `timeout` passes.
    ///
    /// Returns `true` at once if a release already landed since that epoch,
    /// otherwise `true` when woken by one.
    pub async fn wait_for_release(&self, since: u64, timeout: Duration) -> bool {
        let notified = self.released.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.release_epoch() != since {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.lock();
        let usable = self.usable_mb();
        LedgerSnapshot {
            ceiling_mb: self.ceiling_mb,
            safety_margin_mb: self.safety_margin_mb,
            usable_mb: usable,
            committed_mb: state.committed(),
            reserved_mb: state.reserved_mb,
            free_mb: usable.saturating_sub(state.committed()),
            peak_committed_mb: state.peak_mb,
            commitments: state
                .commitments
                .iter()
                .map(|(id, mb)| (id.to_string(), *mb))
                .collect(),
        }
    }
}

impl std::fmt::Debug for BudgetLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetLedger")
            .field("ceiling_mb", &self.ceiling_mb)
            .field("safety_margin_mb", &self.safety_margin_mb)
            .field("committed_mb", &self.committed_mb())
            .finish()
    }
}

/// Provisional claim on ledger capacity.
#[must_use = "dropping a reservation releases it"]
pub struct Reservation {
    ledger: Arc<BudgetLedger>,
    id: Uuid,
    model_id: ModelId,
    mb: u64,
    settled: bool,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    pub fn mb(&self) -> u64 {
        self.mb
    }

    /// Convert into a standing commitment for the model.
    pub fn commit(mut self) {
        self.ledger.settle(self.id, true);
        self.settled = true;
    }

    /// Give the capacity back.
    pub fn release(mut self) {
        self.ledger.settle(self.id, false);
        self.settled = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.settle(self.id, false);
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("id", &self.id)
            .field("model_id", &self.model_id)
            .field("mb", &self.mb)
            .finish()
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
