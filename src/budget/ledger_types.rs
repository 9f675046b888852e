// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Types and errors for the budget ledger.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a reservation can be refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BudgetError {
    /// The request can never fit, even with nothing else loaded.
    #[error("Request of {requested_mb} MB exceeds usable budget of {usable_mb} MB")]
    ExceedsCeiling { requested_mb: u64, usable_mb: u64 },

    /// Standing commitments leave too little room.
    #[error("Insufficient budget: requested {requested_mb} MB, {free_mb} MB free")]
    Insufficient { requested_mb: u64, free_mb: u64 },

    /// Room exists but a concurrent pending reservation has claimed it.
    #[error("Reservation conflict: requested {requested_mb} MB, {free_mb} MB free, {pending_mb} MB pending")]
    Conflict { requested_mb: u64, free_mb: u64, pending_mb: u64 },
}

/// Read-only view of ledger usage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub ceiling_mb: u64,
    pub safety_margin_mb: u64,
    pub usable_mb: u64,
    /// Standing commitments plus pending reservations.
    pub committed_mb: u64,
    pub reserved_mb: u64,
    pub free_mb: u64,
    pub peak_committed_mb: u64,
    pub commitments: BTreeMap<String, u64>,
}

impl LedgerSnapshot {
    pub fn utilization(&self) -> f64 {
        if self.usable_mb == 0 {
            return 0.0;
        }
        self.committed_mb as f64 / self.usable_mb as f64
    }

    pub fn within_budget(&self) -> bool {
        self.committed_mb <= self.usable_mb
    }
}
