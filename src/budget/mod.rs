// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Memory budget accounting.

pub mod ledger;
mod ledger_types;

pub use ledger::{BudgetLedger, Reservation};
pub use ledger_types::{BudgetError, LedgerSnapshot};
