// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model descriptors, the catalog that owns them, and caller handles.

pub mod catalog;
pub mod descriptor;
pub mod handle;

pub use catalog::{MergeOutcome, ModelCatalog, ModelSlot};
pub use descriptor::{ModelDescriptor, ModelId, ModelState, PriorityTier};
pub use handle::ModelHandle;
