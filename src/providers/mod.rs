// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Provider adapters and the registry that owns them.

pub mod adapter;
pub mod cloud;
pub mod dialect;
pub mod http;
pub mod mock;
pub mod registry;

use std::sync::Arc;

pub use adapter::{
    Capability, CapabilitySet, DiscoveredModel, ProviderAdapter, ProviderError, ProviderKind,
};
pub use cloud::CloudProvider;
pub use http::HttpProvider;
pub use mock::MockProvider;
pub use registry::{ProviderEntry, ProviderRegistry, ProviderStatus};

use crate::config::ProviderConfig;

/// Construct the adapter for a configured provider.
pub fn build_adapter(config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(match config.kind {
        ProviderKind::LmStudio | ProviderKind::Ollama | ProviderKind::CpuServer => {
            Arc::new(HttpProvider::new(config)?)
        }
        ProviderKind::Cloud => Arc::new(CloudProvider::new(config)?),
        ProviderKind::Mock => Arc::new(MockProvider::new()),
    })
}
