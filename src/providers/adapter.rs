// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Provider capability contract.
//!
//! Every backend family (LM Studio, Ollama, CPU-mode servers, cloud APIs)
//! implements [`ProviderAdapter`]. The scheduler never branches on the family;
//! it only consults the adapter's [`CapabilitySet`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Backend family, selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    LmStudio,
    Ollama,
    CpuServer,
    Cloud,
    Mock,
}

impl ProviderKind {
    /// Whether models of this family consume the local memory budget.
    pub fn is_local(&self) -> bool {
        !matches!(self, ProviderKind::Cloud)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::LmStudio => "lm_studio",
            ProviderKind::Ollama => "ollama",
            ProviderKind::CpuServer => "cpu_server",
            ProviderKind::Cloud => "cloud",
            ProviderKind::Mock => "mock",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operation a provider may support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Discover,
    Load,
    Unload,
    Infer,
}

impl Capability {
    const fn bit(self) -> u8 {
        match self {
            Capability::Discover => 1,
            Capability::Load => 1 << 1,
            Capability::Unload => 1 << 2,
            Capability::Infer => 1 << 3,
        }
    }
}

/// Subset of {discover, load, unload, infer}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const ALL: CapabilitySet = CapabilitySet(0b1111);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub const fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        [Capability::Discover, Capability::Load, Capability::Unload, Capability::Infer]
            .into_iter()
            .filter(move |c| self.contains(*c))
    }
}

impl Serialize for CapabilitySet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

/// A model as reported by a provider's discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModel {
    /// Provider-native name.
    pub name: String,
    /// Size from provider metadata, when it reports one.
    pub size_mb: Option<u64>,
}

impl DiscoveredModel {
    pub fn new(name: impl Into<String>, size_mb: Option<u64>) -> Self {
        Self { name: name.into(), size_mb }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Capability not supported: {0:?}")]
    Unsupported(Capability),

    #[error("Provider reported failure: {0}")]
    Failed(String),
}

impl ProviderError {
    /// Recoverable by retrying the same call.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::Unreachable(_)
                | ProviderError::Timeout(_)
                | ProviderError::Rejected { .. }
                | ProviderError::Failed(_)
        )
    }

    /// Indicates the provider itself is unhealthy rather than the model.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, ProviderError::Unreachable(_) | ProviderError::Timeout(_))
    }
}

/// Uniform capability interface over one backend.
///
/// Implementations take provider-native model names; qualification with the
/// provider name happens in the catalog.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn capabilities(&self) -> CapabilitySet;

    /// List every model the backend can serve.
    async fn discover(&self) -> Result<Vec<DiscoveredModel>, ProviderError>;

    /// Names of models currently resident in the backend.
    async fn currently_loaded(&self) -> Result<Vec<String>, ProviderError>;

    async fn load(&self, model: &str) -> Result<(), ProviderError>;

    async fn unload(&self, model: &str) -> Result<(), ProviderError>;

    async fn health_check(&self) -> Result<(), ProviderError>;
}
