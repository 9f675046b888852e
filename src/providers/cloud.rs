// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Non-local provider used as the last stage of the fallback chain.
//!
//! Cloud models are configured statically, are always resident from the
//! scheduler's point of view and never touch the local budget.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use super::adapter::{
    Capability, CapabilitySet, DiscoveredModel, ProviderAdapter, ProviderError, ProviderKind,
};
use crate::config::ProviderConfig;

pub struct CloudProvider {
    models: Vec<String>,
    probe: Option<Url>,
    client: Client,
    timeout: Duration,
    api_key: Option<String>,
}

impl CloudProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let probe = if config.endpoint.is_empty() {
            None
        } else {
            let mut url = Url::parse(&config.endpoint).map_err(|e| {
                ProviderError::Unreachable(format!("invalid endpoint '{}': {}", config.endpoint, e))
            })?;
            url.path_segments_mut()
                .map_err(|_| ProviderError::Unreachable("endpoint cannot be a base".to_string()))?
                .pop_if_empty()
                .push("models");
            Some(url)
        };
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            models: config.models.clone(),
            probe,
            client,
            timeout: config.timeout(),
            api_key: config.api_key(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for CloudProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Cloud
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty().with(Capability::Discover).with(Capability::Infer)
    }

    async fn discover(&self) -> Result<Vec<DiscoveredModel>, ProviderError> {
        Ok(self.models.iter().map(|m| DiscoveredModel::new(m.clone(), Some(0))).collect())
    }

    async fn currently_loaded(&self) -> Result<Vec<String>, ProviderError> {
        Ok(self.models.clone())
    }

    async fn load(&self, _model: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn unload(&self, _model: &str) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        let Some(url) = &self.probe else {
            return Ok(());
        };
        debug!("cloud: probing {}", url);

        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::Unreachable(e.to_string())
            }
        })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProviderError::Rejected {
                status: response.status().as_u16(),
                message: "health probe failed".to_string(),
            })
        }
    }
}
