// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! HTTP transport shared by the local backend families.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

use super::adapter::{
    CapabilitySet, DiscoveredModel, ProviderAdapter, ProviderError, ProviderKind,
};
use super::dialect::{Dialect, Method, Route};
use crate::config::ProviderConfig;

/// Longest error body kept in a `Rejected` message.
const MAX_ERROR_BODY: usize = 512;

/// Adapter for LM Studio, Ollama and CPU-mode servers.
pub struct HttpProvider {
    kind: ProviderKind,
    dialect: Dialect,
    base: Url,
    client: Client,
    timeout: Duration,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let dialect = Dialect::for_kind(config.kind).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("{} is not an HTTP backend family", config.kind))
        })?;
        let base = Url::parse(&config.endpoint).map_err(|e| {
            ProviderError::Unreachable(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ProviderError::Unreachable(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            kind: config.kind,
            dialect,
            base,
            client,
            timeout: config.timeout(),
            api_key: config.api_key(),
        })
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn url_for(&self, route: &Route) -> Result<Url, ProviderError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Unreachable(format!("endpoint {} cannot be a base", self.base)))?
            .pop_if_empty()
            .extend(route.segments.iter());
        Ok(url)
    }

    /// Execute a route. `model` marks calls where 404 means the model is unknown.
    async fn send(&self, route: Route, model: Option<&str>) -> Result<Option<Value>, ProviderError> {
        let url = self.url_for(&route)?;
        debug!("{}: {:?} {}", self.kind, route.method, url);

        let mut request = match route.method {
            Method::Get => self.client.get(url),
            Method::Post => self.client.post(url),
        };
        if let Some(body) = &route.body {
            request = request.json(body);
        }
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            if let Some(name) = model {
                return Err(ProviderError::ModelNotFound(name.to_string()));
            }
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message: String = body.chars().take(MAX_ERROR_BODY).collect();
            return Err(ProviderError::Rejected { status: status.as_u16(), message });
        }

        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        // Ollama's /api/generate streams NDJSON; only the status matters there.
        match serde_json::from_slice(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(_) if model.is_some() => Ok(None),
            Err(e) => Err(ProviderError::InvalidResponse(e.to_string())),
        }
    }

    async fn fetch(&self, route: Route) -> Result<Value, ProviderError> {
        self.send(route, None)
            .await?
            .ok_or_else(|| ProviderError::InvalidResponse("empty body".to_string()))
    }

    fn classify(&self, err: reqwest::Error) -> ProviderError {
        if err.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::ALL
    }

    async fn discover(&self) -> Result<Vec<DiscoveredModel>, ProviderError> {
        let body = self.fetch(self.dialect.discover()).await?;
        self.dialect.parse_discovered(&body)
    }

    async fn currently_loaded(&self) -> Result<Vec<String>, ProviderError> {
        let body = self.fetch(self.dialect.loaded()).await?;
        self.dialect.parse_loaded(&body)
    }

    async fn load(&self, model: &str) -> Result<(), ProviderError> {
        self.send(self.dialect.load(model), Some(model)).await.map(|_| ())
    }

    async fn unload(&self, model: &str) -> Result<(), ProviderError> {
        self.send(self.dialect.unload(model), Some(model)).await.map(|_| ())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        self.send(self.dialect.health(), None).await.map(|_| ())
    }
}
