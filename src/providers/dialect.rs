// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Wire dialects for HTTP-speaking backend families.
//!
//! A dialect maps each capability to a route and parses the family's JSON
//! shapes. The transport lives in [`super::http`].

use serde_json::{json, Value};

use super::adapter::{DiscoveredModel, ProviderError, ProviderKind};

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One HTTP call relative to the provider endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub method: Method,
    pub segments: Vec<String>,
    pub body: Option<Value>,
}

impl Route {
    fn get(segments: &[&str]) -> Self {
        Self {
            method: Method::Get,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            body: None,
        }
    }

    fn post(segments: &[&str], body: Option<Value>) -> Self {
        Self {
            method: Method::Post,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            body,
        }
    }

    pub fn path(&self) -> String {
        format!("/{}", self.segments.join("/"))
    }
}

/// Backend family wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// `/models`, `/models/loaded`, `/models/{id}/load|unload`, `/health`.
    Generic,
    /// `/api/tags`, `/api/ps`, residency driven through `keep_alive`.
    Ollama,
    /// `/api/v0/models` with per-model `state`.
    LmStudio,
}

impl Dialect {
    pub fn for_kind(kind: ProviderKind) -> Option<Self> {
        match kind {
            ProviderKind::CpuServer => Some(Dialect::Generic),
            ProviderKind::Ollama => Some(Dialect::Ollama),
            ProviderKind::LmStudio => Some(Dialect::LmStudio),
            ProviderKind::Cloud | ProviderKind::Mock => None,
        }
    }

    pub fn discover(&self) -> Route {
        match self {
            Dialect::Generic => Route::get(&["models"]),
            Dialect::Ollama => Route::get(&["api", "tags"]),
            Dialect::LmStudio => Route::get(&["api", "v0", "models"]),
        }
    }

    pub fn loaded(&self) -> Route {
        match self {
            Dialect::Generic => Route::get(&["models", "loaded"]),
            Dialect::Ollama => Route::get(&["api", "ps"]),
            Dialect::LmStudio => Route::get(&["api", "v0", "models"]),
        }
    }

    pub fn load(&self, model: &str) -> Route {
        match self {
            Dialect::Generic => Route::post(&["models", model, "load"], None),
            Dialect::Ollama => Route::post(
                &["api", "generate"],
                Some(json!({ "model": model, "keep_alive": -1 })),
            ),
            Dialect::LmStudio => Route::post(
                &["api", "v1", "models", "load"],
                Some(json!({ "model": model })),
            ),
        }
    }

    pub fn unload(&self, model: &str) -> Route {
        match self {
            Dialect::Generic => Route::post(&["models", model, "unload"], None),
            Dialect::Ollama => Route::post(
                &["api", "generate"],
                Some(json!({ "model": model, "keep_alive": 0 })),
            ),
            Dialect::LmStudio => Route::post(
                &["api", "v1", "models", "unload"],
                Some(json!({ "instance_id": model })),
            ),
        }
    }

    pub fn health(&self) -> Route {
        match self {
            Dialect::Generic => Route::get(&["health"]),
            Dialect::Ollama => Route::get(&["api", "version"]),
            Dialect::LmStudio => Route::get(&["v1", "models"]),
        }
    }

    pub fn parse_discovered(&self, body: &Value) -> Result<Vec<DiscoveredModel>, ProviderError> {
        let entries = model_entries(body)?;
        Ok(entries
            .iter()
            .filter_map(|e| entry_name(e).map(|name| DiscoveredModel::new(name, entry_size_mb(e))))
            .collect())
    }

    pub fn parse_loaded(&self, body: &Value) -> Result<Vec<String>, ProviderError> {
        let entries = model_entries(body)?;
        let names = entries.iter().filter(|e| match self {
            Dialect::LmStudio => e.get("state").and_then(Value::as_str) == Some("loaded"),
            Dialect::Generic | Dialect::Ollama => true,
        });
        Ok(names.filter_map(entry_name).collect())
    }
}

/// Accepts a bare array, `{"models": [...]}` or `{"data": [...]}`.
fn model_entries(body: &Value) -> Result<&Vec<Value>, ProviderError> {
    if let Some(list) = body.as_array() {
        return Ok(list);
    }
    ["models", "data"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_array))
        .ok_or_else(|| ProviderError::InvalidResponse("expected a model list".to_string()))
}

fn entry_name(entry: &Value) -> Option<String> {
    if let Some(name) = entry.as_str() {
        return Some(name.to_string());
    }
    ["id", "name", "model"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn entry_size_mb(entry: &Value) -> Option<u64> {
    if let Some(mb) = entry.get("size_mb").and_then(Value::as_u64) {
        return Some(mb);
    }
    ["size_vram", "size_bytes", "size"]
        .iter()
        .find_map(|key| entry.get(*key).and_then(Value::as_u64))
        .filter(|bytes| *bytes > 0)
        .map(|bytes| bytes.div_ceil(BYTES_PER_MB))
}

#[cfg(test)]
#[path = "dialect_tests.rs"]
mod tests;
