// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Broker configuration.
//!
//! Loaded from a TOML file (path from `VRAM_BROKER_CONFIG`, falling back to
//! `vram-broker.toml` in the working directory) with environment overrides for
//! the budget. Consumed read-only by every other component.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ModelId, PriorityTier};
use crate::providers::ProviderKind;
use crate::scheduler::RetryPolicy;

pub const CONFIG_PATH_ENV: &str = "VRAM_BROKER_CONFIG";
pub const CEILING_ENV: &str = "VRAM_BROKER_CEILING_MB";
pub const MARGIN_ENV: &str = "VRAM_BROKER_SAFETY_MARGIN_MB";
pub const DEFAULT_CONFIG_PATH: &str = "vram-broker.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid environment override {name}={value}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown agent role: {0}")]
    UnknownRole(String),
}

/// Complete broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub budget: BudgetConfig,
    pub scheduler: SchedulerConfig,
    pub providers: Vec<ProviderConfig>,
    pub models: Vec<ModelOverride>,
    pub roles: BTreeMap<String, AgentProfile>,
    pub fallback: FallbackConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub ceiling_mb: u64,
    pub safety_margin_mb: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { ceiling_mb: 8000, safety_margin_mb: 512 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Consecutive failures tolerated before a failed model is held out of
    /// selection for a cooldown.
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
    /// Recovery attempts before a model is quarantined.
    pub max_recovery_attempts: u32,
    /// Attempts per candidate when reservations race.
    pub reservation_attempts: u32,
    pub conflict_wait_ms: u64,
    pub event_capacity: usize,
    pub health_interval_ms: u64,
    pub recovery_interval_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            cooldown_ms: 30_000,
            max_recovery_attempts: 5,
            reservation_attempts: 4,
            conflict_wait_ms: 250,
            event_capacity: 256,
            health_interval_ms: 10_000,
            recovery_interval_ms: 5_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn conflict_wait(&self) -> Duration {
        Duration::from_millis(self.conflict_wait_ms)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }
}

fn default_tier() -> PriorityTier {
    PriorityTier::STANDARD
}

fn default_max_concurrent_loads() -> usize {
    1
}

fn default_timeout_ms() -> u64 {
    120_000
}

fn default_model_mb() -> u64 {
    4096
}

/// One backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub endpoint: String,
    /// Tier given to this provider's models unless overridden per model.
    #[serde(default = "default_tier")]
    pub priority_tier: PriorityTier,
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Size assumed when provider metadata carries none.
    #[serde(default = "default_model_mb")]
    pub default_model_mb: u64,
    /// Environment variable holding a bearer token.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Statically served models (cloud providers).
    #[serde(default)]
    pub models: Vec<String>,
}

impl ProviderConfig {
    pub fn new(name: &str, kind: ProviderKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            endpoint: String::new(),
            priority_tier: default_tier(),
            max_concurrent_loads: default_max_concurrent_loads(),
            timeout_ms: default_timeout_ms(),
            default_model_mb: default_model_mb(),
            api_key_env: None,
            models: Vec::new(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = endpoint.to_string();
        self
    }

    pub fn with_tier(mut self, tier: PriorityTier) -> Self {
        self.priority_tier = tier;
        self
    }

    pub fn with_max_concurrent_loads(mut self, n: usize) -> Self {
        self.max_concurrent_loads = n;
        self
    }

    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    pub fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bearer token resolved from `api_key_env`, if configured and set.
    pub fn api_key(&self) -> Option<String> {
        self.api_key_env.as_ref().and_then(|var| std::env::var(var).ok())
    }
}

/// Per-model overrides applied on every discovery merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelOverride {
    pub id: ModelId,
    #[serde(default)]
    pub size_mb: Option<u64>,
    #[serde(default)]
    pub priority_tier: Option<PriorityTier>,
    #[serde(default)]
    pub pinned: bool,
}

/// Generation parameters carried by an agent profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationParams {
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Role → ordered model preferences.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentProfile {
    pub models: Vec<ModelId>,
    #[serde(default)]
    pub generation: GenerationParams,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Explicit ordered chain. When empty, the chain is derived from the catalog.
    pub chain: Vec<ModelId>,
    pub include_cloud: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self { chain: Vec::new(), include_cloud: true }
    }
}

impl BrokerConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Apply `VRAM_BROKER_CEILING_MB` / `VRAM_BROKER_SAFETY_MARGIN_MB`.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(v) = env_u64(CEILING_ENV)? {
            self.budget.ceiling_mb = v;
        }
        if let Some(v) = env_u64(MARGIN_ENV)? {
            self.budget.safety_margin_mb = v;
        }
        Ok(())
    }

    pub fn profile(&self, role: &str) -> Option<&AgentProfile> {
        self.roles.get(role)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| -> Result<(), ConfigError> { Err(ConfigError::Invalid(msg)) };

        if self.budget.ceiling_mb == 0 {
            return invalid("budget.ceiling_mb must be positive".into());
        }
        if self.budget.safety_margin_mb >= self.budget.ceiling_mb {
            return invalid(format!(
                "budget.safety_margin_mb ({}) must be below ceiling_mb ({})",
                self.budget.safety_margin_mb, self.budget.ceiling_mb
            ));
        }
        if self.scheduler.retry.max_attempts == 0 {
            return invalid("scheduler.retry.max_attempts must be at least 1".into());
        }
        if self.scheduler.reservation_attempts == 0 || self.scheduler.event_capacity == 0 {
            return invalid("scheduler.reservation_attempts and event_capacity must be positive".into());
        }

        let mut names = HashSet::new();
        for p in &self.providers {
            if p.name.is_empty() || p.name.contains('/') {
                return invalid(format!("provider name '{}' must be non-empty without '/'", p.name));
            }
            if !names.insert(p.name.as_str()) {
                return invalid(format!("duplicate provider '{}'", p.name));
            }
            if p.max_concurrent_loads == 0 {
                return invalid(format!("provider '{}': max_concurrent_loads must be positive", p.name));
            }
            if p.timeout_ms == 0 {
                return invalid(format!("provider '{}': timeout_ms must be positive", p.name));
            }
            let needs_endpoint = !matches!(p.kind, ProviderKind::Mock | ProviderKind::Cloud);
            if needs_endpoint && p.endpoint.is_empty() {
                return invalid(format!("provider '{}': endpoint is required", p.name));
            }
        }

        let check_id = |id: &ModelId, context: &str| -> Result<(), ConfigError> {
            if !id.is_qualified() {
                return Err(ConfigError::Invalid(format!(
                    "{}: model id '{}' must be provider-qualified",
                    context, id
                )));
            }
            if !names.contains(id.provider()) {
                return Err(ConfigError::Invalid(format!(
                    "{}: unknown provider '{}' in '{}'",
                    context,
                    id.provider(),
                    id
                )));
            }
            Ok(())
        };

        for o in &self.models {
            check_id(&o.id, "models")?;
        }
        for (role, profile) in &self.roles {
            if profile.models.is_empty() {
                return invalid(format!("role '{}' lists no models", role));
            }
            for id in &profile.models {
                check_id(id, &format!("roles.{}", role))?;
            }
        }
        for id in &self.fallback.chain {
            check_id(id, "fallback.chain")?;
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value }),
        Err(_) => Ok(None),
    }
}

/// Resolve the config path from the environment.
pub fn config_path() -> PathBuf {
    std::env::var(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load, override and validate configuration.
///
/// A missing file at the default path yields defaults; a missing file named
/// explicitly through the environment is an error.
pub fn load() -> Result<BrokerConfig, ConfigError> {
    let path = config_path();
    let explicit = std::env::var(CONFIG_PATH_ENV).is_ok();
    let mut config = if explicit || path.exists() {
        BrokerConfig::from_path(&path)?
    } else {
        BrokerConfig::default()
    };
    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
