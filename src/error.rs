// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Top-level scheduler error taxonomy.

use thiserror::Error;

use crate::budget::BudgetError;
use crate::config::ConfigError;
use crate::models::ModelId;
use crate::providers::ProviderError;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Provider unreachable: {provider}: {reason}")]
    ProviderUnreachable { provider: String, reason: String },

    #[error("Model load failed: {model}: {reason}")]
    ModelLoadFailed { model: ModelId, reason: String },

    #[error("Model unload failed: {model}: {reason}")]
    ModelUnloadFailed { model: ModelId, reason: String },

    #[error("Budget reservation conflict for {model} ({requested_mb} MB)")]
    BudgetReservationConflict { model: ModelId, requested_mb: u64 },

    #[error("No capacity available for role '{role}': {detail}")]
    NoCapacityAvailable { role: String, detail: String },

    #[error("Routing deadline exceeded")]
    Timeout,

    #[error("Unknown model: {0}")]
    UnknownModel(ModelId),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Model unavailable: {model}: {reason}")]
    ModelUnavailable { model: ModelId, reason: String },

    #[error("Transition task aborted: {0}")]
    TransitionAborted(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl SchedulerError {
    /// Errors that are surfaced to callers rather than recovered locally.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SchedulerError::NoCapacityAvailable { .. }
                | SchedulerError::Config(_)
                | SchedulerError::Timeout
        )
    }

    pub(crate) fn from_provider(provider: &str, model: &ModelId, err: ProviderError, loading: bool) -> Self {
        if err.is_connectivity() {
            return SchedulerError::ProviderUnreachable {
                provider: provider.to_string(),
                reason: err.to_string(),
            };
        }
        if loading {
            SchedulerError::ModelLoadFailed { model: model.clone(), reason: err.to_string() }
        } else {
            SchedulerError::ModelUnloadFailed { model: model.clone(), reason: err.to_string() }
        }
    }

    pub(crate) fn from_budget(model: &ModelId, err: BudgetError) -> Self {
        match err {
            BudgetError::ExceedsCeiling { requested_mb, usable_mb } => {
                SchedulerError::NoCapacityAvailable {
                    role: String::new(),
                    detail: format!(
                        "{} needs {} MB, usable budget is {} MB",
                        model, requested_mb, usable_mb
                    ),
                }
            }
            BudgetError::Insufficient { requested_mb, .. }
            | BudgetError::Conflict { requested_mb, .. } => {
                SchedulerError::BudgetReservationConflict { model: model.clone(), requested_mb }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_map_to_unreachable() {
        let model = ModelId::from("ollama/llama3");
        let err = SchedulerError::from_provider(
            "ollama",
            &model,
            ProviderError::Unreachable("connection refused".into()),
            true,
        );
        assert!(matches!(err, SchedulerError::ProviderUnreachable { .. }));
    }

    #[test]
    fn provider_failures_map_by_direction() {
        let model = ModelId::from("ollama/llama3");
        let load = SchedulerError::from_provider(
            "ollama",
            &model,
            ProviderError::Failed("out of memory".into()),
            true,
        );
        assert!(matches!(load, SchedulerError::ModelLoadFailed { .. }));

        let unload = SchedulerError::from_provider(
            "ollama",
            &model,
            ProviderError::Failed("busy".into()),
            false,
        );
        assert!(matches!(unload, SchedulerError::ModelUnloadFailed { .. }));
    }

    #[test]
    fn budget_races_become_conflicts() {
        let model = ModelId::from("p/m");
        let err = SchedulerError::from_budget(
            &model,
            BudgetError::Conflict { requested_mb: 100, free_mb: 50, pending_mb: 200 },
        );
        assert!(matches!(err, SchedulerError::BudgetReservationConflict { requested_mb: 100, .. }));
        assert!(!err.is_terminal());
    }

    #[test]
    fn oversize_request_is_terminal() {
        let model = ModelId::from("p/m");
        let err = SchedulerError::from_budget(
            &model,
            BudgetError::ExceedsCeiling { requested_mb: 9000, usable_mb: 7488 },
        );
        assert!(err.is_terminal());
        assert_eq!(
            err.to_string(),
            "No capacity available for role '': p/m needs 9000 MB, usable budget is 7488 MB"
        );
    }
}
