// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! VRAM Broker: resource-aware model scheduler for local inference backends.
//!
//! Coordinates several independently running backends under one hard memory
//! budget. The broker tracks what is loaded where, reserves capacity before
//! every load, evicts by priority tier then recency when room is short,
//! serializes transitions per model, and falls back to smaller local or cloud
//! models when a preference cannot be served.
//!
//! ```no_run
//! # async fn demo() -> Result<(), vram_broker::SchedulerError> {
//! use vram_broker::{Broker, TaskRequest};
//!
//! let broker = Broker::from_config(vram_broker::config::load()?)?;
//! broker.sync().await;
//! let background = broker.start_background();
//!
//! let handle = broker
//!     .route(&TaskRequest::for_role("coder").with_models(["ollama/qwen2.5-coder:7b"]))
//!     .await?;
//! println!("dispatch to {} at {}", handle.model_id(), handle.endpoint());
//!
//! drop(handle);
//! background.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod budget;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod providers;
pub mod scheduler;

pub use broker::{BackgroundTasks, Broker};
pub use budget::{BudgetError, BudgetLedger, LedgerSnapshot, Reservation};
pub use config::{AgentProfile, BrokerConfig, ConfigError};
pub use error::SchedulerError;
pub use models::{ModelDescriptor, ModelHandle, ModelId, ModelState, PriorityTier};
pub use providers::{MockProvider, ProviderAdapter, ProviderError, ProviderKind, ProviderRegistry};
pub use scheduler::{BrokerSnapshot, RouteOutcome, RoutePath, SchedulerEvent, TaskRequest};
