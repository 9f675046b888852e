// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Background health monitor and recovery scheduler.
//!
//! Both loops tick on a fixed interval until their cancellation token fires.
//! A tick that overruns its interval delays the next one rather than bursting.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::orchestrator::Orchestrator;

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Probe every provider each `period`. Unhealthy providers are excluded from
/// selection; a provider that passes again is re-admitted and re-synced.
pub fn spawn_health_monitor(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health monitor: shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let healthy = orchestrator.check_all_health().await;
                    debug!(
                        "health monitor: {}/{} providers healthy",
                        healthy,
                        orchestrator.registry().len()
                    );
                }
            }
        }
    })
}

/// Retry failed models whose cooldown has passed, each `period`.
pub fn spawn_recovery(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = ticker(period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("recovery scheduler: shutdown requested");
                    break;
                }
                _ = interval.tick() => {
                    let settled = orchestrator.recover_due().await;
                    if settled > 0 {
                        info!("recovery scheduler: settled {} failed models", settled);
                    }
                }
            }
        }
    })
}
