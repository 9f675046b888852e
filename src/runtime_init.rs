// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Broker initialization and the serve loop.

use tracing::{info, warn};

use vram_broker::config as broker_config;
use vram_broker::{Broker, SchedulerError};

/// Load configuration from file and environment and assemble the broker.
pub fn build_broker() -> Result<Broker, SchedulerError> {
    let config = broker_config::load()?;
    Broker::from_config(config)
}

/// Sync every provider, run background loops until Ctrl-C, then drain.
pub async fn run_serve(broker: Broker) -> Result<(), Box<dyn std::error::Error>> {
    for result in broker.sync().await {
        match result {
            Ok(report) => info!(
                "startup sync {}: {} discovered, {} adopted",
                report.provider,
                report.discovered,
                report.adopted.len()
            ),
            Err(e) => warn!("startup sync failed: {}", e),
        }
    }

    let background = broker.start_background();
    let ledger = broker.ledger().snapshot();
    info!(
        "broker ready: {} MB committed of {} MB usable",
        ledger.committed_mb, ledger.usable_mb
    );

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutdown signal received, stopping background tasks...");

    background.shutdown().await;
    eprintln!("Shutdown complete");
    Ok(())
}
