// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! `config` subcommands.

use super::EXIT_CONFIG;
use crate::config::{self, BrokerConfig};

/// Print the effective configuration (file plus environment overrides).
pub fn run_show() -> i32 {
    match config::load().and_then(|c| c.to_toml_string()) {
        Ok(toml) => {
            println!("# source: {}", config::config_path().display());
            print!("{}", toml);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_CONFIG
        }
    }
}

pub fn run_defaults() -> i32 {
    match BrokerConfig::default().to_toml_string() {
        Ok(toml) => {
            print!("{}", toml);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

pub fn run_validate() -> i32 {
    match config::load() {
        Ok(c) => {
            println!("{}", summary(&c));
            0
        }
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            EXIT_CONFIG
        }
    }
}

pub fn summary(config: &BrokerConfig) -> String {
    format!(
        "Configuration valid: {} providers, {} model overrides, {} roles, {} MB usable of {} MB",
        config.providers.len(),
        config.models.len(),
        config.roles.len(),
        config.budget.ceiling_mb.saturating_sub(config.budget.safety_margin_mb),
        config.budget.ceiling_mb
    )
}
