// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Command implementations behind the `vram-broker` binary.

pub mod config_cmd;
pub mod route_cmd;
pub mod status;
pub mod status_format;

pub use route_cmd::{parse_route_args, run_route, RouteArgs};
pub use status::{run_status, HealthState, StatusReport};

/// Exit code for configuration errors.
pub const EXIT_CONFIG: i32 = 2;
