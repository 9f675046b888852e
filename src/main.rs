// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! vram-broker entry point.
//!
//! Loads configuration, initialises logging and dispatches CLI commands.

mod cli_parser;
mod runtime_init;

use std::process::ExitCode;

use vram_broker::cli::{self, config_cmd, EXIT_CONFIG};
use vram_broker::logging::{self, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    logging::init(LogFormat::from_env());

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("serve");

    match command {
        "serve" | "" => run_serve().await,
        "help" | "--help" | "-h" => {
            if let Some(sub) = args.get(2) {
                cli_parser::print_command_help(sub);
            } else {
                cli_parser::print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("vram-broker {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        "status" => {
            let json = args.get(2).map(|s| s.as_str()) == Some("--json");
            with_broker(|broker| async move { cli::run_status(&broker, json).await }).await
        }
        "route" => run_route_cmd(&args[2..]).await,
        "config" => run_config_cmd(&args),
        _ => {
            eprintln!("Unknown command: {}", command);
            cli_parser::print_usage();
            ExitCode::FAILURE
        }
    }
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

async fn with_broker<F, Fut>(f: F) -> ExitCode
where
    F: FnOnce(vram_broker::Broker) -> Fut,
    Fut: std::future::Future<Output = i32>,
{
    match runtime_init::build_broker() {
        Ok(broker) => exit(f(broker).await),
        Err(e) => {
            eprintln!("Error: {}", e);
            exit(EXIT_CONFIG)
        }
    }
}

async fn run_serve() -> ExitCode {
    let broker = match runtime_init::build_broker() {
        Ok(broker) => broker,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit(EXIT_CONFIG);
        }
    };
    match runtime_init::run_serve(broker).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Server error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_route_cmd(args: &[String]) -> ExitCode {
    let route_args = match cli::parse_route_args(args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            cli_parser::print_command_help("route");
            return ExitCode::FAILURE;
        }
    };
    with_broker(|broker| async move { cli::run_route(&broker, &route_args).await }).await
}

fn run_config_cmd(args: &[String]) -> ExitCode {
    let sub = args.get(2).map(|s| s.as_str()).unwrap_or("show");
    match sub {
        "show" => exit(config_cmd::run_show()),
        "defaults" => exit(config_cmd::run_defaults()),
        "validate" => exit(config_cmd::run_validate()),
        _ => {
            eprintln!("Unknown config subcommand: {}", sub);
            cli_parser::print_command_help("config");
            ExitCode::FAILURE
        }
    }
}
