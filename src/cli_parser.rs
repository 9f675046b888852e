// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI help text for vram-broker.

/// Print general usage information.
pub fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "vram-broker - Resource-aware model scheduler v{}

USAGE:
    vram-broker [COMMAND] [OPTIONS]

COMMANDS:
    serve        Sync providers and run health/recovery loops (default)
    status       Sync once and show budget, providers and models
    route        Make one routing decision for a role
    config       Manage configuration (validate, show, defaults)
    version      Show version information
    help         Show this help message

OPTIONS:
    -h, --help     Show help for command
    -V, --version  Show version information

EXAMPLES:
    vram-broker                                   # Run the broker (default)
    vram-broker status --json                     # Snapshot as JSON
    vram-broker route --role coder --model ollama/qwen2.5-coder:7b
    vram-broker config validate                   # Validate configuration

ENVIRONMENT:
    VRAM_BROKER_CONFIG             Config file path (default: vram-broker.toml)
    VRAM_BROKER_CEILING_MB         Override budget.ceiling_mb
    VRAM_BROKER_SAFETY_MARGIN_MB   Override budget.safety_margin_mb
    VRAM_BROKER_LOG_FORMAT         Log format (text, json)
    RUST_LOG                       Log level (debug, info, warn, error)

EXIT CODES:
    0  Success / Healthy
    1  Failure / Unhealthy
    2  Configuration error
    3  Provider error
",
        version
    );
}

/// Print detailed help for a specific command.
pub fn print_command_help(command: &str) {
    match command {
        "serve" => print_serve_help(),
        "status" => print_status_help(),
        "route" => print_route_help(),
        "config" => print_config_help(),
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'vram-broker help' for general usage.",
                command
            );
        }
    }
}

fn print_serve_help() {
    eprintln!(
        "vram-broker serve - Run the broker

USAGE:
    vram-broker serve

DESCRIPTION:
    Discovers every configured provider, adopts models already resident,
    then polls provider health and retries failed models until Ctrl-C.
    Default command when none is specified.
"
    );
}

fn print_status_help() {
    eprintln!(
        "vram-broker status - Show broker status

USAGE:
    vram-broker status [OPTIONS]

OPTIONS:
    --json         Output in JSON format

EXIT CODES:
    0  Healthy or degraded
    1  No provider reachable
    2  Configuration error
"
    );
}

fn print_route_help() {
    eprintln!(
        "vram-broker route - Route one request

USAGE:
    vram-broker route --role <ROLE> [OPTIONS]

OPTIONS:
    --role <ROLE>          Agent role; its profile supplies preferences
    --model <ID>           Preferred model (repeatable, in order)
    --complexity <X>       Task complexity score
    --timeout-ms <MS>      Routing deadline
    --json                 Output in JSON format

EXIT CODES:
    0  Routed
    1  No capacity available
    2  Configuration error
    3  Provider error

EXAMPLES:
    vram-broker route --role coder
    vram-broker route --role chat --model lms/phi-3 --model ollama/llama3:8b
"
    );
}

fn print_config_help() {
    eprintln!(
        "vram-broker config - Manage configuration

USAGE:
    vram-broker config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    validate       Validate configuration file
    defaults       Show default configuration
"
    );
}
