// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! `route` command: one routing decision against live providers.

use std::time::Duration;

use serde_json::json;

use crate::broker::Broker;
use crate::models::ModelId;
use crate::scheduler::TaskRequest;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteArgs {
    pub role: String,
    pub models: Vec<ModelId>,
    pub complexity: f32,
    pub timeout: Option<Duration>,
    pub json: bool,
}

impl RouteArgs {
    pub fn to_request(&self) -> TaskRequest {
        let request = TaskRequest::for_role(&self.role)
            .with_models(self.models.iter().cloned())
            .with_complexity(self.complexity);
        match self.timeout {
            Some(timeout) => request.with_timeout(timeout),
            None => request,
        }
    }
}

/// Parse the arguments following `route`.
pub fn parse_route_args(args: &[String]) -> Result<RouteArgs, String> {
    let mut parsed = RouteArgs::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--json" {
            parsed.json = true;
            i += 1;
            continue;
        }
        let value = args.get(i + 1).ok_or_else(|| format!("Missing value for {}", flag))?;
        match flag {
            "--role" => parsed.role = value.clone(),
            "--model" => parsed.models.push(ModelId::from(value.as_str())),
            "--complexity" => {
                parsed.complexity =
                    value.parse().map_err(|_| format!("Invalid --complexity: {}", value))?;
            }
            "--timeout-ms" => {
                let ms: u64 = value.parse().map_err(|_| format!("Invalid --timeout-ms: {}", value))?;
                parsed.timeout = Some(Duration::from_millis(ms));
            }
            _ => return Err(format!("Unknown argument: {}", flag)),
        }
        i += 2;
    }
    if parsed.role.is_empty() {
        return Err("Missing --role".to_string());
    }
    Ok(parsed)
}

/// Sync, route once and print the binding.
pub async fn run_route(broker: &Broker, args: &RouteArgs) -> i32 {
    for result in broker.sync().await {
        if let Err(e) = result {
            eprintln!("Warning: {}", e);
        }
    }

    match broker.route_detailed(&args.to_request()).await {
        Ok(outcome) => {
            let handle = &outcome.handle;
            if args.json {
                let body = json!({
                    "model": handle.model_id(),
                    "provider": handle.provider(),
                    "endpoint": handle.endpoint(),
                    "generation": handle.generation(),
                    "path": outcome.path,
                    "evicted": outcome.evicted,
                    "committed_mb": broker.ledger().committed_mb(),
                });
                println!("{}", body);
            } else {
                println!("Routed '{}' to {} ({:?})", args.role, handle.model_id(), outcome.path);
                println!("  endpoint: {}", handle.endpoint());
                if !outcome.evicted.is_empty() {
                    let evicted: Vec<&str> = outcome.evicted.iter().map(ModelId::as_str).collect();
                    println!("  evicted: {}", evicted.join(", "));
                }
                println!(
                    "  committed: {} / {} MB",
                    broker.ledger().committed_mb(),
                    broker.ledger().usable_mb()
                );
            }
            0
        }
        Err(e) => {
            eprintln!("Routing failed: {}", e);
            if e.is_terminal() { 1 } else { 3 }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_repeated_models_in_order() {
        let parsed = parse_route_args(&args(&[
            "--role", "coder", "--model", "ollama/a", "--model", "lms/b", "--complexity", "0.7", "--json",
        ]))
        .unwrap();
        assert_eq!(parsed.role, "coder");
        assert_eq!(parsed.models, vec![ModelId::from("ollama/a"), ModelId::from("lms/b")]);
        assert!((parsed.complexity - 0.7).abs() < f32::EPSILON);
        assert!(parsed.json);

        let request = parsed.to_request();
        assert_eq!(request.preferred_model_ids.len(), 2);
        assert!(request.deadline.is_none());
    }

    #[test]
    fn role_is_required() {
        assert_eq!(parse_route_args(&args(&["--model", "a/b"])), Err("Missing --role".to_string()));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse_route_args(&args(&["--role"])).is_err());
        assert!(parse_route_args(&args(&["--role", "r", "--complexity", "high"])).is_err());
        assert!(parse_route_args(&args(&["--role", "r", "--bogus", "x"])).is_err());
    }

    #[tokio::test]
    async fn timeout_sets_deadline() {
        let parsed = parse_route_args(&args(&["--role", "r", "--timeout-ms", "250"])).unwrap();
        assert_eq!(parsed.timeout, Some(Duration::from_millis(250)));
        assert!(parsed.to_request().deadline.is_some());
    }
}
