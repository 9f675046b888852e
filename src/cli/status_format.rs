// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Formatting helpers for the status command display.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::status::{HealthState, StatusReport};
use crate::models::ModelDescriptor;
use crate::scheduler::EventSeverity;

const RULE: &str = "====================================================";

/// Print status in human-readable format.
pub fn print_status_human(report: &StatusReport) {
    print!("{}", render_status(report));
}

pub fn render_status(report: &StatusReport) -> String {
    let mut out = String::new();
    render_header(&mut out, report);
    render_budget(&mut out, report);
    render_providers(&mut out, report);
    render_models(&mut out, report);
    render_events(&mut out, report);
    out
}

fn render_header(out: &mut String, report: &StatusReport) {
    let health_icon = match report.health {
        HealthState::Healthy => "V",
        HealthState::Degraded => "!",
        HealthState::Unhealthy => "X",
    };
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  VRAM Broker Status                     v{}", report.version);
    let _ = writeln!(out, "{}", RULE);
    let _ = writeln!(out, "  Health: {} {}", health_icon, report.health);
    let _ = writeln!(out, "{}", RULE);
}

fn render_budget(out: &mut String, report: &StatusReport) {
    let ledger = &report.snapshot.ledger;
    let _ = writeln!(out, "\nBudget");
    let _ = writeln!(
        out,
        "  Committed: {} / {} ({:.1}%)   Ceiling: {}  Margin: {}",
        format_mb(ledger.committed_mb),
        format_mb(ledger.usable_mb),
        ledger.utilization() * 100.0,
        format_mb(ledger.ceiling_mb),
        format_mb(ledger.safety_margin_mb)
    );
    let _ = writeln!(
        out,
        "  Reserved: {}   Free: {}   Peak: {}",
        format_mb(ledger.reserved_mb),
        format_mb(ledger.free_mb),
        format_mb(ledger.peak_committed_mb)
    );
}

fn render_providers(out: &mut String, report: &StatusReport) {
    let providers = &report.snapshot.providers;
    let _ = writeln!(
        out,
        "\nProviders ({}/{} healthy)",
        report.snapshot.healthy_providers(),
        providers.len()
    );
    for p in providers {
        let icon = if p.healthy { "V" } else { "X" };
        let _ = writeln!(
            out,
            "  {} {:14} {:10} {}",
            icon,
            truncate(&p.name, 14),
            p.kind.as_str(),
            truncate(&p.endpoint, 30)
        );
        if let Some(ref err) = p.last_error {
            let _ = writeln!(out, "      last error: {}", truncate(err, 44));
        }
    }
}

fn render_models(out: &mut String, report: &StatusReport) {
    let now = Utc::now();
    let models = &report.snapshot.models;
    let _ = writeln!(
        out,
        "\nModels ({} loaded of {})",
        report.snapshot.loaded().count(),
        models.len()
    );
    let _ = writeln!(out, "  Model                       | State     | Size     | Tier | Last used");
    let _ = writeln!(out, "  ----------------------------+-----------+----------+------+----------");
    for model in models {
        let _ = writeln!(
            out,
            "  {:27} | {:9} | {:>8} | {:>4} | {}",
            truncate(model.id.as_str(), 27),
            model.state.as_str(),
            size_column(model),
            model.tier.to_string(),
            format_age(model.last_used_at, now)
        );
    }
}

fn render_events(out: &mut String, report: &StatusReport) {
    let events = &report.snapshot.events;
    if events.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nRecent Events (last {})", events.len());
    for event in events {
        let icon = match event.severity {
            EventSeverity::Info => "I",
            EventSeverity::Warning => "W",
            EventSeverity::Error => "E",
        };
        let subject = event
            .model
            .as_ref()
            .map(|m| m.to_string())
            .or_else(|| event.provider.clone())
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  {} {} {:?} {} {}",
            icon,
            event.timestamp.format("%H:%M:%S"),
            event.kind,
            truncate(&subject, 24),
            truncate(&event.message, 40)
        );
    }
}

fn size_column(model: &ModelDescriptor) -> String {
    if model.local {
        format_mb(model.size_mb)
    } else {
        "cloud".to_string()
    }
}

/// Format megabytes in human-readable form.
pub fn format_mb(mb: u64) -> String {
    if mb >= 1024 {
        format!("{:.1} GB", mb as f64 / 1024.0)
    } else {
        format!("{} MB", mb)
    }
}

/// Time since `at`, coarsened to the largest whole unit.
pub fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = (now - at).num_seconds().max(0);
    if secs >= 86400 {
        format!("{}d ago", secs / 86400)
    } else if secs >= 3600 {
        format!("{}h ago", secs / 3600)
    } else if secs >= 60 {
        format!("{}m ago", secs / 60)
    } else {
        format!("{}s ago", secs)
    }
}

/// Truncate a string to a maximum number of characters.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
