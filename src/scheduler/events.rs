// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded log of recent scheduler events, served by the snapshot query.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::models::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Info => write!(f, "INFO"),
            EventSeverity::Warning => write!(f, "WARN"),
            EventSeverity::Error => write!(f, "ERROR"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Discovered,
    Adopted,
    DriftReleased,
    Loaded,
    LoadFailed,
    Unloaded,
    UnloadFailed,
    Evicted,
    Routed,
    Fallback,
    NoCapacity,
    ProviderDown,
    ProviderUp,
    Recovered,
    Quarantined,
    OverBudget,
}

impl EventKind {
    pub fn severity(&self) -> EventSeverity {
        match self {
            EventKind::LoadFailed
            | EventKind::UnloadFailed
            | EventKind::NoCapacity
            | EventKind::Quarantined => EventSeverity::Error,
            EventKind::ProviderDown
            | EventKind::OverBudget
            | EventKind::Fallback
            | EventKind::DriftReleased => EventSeverity::Warning,
            _ => EventSeverity::Info,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub severity: EventSeverity,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub message: String,
}

impl SchedulerEvent {
    pub fn to_log_string(&self) -> String {
        let subject = match (&self.model, &self.provider) {
            (Some(model), _) => model.to_string(),
            (None, Some(provider)) => provider.clone(),
            (None, None) => "-".to_string(),
        };
        format!(
            "{} [{}] {:?} {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.severity,
            self.kind,
            subject,
            self.message
        )
    }
}

struct Ring {
    events: VecDeque<SchedulerEvent>,
    next_seq: u64,
}

pub struct EventLog {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring { events: VecDeque::with_capacity(capacity), next_seq: 1 }),
        }
    }

    pub fn record(&self, kind: EventKind, model: Option<&ModelId>, message: impl Into<String>) {
        let provider = model.map(|m| m.provider().to_string());
        self.push(kind, model.cloned(), provider, message.into());
    }

    pub fn record_provider(&self, kind: EventKind, provider: &str, message: impl Into<String>) {
        self.push(kind, None, Some(provider.to_string()), message.into());
    }

    fn push(&self, kind: EventKind, model: Option<ModelId>, provider: Option<String>, message: String) {
        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        ring.events.push_back(SchedulerEvent {
            seq,
            timestamp: Utc::now(),
            severity: kind.severity(),
            kind,
            model,
            provider,
            message,
        });
        while ring.events.len() > self.capacity {
            ring.events.pop_front();
        }
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<SchedulerEvent> {
        let ring = self.ring.lock();
        let skip = ring.events.len().saturating_sub(limit);
        ring.events.iter().skip(skip).cloned().collect()
    }

    pub fn all(&self) -> Vec<SchedulerEvent> {
        self.ring.lock().events.iter().cloned().collect()
    }

    pub fn by_kind(&self, kind: EventKind) -> Vec<SchedulerEvent> {
        self.ring.lock().events.iter().filter(|e| e.kind == kind).cloned().collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.ring.lock().events.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
