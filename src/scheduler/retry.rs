// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capped exponential backoff with jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::providers::ProviderError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 200, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self { max_attempts: 1, base_delay_ms: 0, max_delay_ms: 0 }
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay_for(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let ms = self.base_delay_ms.saturating_mul(1u64 << exp).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Backoff plus up to 50% random jitter, still capped at `max_delay_ms`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay_for(retry).as_millis() as u64;
        let jitter = if base > 1 { rand::thread_rng().gen_range(0..=base / 2) } else { 0 };
        Duration::from_millis((base + jitter).min(self.max_delay_ms.max(base)))
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or attempts
/// run out. Returns the last error.
pub async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.delay_for(attempt);
                warn!("{}: attempt {}/{} failed: {}; retrying in {:?}", label, attempt, attempts, e, delay);
                metrics::counter!("vram_broker_provider_retries_total").increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
