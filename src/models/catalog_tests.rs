// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

use super::*;
use crate::models::{ModelHandle, PriorityTier};
use crate::providers::ProviderKind;

fn ollama() -> ProviderConfig {
    ProviderConfig::new("ollama", ProviderKind::Ollama)
        .with_endpoint("http://127.0.0.1:11434")
        .with_tier(PriorityTier::BULK)
}

fn listing(items: &[(&str, Option<u64>)]) -> Vec<DiscoveredModel> {
    items.iter().map(|(n, s)| DiscoveredModel::new(*n, *s)).collect()
}

#[test]
fn discovery_adds_unloaded_descriptors() {
    let catalog = ModelCatalog::default();
    let outcome = catalog.merge_discovered(&ollama(), &listing(&[("a", Some(1200)), ("b", None)]));
    assert_eq!(outcome.added.len(), 2);

    let a = catalog.get(&"ollama/a".into()).unwrap();
    assert_eq!(a.state, ModelState::Unloaded);
    assert_eq!(a.size_mb, 1200);
    assert_eq!(a.tier, PriorityTier::BULK);
    assert_eq!(a.provider, "ollama");

    let b = catalog.get(&"ollama/b".into()).unwrap();
    assert_eq!(b.size_mb, 4096, "missing size falls back to provider default");
}

#[test]
fn merge_is_idempotent() {
    let catalog = ModelCatalog::default();
    let models = listing(&[("a", Some(1200))]);
    catalog.merge_discovered(&ollama(), &models);
    let second = catalog.merge_discovered(&ollama(), &models);
    assert_eq!(second, MergeOutcome::default());
    assert_eq!(catalog.len(), 1);
}

#[test]
fn resident_models_keep_committed_size() {
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&ollama(), &listing(&[("a", Some(1200))]));
    catalog.update(&"ollama/a".into(), |d| d.state = ModelState::Loaded);

    let outcome = catalog.merge_discovered(&ollama(), &listing(&[("a", Some(2000))]));
    assert!(outcome.resized.is_empty());
    assert_eq!(catalog.get(&"ollama/a".into()).unwrap().size_mb, 1200);

    catalog.update(&"ollama/a".into(), |d| d.state = ModelState::Unloaded);
    let outcome = catalog.merge_discovered(&ollama(), &listing(&[("a", Some(2000))]));
    assert_eq!(outcome.resized, vec![ModelId::from("ollama/a")]);
    assert_eq!(catalog.get(&"ollama/a".into()).unwrap().size_mb, 2000);
}

#[test]
fn rediscovery_clears_quarantine() {
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&ollama(), &listing(&[("a", Some(100))]));
    catalog.update(&"ollama/a".into(), |d| {
        d.state = ModelState::Failed;
        d.quarantined = true;
    });

    let outcome = catalog.merge_discovered(&ollama(), &listing(&[("a", Some(100))]));
    assert_eq!(outcome.requalified, vec![ModelId::from("ollama/a")]);
    assert!(!catalog.get(&"ollama/a".into()).unwrap().quarantined);
}

#[test]
fn overrides_apply_on_merge() {
    let overrides = vec![ModelOverride {
        id: "ollama/a".into(),
        size_mb: Some(5000),
        priority_tier: Some(PriorityTier::CRITICAL),
        pinned: true,
    }];
    let catalog = ModelCatalog::new(&overrides);
    catalog.merge_discovered(&ollama(), &listing(&[("a", Some(1200))]));

    let a = catalog.get(&"ollama/a".into()).unwrap();
    assert_eq!(a.size_mb, 5000);
    assert_eq!(a.tier, PriorityTier::CRITICAL);
    assert!(a.pinned);

    let again = catalog.merge_discovered(&ollama(), &listing(&[("a", Some(1200))]));
    assert!(again.resized.is_empty());
}

#[test]
fn cloud_models_are_not_local() {
    let cloud = ProviderConfig::new("cloud", ProviderKind::Cloud).with_models(&["gpt"]);
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&cloud, &listing(&[("gpt", Some(0))]));
    let gpt = catalog.get(&"cloud/gpt".into()).unwrap();
    assert!(!gpt.local);
    assert_eq!(gpt.size_mb, 0);
}

#[test]
fn snapshot_is_sorted_and_filterable() {
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&ollama(), &listing(&[("z", Some(1)), ("a", Some(1))]));
    let ids: Vec<String> = catalog.snapshot().iter().map(|d| d.id.to_string()).collect();
    assert_eq!(ids, vec!["ollama/a", "ollama/z"]);
    assert_eq!(catalog.by_provider("ollama").len(), 2);
    assert!(catalog.by_provider("other").is_empty());
}

#[test]
fn leases_pin_loaded_models_only() {
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&ollama(), &listing(&[("a", Some(100))]));
    let slot = catalog.slot(&"ollama/a".into()).unwrap();

    assert!(ModelHandle::checkout(&slot, "http://x").is_none());

    slot.with_descriptor(|d| {
        d.state = ModelState::Loaded;
        d.generation = 3;
    });
    let handle = ModelHandle::checkout(&slot, "http://x").unwrap();
    let clone = handle.clone();
    assert_eq!(slot.descriptor().in_flight, 1);
    assert!(slot.descriptor().last_used_at.is_some());
    assert_eq!(handle.generation(), 3);
    assert!(handle.shares_lease(&clone));

    let second = ModelHandle::checkout(&slot, "http://x").unwrap();
    assert_eq!(slot.descriptor().in_flight, 2);
    assert_eq!(handle, second);

    drop(handle);
    drop(clone);
    assert_eq!(slot.descriptor().in_flight, 1);
    drop(second);
    assert_eq!(slot.descriptor().in_flight, 0);
}

#[tokio::test]
async fn transition_lock_is_per_model() {
    let catalog = ModelCatalog::default();
    catalog.merge_discovered(&ollama(), &listing(&[("a", Some(1)), ("b", Some(1))]));
    let a = catalog.slot(&"ollama/a".into()).unwrap();
    let b = catalog.slot(&"ollama/b".into()).unwrap();

    let lock = a.transition_lock();
    let _guard = lock.lock().await;
    assert!(a.is_locked());
    assert!(!b.is_locked());
}
