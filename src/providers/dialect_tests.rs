// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tests for backend wire dialects.

use super::*;

#[test]
fn generic_routes_follow_provider_boundary() {
    let d = Dialect::Generic;
    assert_eq!(d.discover().path(), "/models");
    assert_eq!(d.loaded().path(), "/models/loaded");
    assert_eq!(d.load("phi-3").path(), "/models/phi-3/load");
    assert_eq!(d.unload("phi-3").path(), "/models/phi-3/unload");
    assert_eq!(d.health().path(), "/health");
    assert_eq!(d.load("phi-3").method, Method::Post);
    assert!(d.load("phi-3").body.is_none());
}

#[test]
fn ollama_drives_residency_with_keep_alive() {
    let d = Dialect::Ollama;
    let load = d.load("llama3:8b");
    assert_eq!(load.path(), "/api/generate");
    assert_eq!(load.body, Some(json!({ "model": "llama3:8b", "keep_alive": -1 })));

    let unload = d.unload("llama3:8b");
    assert_eq!(unload.body, Some(json!({ "model": "llama3:8b", "keep_alive": 0 })));
}

#[test]
fn ollama_tags_report_sizes_in_mb() {
    let body = json!({
        "models": [
            { "name": "llama3:8b", "size": 4_661_224_676u64 },
            { "name": "phi3:mini", "size": 2_176_178_913u64 }
        ]
    });
    let models = Dialect::Ollama.parse_discovered(&body).unwrap();
    assert_eq!(models.len(), 2);
    assert_eq!(models[0].name, "llama3:8b");
    assert_eq!(models[0].size_mb, Some(4446));
    assert_eq!(models[1].size_mb, Some(2076));
}

#[test]
fn lm_studio_filters_loaded_by_state() {
    let body = json!({
        "object": "list",
        "data": [
            { "id": "qwen2-7b-instruct", "state": "loaded" },
            { "id": "meta-llama-3.1-8b", "state": "not-loaded" }
        ]
    });
    let loaded = Dialect::LmStudio.parse_loaded(&body).unwrap();
    assert_eq!(loaded, vec!["qwen2-7b-instruct".to_string()]);

    let all = Dialect::LmStudio.parse_discovered(&body).unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|m| m.size_mb.is_none()));
}

#[test]
fn generic_accepts_bare_lists() {
    let body = json!([{ "id": "tiny", "size_mb": 900 }, "bare-name"]);
    let models = Dialect::Generic.parse_discovered(&body).unwrap();
    assert_eq!(models[0], DiscoveredModel::new("tiny", Some(900)));
    assert_eq!(models[1], DiscoveredModel::new("bare-name", None));

    let loaded = Dialect::Generic.parse_loaded(&json!(["tiny"])).unwrap();
    assert_eq!(loaded, vec!["tiny".to_string()]);
}

#[test]
fn unexpected_shape_is_invalid_response() {
    let err = Dialect::Generic.parse_discovered(&json!({ "status": "ok" })).unwrap_err();
    assert!(matches!(err, ProviderError::InvalidResponse(_)));
}

#[test]
fn dialect_selection_by_kind() {
    assert_eq!(Dialect::for_kind(ProviderKind::CpuServer), Some(Dialect::Generic));
    assert_eq!(Dialect::for_kind(ProviderKind::Ollama), Some(Dialect::Ollama));
    assert_eq!(Dialect::for_kind(ProviderKind::Cloud), None);
}
