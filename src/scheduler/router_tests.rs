// Copyright 2024-2026 VRAM Broker Contributors
// SPDX-License-Identifier: Apache-2.0

use chrono::Duration as ChronoDuration;

use super::*;
use crate::budget::BudgetLedger;
use crate::config::{FallbackConfig, ProviderConfig};
use crate::models::{ModelCatalog, PriorityTier};
use crate::providers::{build_adapter, MockProvider, ProviderKind, ProviderRegistry};
use crate::scheduler::{EventLog, RetryPolicy};

struct Fixture {
    mock: Arc<MockProvider>,
    router: TaskRouter,
    orchestrator: Arc<Orchestrator>,
}

impl Fixture {
    fn descriptor(&self, id: &str) -> ModelDescriptor {
        self.orchestrator.catalog().get(&id.into()).unwrap()
    }

    fn committed(&self) -> u64 {
        self.orchestrator.ledger().committed_mb()
    }

    fn set_tier(&self, id: &str, tier: u8) {
        self.orchestrator.catalog().update(&id.into(), |d| d.tier = PriorityTier(tier));
    }

    fn set_last_used(&self, id: &str, secs_ago: i64) {
        let at = Utc::now() - ChronoDuration::seconds(secs_ago);
        self.orchestrator.catalog().update(&id.into(), |d| d.last_used_at = Some(at));
    }

    async fn route(&self, ids: &[&str]) -> Result<RouteOutcome, SchedulerError> {
        let request = TaskRequest::for_role("tester").with_models(ids.iter().copied());
        self.router.route_detailed(&request).await
    }
}

fn config() -> SchedulerConfig {
    SchedulerConfig {
        cooldown_ms: 0,
        conflict_wait_ms: 10,
        retry: RetryPolicy { max_attempts: 2, base_delay_ms: 1, max_delay_ms: 2 },
        ..SchedulerConfig::default()
    }
}

struct Setup {
    mock: MockProvider,
    fallback: FallbackConfig,
    roles: BTreeMap<String, AgentProfile>,
    with_cloud: bool,
    scheduler: SchedulerConfig,
}

impl Setup {
    fn new(mock: MockProvider) -> Self {
        Self {
            mock,
            fallback: FallbackConfig::default(),
            roles: BTreeMap::new(),
            with_cloud: false,
            scheduler: config(),
        }
    }

    async fn build(self) -> Fixture {
        let mock = Arc::new(self.mock);
        let mut registry = ProviderRegistry::new();
        registry
            .register(ProviderConfig::new("local", ProviderKind::Mock), mock.clone())
            .unwrap();
        if self.with_cloud {
            let cloud = ProviderConfig::new("cloud", ProviderKind::Cloud).with_models(&["gpt"]);
            let adapter = build_adapter(&cloud).unwrap();
            registry.register(cloud, adapter).unwrap();
        }
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(registry),
            Arc::new(ModelCatalog::default()),
            Arc::new(BudgetLedger::new(8000, 512)),
            Arc::new(EventLog::new(128)),
            self.scheduler.clone(),
        ));
        for result in orchestrator.sync_all().await {
            result.unwrap();
        }
        let router = TaskRouter::new(
            Arc::clone(&orchestrator),
            FallbackChain::new(&self.fallback),
            self.roles,
            &self.scheduler,
        );
        Fixture { mock, router, orchestrator }
    }
}

fn standard_mock() -> MockProvider {
    MockProvider::new()
        .with_model("a", 4000)
        .with_model("b", 1800)
        .with_model("c", 1500)
        .with_model("d", 2000)
        .with_model("tiny", 300)
}

/// Loads a, b and c (7300 of 7488 MB) and releases their handles.
async fn fill(f: &Fixture) {
    for id in ["local/a", "local/b", "local/c"] {
        f.route(&[id]).await.unwrap();
    }
    assert_eq!(f.committed(), 7300);
}

#[tokio::test]
async fn resident_preference_binds_without_loading() {
    let f = Setup::new(standard_mock()).build().await;
    f.route(&["local/a"]).await.unwrap();

    let outcome = f.route(&["local/a"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Resident);
    assert_eq!(f.mock.load_calls("a"), 1);
}

#[tokio::test]
async fn resident_later_preference_wins_over_cold_earlier_one() {
    let f = Setup::new(standard_mock()).build().await;
    f.route(&["local/b"]).await.unwrap();

    let outcome = f.route(&["local/a", "local/b"]).await.unwrap();
    assert_eq!(outcome.handle.model_id().as_str(), "local/b");
    assert_eq!(f.mock.load_calls("a"), 0);
}

#[tokio::test]
async fn first_viable_preference_is_loaded_when_room_exists() {
    let f = Setup::new(standard_mock()).build().await;
    let outcome = f.route(&["local/b", "local/c"]).await.unwrap();

    assert_eq!(outcome.path, RoutePath::Loaded);
    assert_eq!(outcome.handle.model_id().as_str(), "local/b");
    assert!(outcome.evicted.is_empty());
    assert_eq!(f.committed(), 1800);
    assert_eq!(f.mock.load_calls("c"), 0);
}

#[tokio::test]
async fn eviction_frees_the_deficit_by_tier_then_recency() {
    let f = Setup::new(standard_mock()).build().await;
    fill(&f).await;
    f.set_tier("local/a", 1);
    f.set_tier("local/b", 2);
    f.set_tier("local/c", 2);
    f.set_last_used("local/a", 5);
    f.set_last_used("local/b", 120);
    f.set_last_used("local/c", 60);

    // 188 MB free; d needs 2000, so 1812 MB must go.
    let outcome = f.route(&["local/d"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Loaded);
    assert_eq!(outcome.evicted, vec![ModelId::from("local/b"), ModelId::from("local/c")]);
    assert_eq!(f.descriptor("local/a").state, ModelState::Loaded);
    assert_eq!(f.descriptor("local/b").state, ModelState::Unloaded);
    assert_eq!(f.descriptor("local/d").state, ModelState::Loaded);
    assert_eq!(f.committed(), 6000);
    assert!(f.orchestrator.ledger().is_within_budget());
    assert_eq!(f.orchestrator.events().count(EventKind::Evicted), 2);
}

#[tokio::test]
async fn models_with_live_handles_are_not_evicted() {
    let f = Setup::new(standard_mock()).build().await;
    fill(&f).await;
    let _b = f.route(&["local/b"]).await.unwrap();
    let _c = f.route(&["local/c"]).await.unwrap();

    let outcome = f.route(&["local/d"]).await.unwrap();
    assert_eq!(outcome.evicted, vec![ModelId::from("local/a")]);
    assert_eq!(f.descriptor("local/b").state, ModelState::Loaded);
    assert_eq!(f.descriptor("local/c").state, ModelState::Loaded);
}

#[tokio::test]
async fn repeated_requests_are_idempotent() {
    let f = Setup::new(standard_mock()).build().await;
    let first = f.route(&["local/a"]).await.unwrap();
    let second = f.route(&["local/a"]).await.unwrap();

    assert_eq!(first.handle, second.handle);
    assert_eq!(f.mock.load_calls("a"), 1);
    assert_eq!(f.committed(), 4000);
}

#[tokio::test]
async fn falls_back_to_smaller_local_model() {
    let f = Setup::new(standard_mock()).build().await;
    fill(&f).await;
    let _held: Vec<RouteOutcome> = vec![
        f.route(&["local/a"]).await.unwrap(),
        f.route(&["local/b"]).await.unwrap(),
        f.route(&["local/c"]).await.unwrap(),
    ];

    // Nothing is evictable, but b (1800 MB) is resident and the largest
    // model smaller than d.
    let outcome = f.route(&["local/d"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Fallback);
    assert_eq!(outcome.handle.model_id().as_str(), "local/b");
    assert_eq!(f.mock.load_calls("d"), 0);
    assert_eq!(f.orchestrator.events().count(EventKind::Fallback), 1);
}

#[tokio::test]
async fn falls_back_to_cloud_last() {
    let mut setup = Setup::new(standard_mock());
    setup.with_cloud = true;
    setup.fallback = FallbackConfig { chain: vec!["local/tiny".into(), "cloud/gpt".into()], include_cloud: true };
    let f = setup.build().await;
    fill(&f).await;
    let _held: Vec<RouteOutcome> = vec![
        f.route(&["local/a"]).await.unwrap(),
        f.route(&["local/b"]).await.unwrap(),
        f.route(&["local/c"]).await.unwrap(),
    ];

    let outcome = f.route(&["local/d"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Fallback);
    assert_eq!(outcome.handle.model_id().as_str(), "cloud/gpt");
    assert!(!outcome.handle.is_local());
    assert_eq!(f.committed(), 7300);
}

#[tokio::test]
async fn exhausted_chain_reports_no_capacity_and_leaves_ledger_alone() {
    let mut setup = Setup::new(standard_mock());
    setup.fallback = FallbackConfig { chain: vec!["local/tiny".into()], include_cloud: false };
    let f = setup.build().await;
    fill(&f).await;
    let _held: Vec<RouteOutcome> = vec![
        f.route(&["local/a"]).await.unwrap(),
        f.route(&["local/b"]).await.unwrap(),
        f.route(&["local/c"]).await.unwrap(),
    ];
    let before = f.orchestrator.ledger().snapshot();

    let err = f.route(&["local/d"]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoCapacityAvailable { .. }), "{err:?}");
    let after = f.orchestrator.ledger().snapshot();
    assert_eq!(before.committed_mb, after.committed_mb);
    assert_eq!(before.commitments, after.commitments);
    assert_eq!(f.mock.load_calls("d"), 0);
    assert_eq!(f.mock.load_calls("tiny"), 0);
    assert_eq!(f.orchestrator.events().count(EventKind::NoCapacity), 1);
}

#[tokio::test]
async fn oversized_model_never_evicts() {
    let mock = standard_mock().with_model("giant", 9000);
    let mut setup = Setup::new(mock);
    setup.fallback = FallbackConfig { chain: vec![], include_cloud: false };
    let f = setup.build().await;
    f.route(&["local/a"]).await.unwrap();

    // Derived fallback binds the resident a rather than evicting for giant.
    let outcome = f.route(&["local/giant"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Fallback);
    assert_eq!(outcome.handle.model_id().as_str(), "local/a");
    assert_eq!(f.mock.unload_calls("a"), 0);
}

#[tokio::test]
async fn unhealthy_provider_is_excluded_until_readmitted() {
    let f = Setup::new(standard_mock()).build().await;
    f.mock.set_healthy(false);
    f.orchestrator.check_health("local").await.unwrap();

    let err = f.route(&["local/a"]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ProviderUnreachable { .. }), "{err:?}");
    assert_eq!(f.mock.load_calls("a"), 0);

    f.mock.set_healthy(true);
    assert!(f.orchestrator.check_health("local").await.unwrap());
    let outcome = f.route(&["local/a"]).await.unwrap();
    assert_eq!(outcome.handle.model_id().as_str(), "local/a");
}

#[tokio::test]
async fn role_profile_fills_empty_preferences() {
    let mut setup = Setup::new(standard_mock());
    setup.roles.insert(
        "coder".into(),
        AgentProfile { models: vec!["local/c".into()], ..Default::default() },
    );
    let f = setup.build().await;

    let request = TaskRequest::for_role("coder").with_complexity(0.7);
    let handle = f.router.route(&request).await.unwrap();
    assert_eq!(handle.model_id().as_str(), "local/c");

    let routed = f.orchestrator.events().by_kind(EventKind::Routed);
    assert!(routed[0].message.contains("complexity=0.70"));
}

#[tokio::test]
async fn unknown_role_without_preferences_is_a_config_error() {
    let f = Setup::new(standard_mock()).build().await;
    let err = f.router.route(&TaskRequest::for_role("nobody")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Config(ConfigError::UnknownRole(_))));
}

#[tokio::test]
async fn deadline_bounds_the_call_without_aborting_the_load() {
    let mock = standard_mock().with_latency(Duration::from_millis(100));
    let f = Setup::new(mock).build().await;

    let request = TaskRequest::for_role("tester")
        .with_models(["local/b"])
        .with_timeout(Duration::from_millis(10));
    let err = f.router.route(&request).await.unwrap_err();
    assert!(matches!(err, SchedulerError::Timeout));

    tokio::time::sleep(Duration::from_millis(300)).await;
    let b = f.descriptor("local/b");
    assert_eq!(b.state, ModelState::Loaded);
    assert_eq!(b.in_flight, 0);
    assert_eq!(f.committed(), 1800);
    assert_eq!(f.orchestrator.ledger().reserved_mb(), 0);
}

#[tokio::test]
async fn failed_preference_moves_to_next_in_order() {
    let f = Setup::new(standard_mock()).build().await;
    f.mock.fail_next_loads("b", 5);

    let outcome = f.route(&["local/b", "local/c"]).await.unwrap();
    assert_eq!(outcome.handle.model_id().as_str(), "local/c");
    assert_eq!(f.descriptor("local/b").state, ModelState::Failed);
    assert_eq!(f.committed(), 1500);
}

#[tokio::test]
async fn recovered_model_loads_within_a_single_attempt() {
    let mut setup = Setup::new(MockProvider::new().with_model("a", 1000));
    setup.scheduler = SchedulerConfig {
        reservation_attempts: 1,
        retry: RetryPolicy::none(),
        ..config()
    };
    let f = setup.build().await;
    f.mock.fail_next_loads("a", 1);

    let err = f.route(&["local/a"]).await.unwrap_err();
    assert!(matches!(err, SchedulerError::NoCapacityAvailable { .. }), "{err:?}");
    assert_eq!(f.descriptor("local/a").state, ModelState::Failed);

    let outcome = f.route(&["local/a"]).await.unwrap();
    assert_eq!(outcome.path, RoutePath::Loaded);
    assert_eq!(f.mock.load_calls("a"), 2);
    assert_eq!(f.committed(), 1000);
    assert_eq!(f.descriptor("local/a").consecutive_failures, 0);
}

#[test]
fn deficit_is_zero_once_free_space_covers_the_model() {
    let mut d = ModelDescriptor::new(ModelId::from("local/d"), 2000, PriorityTier(1));
    assert_eq!(deficit_for(&d, 188), 1812);
    assert_eq!(deficit_for(&d, 2000), 0);
    // Free space grown by a concurrent release past the model's size.
    assert_eq!(deficit_for(&d, 3488), 0);

    d.state = ModelState::Loaded;
    assert_eq!(deficit_for(&d, 0), 0);
    d.state = ModelState::Unloaded;
    d.local = false;
    assert_eq!(deficit_for(&d, 0), 0);
}
