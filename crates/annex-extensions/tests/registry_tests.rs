//! Registry lifecycle integration tests
//!
//! Tests the registry state machine including:
//! - Idempotent and concurrent activation
//! - Dependency-first activation and dependent-guarded deactivation
//! - Hook failures, panics and timeouts contained to one extension
//! - Lifecycle events and the active set

mod common;

use annex_core::{ProvenanceTier, RuntimeMode};
use annex_extensions::registry::ActivationReport;
use annex_extensions::{
    ContextFactory, ExtensionRegistry, LoadedExtension, RegistryError, RegistryEvent, Services,
};
use common::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    _temp: TempDir,
    registry: Arc<ExtensionRegistry>,
    log: CallLog,
}

impl Harness {
    fn new(timeout: Duration) -> Self {
        let temp = TempDir::new().unwrap();
        let factory = Arc::new(ContextFactory::new(
            temp.path().join("storage"),
            RuntimeMode::Production,
            Services::default(),
        ));
        Self {
            registry: Arc::new(ExtensionRegistry::new(factory).with_hook_timeout(timeout)),
            _temp: temp,
            log: CallLog::new(),
        }
    }

    async fn add(&self, id: &str, deps: &[&str], behaviour: Behaviour) -> Arc<MockDefinition> {
        self.add_definition(id, deps, MockDefinition::new(id, &self.log).behaving(behaviour))
            .await
    }

    async fn add_definition(
        &self,
        id: &str,
        deps: &[&str],
        definition: MockDefinition,
    ) -> Arc<MockDefinition> {
        let definition = definition.arc();
        let manifest = ManifestBuilder::new(id).depends_on(deps).build();
        self.registry
            .register(LoadedExtension::new(
                manifest,
                definition.clone(),
                ProvenanceTier::Development,
                "/nonexistent",
            ))
            .await
            .unwrap();
        definition
    }
}

#[tokio::test]
async fn test_activate_is_idempotent() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    let notes = h.add("notes", &[], Behaviour::Succeed).await;

    h.registry.activate("notes").await.unwrap();
    h.registry.activate("notes").await.unwrap();

    assert_eq!(notes.activations(), 1);
    assert!(h.registry.is_active("notes").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_activate_runs_hook_once() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    let notes = h
        .add("notes", &[], Behaviour::Slow(Duration::from_millis(50)))
        .await;

    let calls = (0..8).map(|_| {
        let registry = Arc::clone(&h.registry);
        tokio::spawn(async move { registry.activate("notes").await })
    });
    for result in futures::future::join_all(calls).await {
        result.unwrap().unwrap();
    }
    assert_eq!(notes.activations(), 1);
}

#[tokio::test]
async fn test_activation_pulls_in_dependencies_first() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("a", &[], Behaviour::Succeed).await;
    h.add("b", &["a"], Behaviour::Succeed).await;
    h.add("c", &["b"], Behaviour::Succeed).await;

    h.registry.activate("c").await.unwrap();
    assert_eq!(h.log.calls(), vec!["a:activate", "b:activate", "c:activate"]);
    assert_eq!(h.registry.active_ids().await, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_register_requires_registered_dependencies() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    let definition = MockDefinition::new("editor", &h.log).arc();
    let err = h
        .registry
        .register(LoadedExtension::new(
            ManifestBuilder::new("editor").depends_on(&["notes"]).build(),
            definition,
            ProvenanceTier::Packaged,
            "/nonexistent",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::MissingDependency { ref dependency, .. } if dependency == "notes"));
    assert!(!h.registry.is_registered("editor").await);
}

#[tokio::test]
async fn test_duplicate_register_is_rejected_without_change() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("notes", &[], Behaviour::Succeed).await;
    h.registry.activate("notes").await.unwrap();

    let again = MockDefinition::new("notes", &h.log).arc();
    let err = h
        .registry
        .register(LoadedExtension::new(
            ManifestBuilder::new("notes").version("2.0.0").build(),
            again,
            ProvenanceTier::Packaged,
            "/nonexistent",
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));

    let entry = h.registry.get("notes").await.unwrap();
    assert_eq!(entry.extension.manifest.version, "1.0.0");
    assert!(entry.is_active);
}

#[tokio::test]
async fn test_deactivate_refused_while_dependent_active() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("notes", &[], Behaviour::Succeed).await;
    h.add("editor", &["notes"], Behaviour::Succeed).await;
    h.registry.activate("editor").await.unwrap();

    let err = h.registry.deactivate("notes").await.unwrap_err();
    match err {
        RegistryError::HasDependents { id, dependents } => {
            assert_eq!(id, "notes");
            assert_eq!(dependents, vec!["editor"]);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(h.registry.is_active("notes").await);
    assert_eq!(h.log.count("notes:deactivate"), 0);

    h.registry.deactivate("editor").await.unwrap();
    h.registry.deactivate("notes").await.unwrap();
    assert!(!h.registry.is_active("notes").await);
    assert!(h.registry.is_registered("notes").await);

    let deactivate = h.log.position("notes:deactivate").unwrap();
    let clear = h.log.position("notes:clear_session").unwrap();
    assert!(deactivate < clear);
}

#[tokio::test]
async fn test_deactivate_inactive_is_noop() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("notes", &[], Behaviour::Succeed).await;
    h.registry.deactivate("notes").await.unwrap();
    assert_eq!(h.log.count("notes:deactivate"), 0);
}

#[tokio::test]
async fn test_unregister_refused_with_registered_dependents() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("notes", &[], Behaviour::Succeed).await;
    h.add("editor", &["notes"], Behaviour::Succeed).await;

    assert!(matches!(
        h.registry.unregister("notes").await,
        Err(RegistryError::HasDependents { .. })
    ));

    let ctx = h.registry.context("editor").await.unwrap();
    h.registry.unregister("editor").await.unwrap();
    assert!(ctx.is_disposed());
    h.registry.unregister("notes").await.unwrap();
    assert!(h.registry.is_empty().await);
    assert!(matches!(
        h.registry.unregister("notes").await,
        Err(RegistryError::NotFound { .. })
    ));
}

#[tokio::test]
async fn test_failing_hook_stays_registered() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("broken", &[], Behaviour::Fail).await;
    h.add("fine", &[], Behaviour::Succeed).await;

    let err = h.registry.activate("broken").await.unwrap_err();
    assert!(matches!(err, RegistryError::ActivationFailed { ref message, .. } if message.contains("refused to start")));
    assert!(h.registry.is_registered("broken").await);
    assert!(!h.registry.is_active("broken").await);

    h.registry.activate("fine").await.unwrap();
    assert!(h.registry.is_active("fine").await);
}

#[tokio::test]
async fn test_panicking_hook_is_contained() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("boom", &[], Behaviour::Panic).await;
    let err = h.registry.activate("boom").await.unwrap_err();
    assert!(matches!(err, RegistryError::ActivationFailed { .. }));
    assert!(!h.registry.is_active("boom").await);
}

#[tokio::test]
async fn test_hanging_hook_times_out() {
    let h = Harness::new(SHORT_HOOK_TIMEOUT);
    h.add("stuck", &[], Behaviour::Hang).await;
    h.add("quick", &[], Behaviour::Succeed).await;

    let report: ActivationReport = h.registry.activate_all(true).await;
    assert_eq!(report.activated, vec!["quick"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "stuck");
    assert!(matches!(
        h.registry.activate("stuck").await,
        Err(RegistryError::ActivationTimeout { .. })
    ));
}

#[tokio::test]
async fn test_dependent_of_failed_extension_is_skipped() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("base", &[], Behaviour::Fail).await;
    h.add("child", &["base"], Behaviour::Succeed).await;
    h.add("other", &[], Behaviour::Succeed).await;

    let report = h.registry.activate_all(false).await;
    assert_eq!(report.activated, vec!["other"]);
    let failed: Vec<_> = report.failed.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(failed, vec!["base", "child"]);
    assert_eq!(h.log.count("child:activate"), 0);

    assert!(matches!(
        h.registry.activate("child").await,
        Err(RegistryError::DependencyFailed { ref dependency, .. }) if dependency == "base"
    ));
}

#[tokio::test]
async fn test_events_and_active_set() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    let mut events = h.registry.subscribe();
    h.add("notes", &[], Behaviour::Succeed).await;
    h.registry.activate("notes").await.unwrap();
    h.registry.deactivate("notes").await.unwrap();
    h.registry.unregister("notes").await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }

    assert!(matches!(&seen[0], RegistryEvent::Registered { extension_id, .. } if extension_id == "notes"));
    assert!(seen.iter().any(|e| matches!(e, RegistryEvent::Activated { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RegistryEvent::ActiveSetChanged { active } if active == &vec!["notes".to_string()])));
    assert!(seen
        .iter()
        .any(|e| matches!(e, RegistryEvent::ActiveSetChanged { active } if active.is_empty())));
    assert!(matches!(seen.last(), Some(RegistryEvent::Unregistered { .. })));
}

#[tokio::test]
async fn test_clear_unregisters_dependents_first() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("a", &[], Behaviour::Succeed).await;
    h.add("b", &["a"], Behaviour::Succeed).await;
    h.registry.activate_all(true).await;

    h.registry.clear().await;
    assert!(h.registry.is_empty().await);
    let b = h.log.position("b:deactivate").unwrap();
    let a = h.log.position("a:deactivate").unwrap();
    assert!(b < a);
}

#[tokio::test]
async fn test_store_slices_from_active_only() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("a", &[], Behaviour::Succeed).await;
    h.add("b", &[], Behaviour::Succeed).await;
    h.registry.activate("a").await.unwrap();

    let slices = h.registry.store_slices().await;
    assert_eq!(slices.keys().collect::<Vec<_>>(), vec!["a"]);
}

#[tokio::test]
async fn test_dependency_held_while_dependent_activates() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add("a", &[], Behaviour::Succeed).await;
    h.add("b", &["a"], Behaviour::Slow(Duration::from_millis(300)))
        .await;
    h.registry.activate("a").await.unwrap();

    let registry = Arc::clone(&h.registry);
    let pending = tokio::spawn(async move { registry.activate("b").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    match h.registry.deactivate("a").await {
        Err(RegistryError::HasDependents { id, dependents }) => {
            assert_eq!(id, "a");
            assert_eq!(dependents, vec!["b"]);
        }
        other => panic!("unexpected {other:?}"),
    }

    pending.await.unwrap().unwrap();
    assert!(h.registry.is_active("a").await);
    assert!(h.registry.is_active("b").await);
    assert_eq!(h.log.count("a:deactivate"), 0);
}

#[tokio::test]
async fn test_dependent_refused_while_dependency_stops() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    h.add_definition(
        "a",
        &[],
        MockDefinition::new("a", &h.log).slow_to_stop(Duration::from_millis(300)),
    )
    .await;
    h.add("b", &["a"], Behaviour::Succeed).await;
    h.registry.activate("a").await.unwrap();

    let registry = Arc::clone(&h.registry);
    let stopping = tokio::spawn(async move { registry.deactivate("a").await });
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        h.registry.activate("b").await,
        Err(RegistryError::DependencyInactive { ref dependency, .. }) if dependency == "a"
    ));
    stopping.await.unwrap().unwrap();

    assert!(!h.registry.is_active("a").await);
    assert!(!h.registry.is_active("b").await);
    assert_eq!(h.log.count("b:activate"), 0);

    h.registry.activate("b").await.unwrap();
    assert_eq!(h.registry.active_ids().await, vec!["a", "b"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_register_and_unregister_race_keeps_dependencies() {
    let h = Harness::new(TEST_HOOK_TIMEOUT);
    for _ in 0..50 {
        h.add("base", &[], Behaviour::Succeed).await;

        let registry = Arc::clone(&h.registry);
        let log = h.log.clone();
        let register = tokio::spawn(async move {
            registry
                .register(LoadedExtension::new(
                    ManifestBuilder::new("child").depends_on(&["base"]).build(),
                    MockDefinition::new("child", &log).arc(),
                    ProvenanceTier::Development,
                    "/nonexistent",
                ))
                .await
        });
        let registry = Arc::clone(&h.registry);
        let unregister = tokio::spawn(async move { registry.unregister("base").await });
        let _ = register.await.unwrap();
        let _ = unregister.await.unwrap();

        let child = h.registry.is_registered("child").await;
        let base = h.registry.is_registered("base").await;
        assert!(!child || base, "child registered without base");

        h.registry.clear().await;
        assert!(h.registry.is_empty().await);
    }
}
