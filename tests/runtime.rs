mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::{Collect, Harness, Recording, props};
use scrim::{
    ComponentTemplate, ConfigurationTemplate, EventKind, InjectorHandle, InstanceState, Op, OpKind,
    Runtime, RuntimeConfig, RuntimeError, ServiceScope, Subscribe,
};

fn published_a() -> ComponentTemplate {
    ComponentTemplate::single("a").scope(ServiceScope::Singleton).service("A")
}

#[tokio::test]
async fn opening_twice_publishes_once() {
    let h = Harness::new(vec![published_a()]);
    h.runtime.start().await.unwrap();
    h.runtime.start().await.unwrap();
    assert_eq!(h.published("A").len(), 1);

    assert_eq!(h.runtime.enable_component("a").unwrap().await, Ok(false));
    assert_eq!(h.published("A").len(), 1);
    assert_eq!(h.injector.created(), 1);
    h.runtime.stop().await;
}

#[tokio::test]
async fn stop_closes_everything_and_suppresses_opens() {
    let h = Harness::new(vec![published_a()]);
    h.runtime.start().await.unwrap();
    h.runtime.stop().await;

    assert!(h.published("A").is_empty());
    assert_eq!(h.injector.destroyed(), 1);
    assert!(h.runtime.snapshot().component("a").unwrap().instances.is_empty());

    let suppressed = h
        .runtime
        .context()
        .submit(Op::open(OpKind::SingleComponent, "a"), || Ok(true));
    assert_eq!(suppressed.await, Ok(false));
    assert!(matches!(h.runtime.enable_component("a"), Err(RuntimeError::Closing { .. })));
    assert!(matches!(h.runtime.start().await, Err(RuntimeError::Closing { .. })));

    // idempotent
    h.runtime.stop().await;
}

#[tokio::test]
async fn start_fails_when_the_injector_never_shows_up() {
    let cfg = RuntimeConfig {
        injector_timeout: Duration::from_millis(20),
        ..RuntimeConfig::default()
    };
    let injector = InjectorHandle::new();
    let runtime = Runtime::builder(cfg)
        .with_injector(injector.clone())
        .with_template(published_a())
        .build();

    let err = runtime.start().await.unwrap_err();
    assert!(matches!(err, RuntimeError::InjectorTimeout { .. }));
    assert_eq!(err.as_label(), "runtime_injector_timeout");
    let snapshot = runtime.snapshot();
    assert_eq!(snapshot.errors.len(), 1);
    assert!(snapshot.component("a").unwrap().instances.is_empty());

    injector.set(Arc::new(Recording::default()));
    runtime.start().await.unwrap();
    assert_eq!(
        runtime.snapshot().component("a").unwrap().instances[0].state,
        InstanceState::Active
    );
    runtime.stop().await;
}

#[tokio::test]
async fn components_can_be_disabled_and_enabled() {
    let h = Harness::new(vec![published_a().enabled(false)]);
    h.runtime.start().await.unwrap();
    let snapshot = h.runtime.snapshot();
    let a = snapshot.component("a").unwrap();
    assert!(!a.enabled);
    assert!(a.instances.is_empty());

    assert_eq!(h.runtime.enable_component("a").unwrap().await, Ok(true));
    assert_eq!(h.state("a"), Some(InstanceState::Active));
    assert_eq!(h.published("A").len(), 1);

    assert_eq!(h.runtime.disable_component("a").unwrap().await, Ok(true));
    assert!(h.published("A").is_empty());
    assert!(!h.runtime.snapshot().component("a").unwrap().enabled);

    assert!(matches!(
        h.runtime.enable_component("missing"),
        Err(RuntimeError::UnknownComponent { .. })
    ));
    h.runtime.stop().await;
}

#[tokio::test]
async fn invalid_templates_are_recorded_and_skipped() {
    let h = Harness::new(vec![
        ComponentTemplate::factory("broken"),
        published_a(),
        ComponentTemplate::single("a"),
    ]);
    h.runtime.start().await.unwrap();

    let snapshot = h.runtime.snapshot();
    assert_eq!(snapshot.errors.len(), 2);
    assert_eq!(snapshot.components.len(), 1);
    assert_eq!(h.state("a"), Some(InstanceState::Active));
    h.runtime.stop().await;
}

#[tokio::test]
async fn activation_failure_is_contained() {
    let h = Harness::new(vec![
        published_a()
            .configuration(ConfigurationTemplate::required("svc.a")),
        ComponentTemplate::single("b").scope(ServiceScope::Singleton).service("B"),
    ]);
    h.runtime.start().await.unwrap();
    h.store.update("svc.a", props(json!({ "fail": true }))).await;

    assert_eq!(h.state("a"), Some(InstanceState::Unresolved));
    assert_eq!(h.state("b"), Some(InstanceState::Active));
    let errors = h.runtime.snapshot().errors;
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("refusing to build a"), "{errors:?}");

    h.store.update("svc.a", props(json!({}))).await;
    assert_eq!(h.state("a"), Some(InstanceState::Active));
    h.runtime.stop().await;
}

#[tokio::test]
async fn change_count_tracks_structural_changes() {
    let h = Harness::new(vec![published_a().configuration(ConfigurationTemplate::required("svc.a"))]);
    h.runtime.start().await.unwrap();

    let first = h.runtime.snapshot();
    let second = h.runtime.snapshot();
    assert_eq!(first.change_count, second.change_count);

    h.store.update("svc.a", props(json!({ "x": 1 }))).await;
    let third = h.runtime.snapshot();
    assert!(third.change_count > second.change_count);

    let json = serde_json::to_value(&third).unwrap();
    assert_eq!(json["changeCount"], json!(third.change_count));
    assert_eq!(json["components"][0]["instances"][0]["state"], "ACTIVE");
    assert_eq!(json["components"][0]["instances"][0]["properties"]["x"], 1);
    h.runtime.stop().await;
}

#[tokio::test]
async fn subscribers_see_the_lifecycle() {
    let collect = Arc::new(Collect::default());
    let subs: Vec<Arc<dyn Subscribe>> = vec![collect.clone()];
    let runtime = Runtime::builder(RuntimeConfig::default())
        .with_subscribers(subs)
        .with_injector(InjectorHandle::with(Arc::new(Recording::default())))
        .with_template(published_a())
        .build();
    runtime.start().await.unwrap();
    runtime.stop().await;

    let seen = collect.0.lock().clone();
    let position = |kind: EventKind| seen.iter().position(|k| *k == kind);
    let started = position(EventKind::RuntimeStarted).unwrap();
    let published = position(EventKind::ServicePublished).unwrap();
    let unpublished = position(EventKind::ServiceUnpublished).unwrap();
    let stopped = position(EventKind::RuntimeStopped).unwrap();
    assert!(started < published && published < unpublished && unpublished < stopped);
    assert!(seen.contains(&EventKind::InstanceStateChanged));
}
