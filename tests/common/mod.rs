#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use scrim::{
    Activation, ComponentObject, ComponentTemplate, Event, EventKind, InMemoryConfigurationStore,
    Injector, InjectorHandle, InstanceState, Runtime, RuntimeConfig, ServiceObject, ServiceRef,
    ServiceRegistry, Subscribe, properties::Properties,
};

/// Injector that records every call it receives.
#[derive(Default)]
pub struct Recording {
    pub created: Mutex<Vec<String>>,
    pub destroyed: Mutex<Vec<String>>,
    /// `(instance, number of bound services per reference)` per rebind.
    pub rebinds: Mutex<Vec<(String, usize)>>,
    /// Time every `create` takes.
    pub delay: Mutex<Duration>,
}

impl Recording {
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.lock().len()
    }
}

impl Injector for Recording {
    fn create(&self, activation: &Activation<'_>) -> anyhow::Result<ComponentObject> {
        if activation.properties.contains_key("fail") {
            bail!("refusing to build {}", activation.instance);
        }
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.created.lock().push(activation.instance.to_string());
        let object: ComponentObject = Arc::new(activation.id);
        Ok(object)
    }

    fn destroy(&self, activation: &Activation<'_>, _object: &ComponentObject) {
        self.destroyed.lock().push(activation.instance.to_string());
    }

    fn rebind(&self, activation: &Activation<'_>, _object: &ComponentObject) -> anyhow::Result<()> {
        let bound = activation.bindings.values().map(Vec::len).sum();
        self.rebinds
            .lock()
            .push((activation.instance.to_string(), bound));
        Ok(())
    }
}

/// Subscriber collecting event kinds.
#[derive(Default)]
pub struct Collect(pub Mutex<Vec<EventKind>>);

#[async_trait]
impl Subscribe for Collect {
    async fn on_event(&self, event: &Event) {
        self.0.lock().push(event.kind);
    }

    fn name(&self) -> &'static str {
        "collect"
    }
}

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub store: Arc<InMemoryConfigurationStore>,
    pub injector: Arc<Recording>,
}

impl Harness {
    pub fn new(templates: Vec<ComponentTemplate>) -> Self {
        Self::with_config(RuntimeConfig::default(), templates)
    }

    pub fn with_config(cfg: RuntimeConfig, templates: Vec<ComponentTemplate>) -> Self {
        let store = Arc::new(InMemoryConfigurationStore::new());
        let injector = Arc::new(Recording::default());
        let runtime = Runtime::builder(cfg)
            .with_configuration_store(store.clone())
            .with_injector(InjectorHandle::with(injector.clone()))
            .with_templates(templates)
            .build();
        Self {
            runtime,
            store,
            injector,
        }
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        self.runtime.registry()
    }

    /// States of the instances of `component`, in instance order.
    pub fn states(&self, component: &str) -> Vec<InstanceState> {
        self.runtime
            .snapshot()
            .component(component)
            .map(|c| c.instances.iter().map(|i| i.state).collect())
            .unwrap_or_default()
    }

    pub fn state(&self, component: &str) -> Option<InstanceState> {
        self.states(component).first().copied()
    }

    /// Registrations published under `service_type`, best first.
    pub fn published(&self, service_type: &str) -> Vec<ServiceRef> {
        self.registry()
            .find(&scrim::Filter::object_class(service_type))
    }
}

pub fn props(value: Value) -> Properties {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

/// Registers a plain `Foo` service.
pub fn foo(registry: &Arc<dyn ServiceRegistry>, value: Value) -> ServiceRef {
    registry.register(
        &["Foo".to_string()],
        props(value),
        ServiceObject::Singleton(Arc::new(())),
    )
}

/// Polls `check` until it holds or a second elapsed.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
