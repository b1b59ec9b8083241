//! # Dependency-injection collaborator.
//!
//! The runtime decides **when** a component may run; an [`Injector`] decides **how** its
//! object is built. At activation time the runtime hands over an [`Activation`]: the
//! merged properties and the bound references. The injector returns the constructed
//! object or an opaque error.
//!
//! The injector may become available after the runtime was built. [`InjectorHandle`]
//! holds it and lets [`Runtime::start`](crate::Runtime::start) wait for it with a bound.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::properties::Properties;
use crate::registry::{ComponentObject, ConsumerId, ServiceRef, ServiceRegistry};
use crate::template::ComponentTemplate;

/// Bound references by reference name, best match first.
pub type Bindings = BTreeMap<String, Vec<ServiceRef>>;

/// Everything an injector gets to build one component object.
pub struct Activation<'a> {
    pub template: &'a ComponentTemplate,
    /// Instance name.
    pub instance: &'a str,
    /// Runtime-unique instance id.
    pub id: u64,
    /// Merged properties.
    pub properties: &'a Properties,
    pub bindings: &'a Bindings,
    /// Consuming module for bundle/prototype scoped objects.
    pub consumer: Option<ConsumerId>,
    /// Registry to fetch bound service objects from.
    pub registry: &'a dyn ServiceRegistry,
}

impl Activation<'_> {
    /// The best bound match of `reference`, if any.
    pub fn first(&self, reference: &str) -> Option<&ServiceRef> {
        self.bindings.get(reference).and_then(|refs| refs.first())
    }

    /// All bound matches of `reference`.
    pub fn bound(&self, reference: &str) -> &[ServiceRef] {
        self.bindings.get(reference).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Builds and tears down component objects.
pub trait Injector: Send + Sync + 'static {
    /// Constructs the object of one activation.
    fn create(&self, activation: &Activation<'_>) -> anyhow::Result<ComponentObject>;

    /// Releases an object built by [`create`](Self::create).
    fn destroy(&self, _activation: &Activation<'_>, _object: &ComponentObject) {}

    /// Pushes changed bindings of a dynamic reference into a live object.
    fn rebind(&self, _activation: &Activation<'_>, _object: &ComponentObject) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Late-bound injector slot.
#[derive(Clone)]
pub struct InjectorHandle {
    tx: Arc<watch::Sender<Option<Arc<dyn Injector>>>>,
}

impl Default for InjectorHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InjectorHandle {
    /// Empty handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Handle that is ready immediately.
    pub fn with(injector: Arc<dyn Injector>) -> Self {
        let handle = Self::new();
        handle.set(injector);
        handle
    }

    /// Installs (or replaces) the injector and wakes waiters.
    pub fn set(&self, injector: Arc<dyn Injector>) {
        self.tx.send_replace(Some(injector));
    }

    /// Current injector, if set.
    pub fn get(&self) -> Option<Arc<dyn Injector>> {
        self.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Waits up to `timeout` for the injector to be set.
    ///
    /// Returns `None` on timeout.
    pub async fn wait(&self, timeout: Duration) -> Option<Arc<dyn Injector>> {
        let mut rx = self.tx.subscribe();
        let ready = tokio::time::timeout(timeout, rx.wait_for(Option::is_some)).await;
        match ready {
            Ok(Ok(slot)) => (*slot).clone(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nop;

    impl Injector for Nop {
        fn create(&self, _: &Activation<'_>) -> anyhow::Result<ComponentObject> {
            Ok(Arc::new(()))
        }
    }

    #[tokio::test]
    async fn wait_times_out_when_never_set() {
        let handle = InjectorHandle::new();
        assert!(handle.wait(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn wait_wakes_on_late_set() {
        let handle = InjectorHandle::new();
        let setter = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            setter.set(Arc::new(Nop));
        });
        assert!(handle.wait(Duration::from_secs(5)).await.is_some());
        assert!(handle.is_ready());
    }
}
