//! # Instance activators.
//!
//! The terminal phase of the chain: once an instance is configured and every reference is
//! satisfied, its [`InstanceActivator`] builds the component object and publishes it.
//!
//! | Scope       | Open                                             | Close                          |
//! |-------------|--------------------------------------------------|--------------------------------|
//! | `None`      | build one object, hold it (immediate)            | destroy it                     |
//! | `Singleton` | build one object, register it                    | unregister, destroy            |
//! | `Bundle`    | register a factory; one object per consumer      | unregister, release held ones  |
//! | `Prototype` | register a factory; one object per request       | unregister, release held ones  |
//!
//! Registered properties are the merged instance properties; the registry adds
//! `service.id`, `objectClass` and `service.scope`.

mod provider;

use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};

use self::provider::Provider;
use crate::core::SubmissionContext;
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};
use crate::injector::{Bindings, Injector};
use crate::live::{InstanceLive, InstanceState};
use crate::op::{Op, OpKind};
use crate::phase::{self, Phase};
use crate::registry::{ComponentObject, ServiceObject, ServiceRef};
use crate::template::{ComponentTemplate, ServiceScope};

struct Held {
    injector: Arc<dyn Injector>,
    object: ComponentObject,
}

struct Active {
    provider: Arc<Provider>,
    held: Option<Held>,
    registration: Option<ServiceRef>,
}

/// Terminal phase: builds and publishes one instance's component object.
pub(crate) struct InstanceActivator {
    ctx: Arc<SubmissionContext>,
    template: Arc<ComponentTemplate>,
    live: Arc<InstanceLive>,
    bindings: Arc<Mutex<Bindings>>,
    active: Mutex<Option<Active>>,
    guard: ReentrantMutex<()>,
}

impl InstanceActivator {
    pub(crate) fn new(ctx: Arc<SubmissionContext>, template: Arc<ComponentTemplate>, live: Arc<InstanceLive>) -> Self {
        Self {
            ctx,
            template,
            live,
            bindings: Arc::new(Mutex::new(Bindings::new())),
            active: Mutex::new(None),
            guard: ReentrantMutex::new(()),
        }
    }

    fn kind(&self) -> OpKind {
        match self.template.scope {
            ServiceScope::None => OpKind::ImmediateActivator,
            ServiceScope::Singleton => OpKind::SingletonActivator,
            ServiceScope::Bundle => OpKind::BundleActivator,
            ServiceScope::Prototype => OpKind::PrototypeActivator,
        }
    }

    /// Bindings handed to the next construction.
    pub(crate) fn set_bindings(&self, bindings: Bindings) {
        *self.bindings.lock() = bindings;
    }

    /// Services currently bound to `reference`.
    pub(crate) fn bound(&self, reference: &str) -> Vec<ServiceRef> {
        self.bindings.lock().get(reference).cloned().unwrap_or_default()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Registration of the published service, if any.
    #[cfg(test)]
    pub(crate) fn registration(&self) -> Option<ServiceRef> {
        self.active.lock().as_ref().and_then(|a| a.registration.clone())
    }

    /// Replaces the bindings and pushes them into every live object.
    ///
    /// Returns `Ok(false)` when nothing is active.
    pub(crate) fn rebind(&self, bindings: Bindings) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        self.set_bindings(bindings);
        let (provider, held) = match self.active.lock().as_ref() {
            Some(active) => (
                Arc::clone(&active.provider),
                active.held.as_ref().map(|h| (h.injector.clone(), h.object.clone())),
            ),
            None => return Ok(false),
        };
        if let Some((injector, object)) = held {
            provider.rebind(injector.as_ref(), None, &object)?;
        }
        provider.rebind_all()?;
        debug!(instance = %self.live.name(), "bindings pushed");
        Ok(true)
    }

    /// Builds the held object for scopes that have one.
    fn construct(&self, provider: &Provider) -> Result<Option<Held>, LifecycleError> {
        match self.template.scope {
            ServiceScope::None | ServiceScope::Singleton => {
                let (injector, object) = provider.create(None)?;
                Ok(Some(Held { injector, object }))
            }
            ServiceScope::Bundle | ServiceScope::Prototype => Ok(None),
        }
    }

    /// What the registry hands out; `None` for unpublished scopes.
    fn service_object(&self, provider: &Arc<Provider>, held: Option<&Held>) -> Option<ServiceObject> {
        match (self.template.scope, held) {
            (ServiceScope::None, _) | (ServiceScope::Singleton, None) => None,
            (ServiceScope::Singleton, Some(held)) => Some(ServiceObject::Singleton(held.object.clone())),
            (scope, _) => Some(ServiceObject::Factory(provider.factory(scope))),
        }
    }
}

impl Phase for InstanceActivator {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.is_active() {
            return Ok(false);
        }

        let provider = Arc::new(Provider::new(
            Arc::clone(self.ctx.registry()),
            self.ctx.injector().clone(),
            Arc::clone(&self.template),
            self.live.name().clone(),
            self.live.id(),
            self.live.properties(),
            Arc::clone(&self.bindings),
        ));
        let held = self.construct(&provider)?;
        let object = self.service_object(&provider, held.as_ref());
        *self.active.lock() = Some(Active {
            provider,
            held,
            registration: None,
        });

        let service = match object {
            Some(object) => {
                let props = (*self.live.properties()).clone();
                let service = self.ctx.registry().register(&self.template.service_types, props, object);
                let mut active = self.active.lock();
                match active.as_mut() {
                    Some(active) => active.registration = Some(service.clone()),
                    None => {
                        // closed by a registry notification while publishing
                        drop(active);
                        self.ctx.registry().unregister(&service);
                        return Ok(false);
                    }
                }
                Some(service)
            }
            None => None,
        };

        phase::transition(&self.ctx, &self.template.name, &self.live, InstanceState::Active);
        if let Some(service) = &service {
            info!(instance = %self.live.name(), service = service.id(), "service published");
            self.ctx.bus().publish(
                Event::new(EventKind::ServicePublished)
                    .with_component(self.template.name.as_str())
                    .with_instance(self.live.name().clone())
                    .with_service(service.id()),
            );
        } else {
            info!(instance = %self.live.name(), "component activated");
        }
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let Some(active) = self.active.lock().take() else {
            return false;
        };

        if let Some(service) = &active.registration {
            self.ctx.registry().unregister(service);
            info!(instance = %self.live.name(), service = service.id(), "service unpublished");
            self.ctx.bus().publish(
                Event::new(EventKind::ServiceUnpublished)
                    .with_component(self.template.name.as_str())
                    .with_instance(self.live.name().clone())
                    .with_service(service.id()),
            );
        }
        active.provider.release_all();
        if let Some(held) = &active.held {
            active.provider.destroy(held.injector.as_ref(), None, &held.object);
        }
        if self.live.state() == InstanceState::Active {
            phase::transition(&self.ctx, &self.template.name, &self.live, InstanceState::ReferencesResolved);
        }
        true
    }

    fn open_op(&self) -> Op {
        Op::open(self.kind(), self.live.name().clone())
    }

    fn close_op(&self) -> Op {
        Op::close(self.kind(), self.live.name().clone())
    }
}

impl Drop for InstanceActivator {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::core::test_context;
    use crate::filter::Filter;
    use crate::injector::Activation;
    use crate::registry::ConsumerId;

    #[derive(Default)]
    struct Counting {
        created: AtomicUsize,
        destroyed: AtomicUsize,
        rebound: AtomicUsize,
    }

    impl Injector for Counting {
        fn create(&self, a: &Activation<'_>) -> anyhow::Result<ComponentObject> {
            if a.properties.contains_key("fail") {
                anyhow::bail!("refused");
            }
            let object: ComponentObject = Arc::new(self.created.fetch_add(1, Ordering::SeqCst));
            Ok(object)
        }

        fn destroy(&self, _: &Activation<'_>, _: &ComponentObject) {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
        }

        fn rebind(&self, _: &Activation<'_>, _: &ComponentObject) -> anyhow::Result<()> {
            self.rebound.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn activator(scope: ServiceScope) -> (Arc<SubmissionContext>, Arc<Counting>, InstanceActivator) {
        let ctx = test_context();
        let injector = Arc::new(Counting::default());
        ctx.injector().set(injector.clone());
        let template = Arc::new(ComponentTemplate::single("greeter").scope(scope).service("Greeter"));
        let live = Arc::new(InstanceLive::new("greeter".into(), 1, None, Arc::clone(ctx.changes())));
        let activator = InstanceActivator::new(Arc::clone(&ctx), template, live);
        (ctx, injector, activator)
    }

    fn greeters(ctx: &SubmissionContext) -> Vec<ServiceRef> {
        ctx.registry().find(&Filter::object_class("Greeter"))
    }

    #[tokio::test]
    async fn singleton_publishes_once() {
        let (ctx, injector, activator) = activator(ServiceScope::Singleton);
        assert_eq!(activator.open(), Ok(true));
        assert_eq!(activator.open(), Ok(false));
        assert_eq!(greeters(&ctx).len(), 1);
        assert_eq!(injector.created.load(Ordering::SeqCst), 1);

        assert!(activator.close());
        assert!(!activator.close());
        assert!(greeters(&ctx).is_empty());
        assert_eq!(injector.destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn immediate_is_not_published() {
        let (ctx, injector, activator) = activator(ServiceScope::None);
        assert_eq!(activator.open(), Ok(true));
        assert!(greeters(&ctx).is_empty());
        assert_eq!(injector.created.load(Ordering::SeqCst), 1);
        assert_eq!(activator.live.state(), InstanceState::Active);
    }

    #[tokio::test]
    async fn bundle_builds_per_consumer() {
        let (ctx, injector, activator) = activator(ServiceScope::Bundle);
        activator.open().unwrap();
        assert_eq!(injector.created.load(Ordering::SeqCst), 0);

        let service = activator.registration().unwrap();
        let registry = ctx.registry();
        let a1 = registry.get_service(&service, ConsumerId(1)).unwrap().unwrap();
        let a2 = registry.get_service(&service, ConsumerId(1)).unwrap().unwrap();
        let b = registry.get_service(&service, ConsumerId(2)).unwrap().unwrap();
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(injector.created.load(Ordering::SeqCst), 2);

        registry.unget_service(&service, ConsumerId(2), &b);
        assert_eq!(injector.destroyed.load(Ordering::SeqCst), 1);

        activator.close();
        assert_eq!(injector.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn prototype_releases_leftovers_on_close() {
        let (ctx, injector, activator) = activator(ServiceScope::Prototype);
        activator.open().unwrap();
        let service = activator.registration().unwrap();
        let registry = ctx.registry();
        let _x = registry.get_service(&service, ConsumerId(1)).unwrap().unwrap();
        let _y = registry.get_service(&service, ConsumerId(1)).unwrap().unwrap();
        assert_eq!(injector.created.load(Ordering::SeqCst), 2);

        activator.close();
        assert_eq!(injector.destroyed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn construction_failure_leaves_nothing_published() {
        let (ctx, _injector, activator) = activator(ServiceScope::Singleton);
        let mut props = crate::properties::Properties::new();
        props.insert("fail".into(), serde_json::json!(true));
        activator.live.set_properties(props);

        let err = activator.open().unwrap_err();
        assert_eq!(err.as_label(), "lifecycle_activation");
        assert!(!activator.is_active());
        assert!(greeters(&ctx).is_empty());
    }

    #[tokio::test]
    async fn missing_injector_is_reported() {
        let ctx = test_context();
        let template = Arc::new(ComponentTemplate::single("greeter"));
        let live = Arc::new(InstanceLive::new("greeter".into(), 1, None, Arc::clone(ctx.changes())));
        let activator = InstanceActivator::new(ctx, template, live);
        assert_eq!(
            activator.open().map_err(|e| e.as_label()),
            Err("lifecycle_injector_unavailable")
        );
    }

    #[tokio::test]
    async fn rebind_reaches_the_live_object() {
        let (_ctx, injector, activator) = activator(ServiceScope::Singleton);
        assert_eq!(activator.rebind(Bindings::new()), Ok(false));
        activator.open().unwrap();
        assert_eq!(activator.rebind(Bindings::new()), Ok(true));
        assert_eq!(injector.rebound.load(Ordering::SeqCst), 1);
    }
}
