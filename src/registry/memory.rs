//! # In-process service registry.
//!
//! [`InMemoryRegistry`] keeps registrations in a map guarded by one mutex.
//!
//! ## Rules
//! - The lock is never held while calling a listener or a service factory.
//! - A removal is applied before watchers are told about it, so a watcher that
//!   re-queries sees the post-removal view.
//! - Bundle-scoped objects are cached per `(service, consumer)` with a use count;
//!   prototype-scoped objects are built on every `get_service`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use scrim::{Filter, InMemoryRegistry, ServiceObject, ServiceRegistry, properties::Properties};
//!
//! let registry = InMemoryRegistry::new();
//! let svc = registry.register(
//!     &["com.acme.Log".to_string()],
//!     Properties::new(),
//!     ServiceObject::Singleton(Arc::new("stdout")),
//! );
//! let found = registry.find(&Filter::object_class("com.acme.Log"));
//! assert_eq!(found, vec![svc]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, warn};

use super::service::{
    ComponentObject, ConsumerId, ServiceEvent, ServiceEventKind, ServiceListener, ServiceObject,
    ServiceRef, ServiceRegistry, WatchId,
};
use crate::filter::Filter;
use crate::properties::{self, Properties};
use crate::template::ServiceScope;

struct Registration {
    reference: ServiceRef,
    object_classes: Vec<String>,
    object: ServiceObject,
}

struct Watch {
    id: WatchId,
    filter: Filter,
    listener: Arc<dyn ServiceListener>,
}

struct Cached {
    object: ComponentObject,
    uses: usize,
}

#[derive(Default)]
struct Inner {
    services: BTreeMap<u64, Registration>,
    watches: Vec<Watch>,
    bundles: HashMap<(u64, ConsumerId), Cached>,
}

impl Inner {
    fn listeners_for(&self, refs: &[&ServiceRef]) -> Vec<Arc<dyn ServiceListener>> {
        self.watches
            .iter()
            .filter(|w| refs.iter().any(|r| w.filter.matches(r.properties())))
            .map(|w| Arc::clone(&w.listener))
            .collect()
    }
}

/// Thread-safe registry living in this process.
#[derive(Default)]
pub struct InMemoryRegistry {
    inner: Mutex<Inner>,
    ids: AtomicU64,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations.
    pub fn len(&self) -> usize {
        self.inner.lock().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn decorate(
        &self,
        id: u64,
        object_classes: &[String],
        mut props: Properties,
        object: &ServiceObject,
    ) -> Properties {
        props.insert(properties::SERVICE_ID.into(), Value::from(id));
        props.insert(
            properties::OBJECT_CLASS.into(),
            Value::Array(object_classes.iter().cloned().map(Value::from).collect()),
        );
        props.insert(properties::SERVICE_SCOPE.into(), Value::from(object.scope_label()));
        props
    }

    fn notify(listeners: Vec<Arc<dyn ServiceListener>>, event: ServiceEvent) {
        for listener in listeners {
            listener.service_changed(&event);
        }
    }
}

impl ServiceRegistry for InMemoryRegistry {
    fn register(
        &self,
        object_classes: &[String],
        properties: Properties,
        object: ServiceObject,
    ) -> ServiceRef {
        let id = self.next_id();
        let props = self.decorate(id, object_classes, properties, &object);
        let reference = ServiceRef::new(id, props);

        let listeners = {
            let mut inner = self.inner.lock();
            inner.services.insert(
                id,
                Registration {
                    reference: reference.clone(),
                    object_classes: object_classes.to_vec(),
                    object,
                },
            );
            inner.listeners_for(&[&reference])
        };
        debug!(service = id, classes = ?object_classes, "service registered");

        Self::notify(
            listeners,
            ServiceEvent {
                kind: ServiceEventKind::Registered,
                reference: reference.clone(),
            },
        );
        reference
    }

    fn unregister(&self, reference: &ServiceRef) -> bool {
        let (registration, listeners, cached) = {
            let mut inner = self.inner.lock();
            let Some(registration) = inner.services.remove(&reference.id()) else {
                return false;
            };
            let listeners = inner.listeners_for(&[&registration.reference]);
            let keys: Vec<(u64, ConsumerId)> = inner
                .bundles
                .keys()
                .filter(|(service, _)| *service == reference.id())
                .copied()
                .collect();
            let cached: Vec<(ConsumerId, Cached)> = keys
                .into_iter()
                .filter_map(|k| inner.bundles.remove(&k).map(|c| (k.1, c)))
                .collect();
            (registration, listeners, cached)
        };
        debug!(service = reference.id(), "service unregistered");

        Self::notify(
            listeners,
            ServiceEvent {
                kind: ServiceEventKind::Unregistering,
                reference: registration.reference.clone(),
            },
        );

        if let ServiceObject::Factory(factory) = &registration.object {
            for (consumer, cached) in cached {
                factory.unget(consumer, &cached.object);
            }
        }
        true
    }

    fn set_properties(&self, reference: &ServiceRef, properties: Properties) -> Option<ServiceRef> {
        let (updated, listeners) = {
            let mut inner = self.inner.lock();
            let registration = inner.services.get(&reference.id())?;
            let props = self.decorate(
                reference.id(),
                &registration.object_classes,
                properties,
                &registration.object,
            );
            let updated = ServiceRef::new(reference.id(), props);
            let previous = registration.reference.clone();
            if let Some(registration) = inner.services.get_mut(&reference.id()) {
                registration.reference = updated.clone();
            }
            let listeners = inner.listeners_for(&[&previous, &updated]);
            (updated, listeners)
        };

        Self::notify(
            listeners,
            ServiceEvent {
                kind: ServiceEventKind::Modified,
                reference: updated.clone(),
            },
        );
        Some(updated)
    }

    fn find(&self, filter: &Filter) -> Vec<ServiceRef> {
        let mut out: Vec<ServiceRef> = self
            .inner
            .lock()
            .services
            .values()
            .filter(|r| filter.matches(r.reference.properties()))
            .map(|r| r.reference.clone())
            .collect();
        out.sort();
        out
    }

    fn watch(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> WatchId {
        let id = WatchId(self.next_id());
        self.inner.lock().watches.push(Watch {
            id,
            filter,
            listener,
        });
        id
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.lock().watches.retain(|w| w.id != id);
    }

    fn get_service(
        &self,
        reference: &ServiceRef,
        consumer: ConsumerId,
    ) -> anyhow::Result<Option<ComponentObject>> {
        let factory = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(registration) = inner.services.get(&reference.id()) else {
                return Ok(None);
            };
            let factory = match &registration.object {
                ServiceObject::Singleton(object) => return Ok(Some(Arc::clone(object))),
                ServiceObject::Factory(factory) => factory.clone(),
            };
            if factory.scope() != ServiceScope::Prototype {
                if let Some(cached) = inner.bundles.get_mut(&(reference.id(), consumer)) {
                    cached.uses += 1;
                    return Ok(Some(Arc::clone(&cached.object)));
                }
            }
            factory
        };

        let object = factory.get(consumer)?;
        if factory.scope() == ServiceScope::Prototype {
            return Ok(Some(object));
        }

        let mut inner = self.inner.lock();
        if !inner.services.contains_key(&reference.id()) {
            drop(inner);
            factory.unget(consumer, &object);
            return Ok(None);
        }
        let cached = inner
            .bundles
            .entry((reference.id(), consumer))
            .or_insert_with(|| Cached {
                object: Arc::clone(&object),
                uses: 0,
            });
        cached.uses += 1;
        let shared = Arc::clone(&cached.object);
        drop(inner);
        if !Arc::ptr_eq(&shared, &object) {
            // lost a race with another get for the same consumer
            factory.unget(consumer, &object);
        }
        Ok(Some(shared))
    }

    fn unget_service(
        &self,
        reference: &ServiceRef,
        consumer: ConsumerId,
        object: &ComponentObject,
    ) -> bool {
        let (factory, release) = {
            let mut guard = self.inner.lock();
            let inner = &mut *guard;
            let Some(registration) = inner.services.get(&reference.id()) else {
                return false;
            };
            let factory = match &registration.object {
                ServiceObject::Singleton(_) => return true,
                ServiceObject::Factory(factory) => factory.clone(),
            };
            if factory.scope() == ServiceScope::Prototype {
                (factory, Some(Arc::clone(object)))
            } else {
                let key = (reference.id(), consumer);
                match inner.bundles.get_mut(&key) {
                    Some(cached) if cached.uses > 1 => {
                        cached.uses -= 1;
                        (factory, None)
                    }
                    Some(_) => (factory, inner.bundles.remove(&key).map(|c| c.object)),
                    None => {
                        warn!(service = reference.id(), consumer = consumer.0, "unget without get");
                        return false;
                    }
                }
            }
        };
        if let Some(object) = release {
            factory.unget(consumer, &object);
        }
        true
    }
}
