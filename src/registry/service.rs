//! # Registry data model and the registry contract.
//!
//! A service is an object (or a factory of objects) published under one or more
//! service types with a property map. Consumers find services with a [`Filter`],
//! watch for changes, and obtain objects with [`ServiceRegistry::get_service`].
//!
//! ## Ordering
//! [`ServiceRef`] orders by `service.ranking` descending, then `service.id` ascending,
//! so `sort()` puts the best match first.

use std::any::Any;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::filter::Filter;
use crate::properties::{self, Properties};
use crate::template::ServiceScope;

/// An object handed out by the registry.
pub type ComponentObject = Arc<dyn Any + Send + Sync>;

/// Opaque identity of a consuming module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConsumerId(pub u64);

/// Handle to one registration.
#[derive(Clone, Debug)]
pub struct ServiceRef {
    id: u64,
    ranking: i64,
    properties: Arc<Properties>,
}

impl ServiceRef {
    pub(crate) fn new(id: u64, properties: Properties) -> Self {
        let ranking = match properties::integer(&properties, properties::SERVICE_RANKING) {
            Some(Ok(r)) => r,
            _ => 0,
        };
        Self {
            id,
            ranking,
            properties: Arc::new(properties),
        }
    }

    /// Registry-assigned `service.id`.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ranking(&self) -> i64 {
        self.ranking
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Service types this registration was published under.
    pub fn object_classes(&self) -> Vec<&str> {
        match self.properties.get(properties::OBJECT_CLASS) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(s)) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }
}

impl PartialEq for ServiceRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceRef {}

impl Ord for ServiceRef {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ranking
            .cmp(&self.ranking)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for ServiceRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

type GetFn = dyn Fn(ConsumerId) -> anyhow::Result<ComponentObject> + Send + Sync;
type UngetFn = dyn Fn(ConsumerId, &ComponentObject) + Send + Sync;

/// Per-consumer construction callbacks for bundle and prototype scoped services.
#[derive(Clone)]
pub struct ServiceFactory {
    scope: ServiceScope,
    get: Arc<GetFn>,
    unget: Arc<UngetFn>,
}

impl ServiceFactory {
    pub fn new<G, U>(scope: ServiceScope, get: G, unget: U) -> Self
    where
        G: Fn(ConsumerId) -> anyhow::Result<ComponentObject> + Send + Sync + 'static,
        U: Fn(ConsumerId, &ComponentObject) + Send + Sync + 'static,
    {
        Self {
            scope,
            get: Arc::new(get),
            unget: Arc::new(unget),
        }
    }

    pub fn scope(&self) -> ServiceScope {
        self.scope
    }

    pub(crate) fn get(&self, consumer: ConsumerId) -> anyhow::Result<ComponentObject> {
        (self.get)(consumer)
    }

    pub(crate) fn unget(&self, consumer: ConsumerId, object: &ComponentObject) {
        (self.unget)(consumer, object)
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceFactory")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// What a registration hands out.
#[derive(Clone)]
pub enum ServiceObject {
    /// The same object for every consumer.
    Singleton(ComponentObject),
    /// Objects built on demand.
    Factory(ServiceFactory),
}

impl ServiceObject {
    /// Value of the `service.scope` property for this object.
    pub fn scope_label(&self) -> &'static str {
        match self {
            ServiceObject::Singleton(_) => "singleton",
            ServiceObject::Factory(f) if f.scope() == ServiceScope::Prototype => "prototype",
            ServiceObject::Factory(_) => "bundle",
        }
    }
}

/// Kind of registry change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceEventKind {
    Registered,
    Modified,
    Unregistering,
}

/// A registry change delivered to watchers.
#[derive(Clone, Debug)]
pub struct ServiceEvent {
    pub kind: ServiceEventKind,
    pub reference: ServiceRef,
}

/// Receives registry changes for a watched filter.
///
/// Called on the thread that mutated the registry, never under a registry lock.
pub trait ServiceListener: Send + Sync {
    fn service_changed(&self, event: &ServiceEvent);
}

/// Identity of a registered watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);

/// The shared service registry.
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Publishes `object` under `object_classes`; returns its handle.
    fn register(
        &self,
        object_classes: &[String],
        properties: Properties,
        object: ServiceObject,
    ) -> ServiceRef;

    /// Removes a registration. Watchers observe the removal after it happened.
    fn unregister(&self, reference: &ServiceRef) -> bool;

    /// Replaces the properties of a registration; returns the updated handle.
    fn set_properties(&self, reference: &ServiceRef, properties: Properties) -> Option<ServiceRef>;

    /// All registrations matching `filter`, best first.
    fn find(&self, filter: &Filter) -> Vec<ServiceRef>;

    /// Starts delivering changes of registrations matching `filter`.
    fn watch(&self, filter: Filter, listener: Arc<dyn ServiceListener>) -> WatchId;

    fn unwatch(&self, id: WatchId);

    /// Obtains the object of a registration for `consumer`.
    ///
    /// Returns `Ok(None)` if the registration is gone.
    fn get_service(
        &self,
        reference: &ServiceRef,
        consumer: ConsumerId,
    ) -> anyhow::Result<Option<ComponentObject>>;

    /// Releases an object obtained with [`get_service`](Self::get_service).
    fn unget_service(&self, reference: &ServiceRef, consumer: ConsumerId, object: &ComponentObject)
    -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(id: u64, ranking: i64) -> ServiceRef {
        let mut p = Properties::new();
        p.insert(properties::SERVICE_RANKING.into(), json!(ranking));
        ServiceRef::new(id, p)
    }

    #[test]
    fn best_match_sorts_first() {
        let mut refs = vec![service(1, 0), service(2, 10), service(3, 10), service(4, -5)];
        refs.sort();
        let ids: Vec<u64> = refs.iter().map(ServiceRef::id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }
}
