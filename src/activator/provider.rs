//! Construction and release of component objects for one activation.
//!
//! Every activator variant funnels through [`Provider`]: it resolves the injector, builds
//! the [`Activation`] once per construction and keeps one record per handed-out object so
//! a release always finds the injector that built it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::LifecycleError;
use crate::injector::{Activation, Bindings, Injector, InjectorHandle};
use crate::properties::Properties;
use crate::registry::{ComponentObject, ConsumerId, ServiceFactory, ServiceRegistry};
use crate::template::{ComponentTemplate, ServiceScope};

/// Identity of a handed-out object: the consumer and the object's address.
type RecordKey = (ConsumerId, usize);

struct Record {
    injector: Arc<dyn Injector>,
    object: ComponentObject,
}

fn key(consumer: ConsumerId, object: &ComponentObject) -> RecordKey {
    (consumer, Arc::as_ptr(object) as *const () as usize)
}

pub(super) struct Provider {
    registry: Arc<dyn ServiceRegistry>,
    injector: InjectorHandle,
    template: Arc<ComponentTemplate>,
    instance: Arc<str>,
    id: u64,
    properties: Arc<Properties>,
    bindings: Arc<Mutex<Bindings>>,
    records: Mutex<HashMap<RecordKey, Record>>,
}

impl Provider {
    pub(super) fn new(
        registry: Arc<dyn ServiceRegistry>,
        injector: InjectorHandle,
        template: Arc<ComponentTemplate>,
        instance: Arc<str>,
        id: u64,
        properties: Arc<Properties>,
        bindings: Arc<Mutex<Bindings>>,
    ) -> Self {
        Self {
            registry,
            injector,
            template,
            instance,
            id,
            properties,
            bindings,
            records: Mutex::new(HashMap::new()),
        }
    }

    fn activation<'a>(&'a self, bindings: &'a Bindings, consumer: Option<ConsumerId>) -> Activation<'a> {
        Activation {
            template: &self.template,
            instance: &self.instance,
            id: self.id,
            properties: &self.properties,
            bindings,
            consumer,
            registry: self.registry.as_ref(),
        }
    }

    /// Builds one object.
    pub(super) fn create(
        &self,
        consumer: Option<ConsumerId>,
    ) -> Result<(Arc<dyn Injector>, ComponentObject), LifecycleError> {
        let injector = self
            .injector
            .get()
            .ok_or_else(|| LifecycleError::InjectorUnavailable {
                component: self.instance.clone(),
            })?;
        let bindings = self.bindings.lock().clone();
        let object = injector
            .create(&self.activation(&bindings, consumer))
            .map_err(|e| LifecycleError::activation(&self.instance, format!("{e:#}")))?;
        debug!(instance = %self.instance, consumer = ?consumer, "component object created");
        Ok((injector, object))
    }

    /// Releases one object built by [`create`](Self::create).
    pub(super) fn destroy(&self, injector: &dyn Injector, consumer: Option<ConsumerId>, object: &ComponentObject) {
        let bindings = self.bindings.lock().clone();
        injector.destroy(&self.activation(&bindings, consumer), object);
        debug!(instance = %self.instance, consumer = ?consumer, "component object destroyed");
    }

    /// Builds an object for `consumer` and records it.
    fn get(&self, consumer: ConsumerId) -> anyhow::Result<ComponentObject> {
        let (injector, object) = self.create(Some(consumer))?;
        self.records.lock().insert(
            key(consumer, &object),
            Record {
                injector,
                object: object.clone(),
            },
        );
        Ok(object)
    }

    /// Releases the object `consumer` obtained; unknown objects are ignored.
    fn unget(&self, consumer: ConsumerId, object: &ComponentObject) {
        let record = self.records.lock().remove(&key(consumer, object));
        match record {
            Some(record) => self.destroy(record.injector.as_ref(), Some(consumer), &record.object),
            None => warn!(instance = %self.instance, consumer = ?consumer, "release of an unknown object"),
        }
    }

    /// Releases every object still held by a consumer.
    pub(super) fn release_all(&self) {
        let records: Vec<_> = self.records.lock().drain().collect();
        for ((consumer, _), record) in records {
            self.destroy(record.injector.as_ref(), Some(consumer), &record.object);
        }
    }

    /// Pushes the current bindings into `object`.
    pub(super) fn rebind(&self, injector: &dyn Injector, consumer: Option<ConsumerId>, object: &ComponentObject) -> Result<(), LifecycleError> {
        let bindings = self.bindings.lock().clone();
        injector
            .rebind(&self.activation(&bindings, consumer), object)
            .map_err(|e| LifecycleError::activation(&self.instance, format!("rebind: {e:#}")))
    }

    /// Pushes the current bindings into every object held by a consumer.
    pub(super) fn rebind_all(&self) -> Result<(), LifecycleError> {
        let held: Vec<_> = self
            .records
            .lock()
            .iter()
            .map(|((consumer, _), r)| (*consumer, r.injector.clone(), r.object.clone()))
            .collect();
        for (consumer, injector, object) in held {
            self.rebind(injector.as_ref(), Some(consumer), &object)?;
        }
        Ok(())
    }

    /// Registry factory delegating to this provider.
    pub(super) fn factory(self: &Arc<Self>, scope: ServiceScope) -> ServiceFactory {
        let get = Arc::clone(self);
        let unget = Arc::clone(self);
        ServiceFactory::new(
            scope,
            move |consumer| get.get(consumer),
            move |consumer, object| unget.unget(consumer, object),
        )
    }
}
