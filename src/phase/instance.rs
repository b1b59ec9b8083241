//! Instance phase: gate on configuration, compute properties, open the references.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use super::references::ReferencesPhase;
use super::{Phase, transition};
use crate::core::{Completion, SubmissionContext};
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};
use crate::live::{ConfigurationLive, InstanceLive, InstanceState};
use crate::op::{Op, OpKind};
use crate::properties::{self, Identity, Properties};
use crate::template::{ComponentKind, ComponentTemplate, ConfigurationTemplate};

/// One activation attempt of a component.
pub(crate) struct InstancePhase {
    ctx: Arc<SubmissionContext>,
    template: Arc<ComponentTemplate>,
    live: Arc<InstanceLive>,
    references: Arc<ReferencesPhase>,
    retired: AtomicBool,
    opened: AtomicBool,
    guard: ReentrantMutex<()>,
}

impl InstancePhase {
    /// Creates the instance; `pid` is the identifying factory configuration.
    pub(crate) fn new(
        ctx: Arc<SubmissionContext>,
        template: Arc<ComponentTemplate>,
        pid: Option<String>,
    ) -> Arc<Self> {
        let name: Arc<str> = match &pid {
            Some(pid) => format!("{}[{pid}]", template.name).into(),
            None => template.name.as_str().into(),
        };
        let live = Arc::new(InstanceLive::new(
            name,
            ctx.next_id(),
            pid,
            Arc::clone(ctx.changes()),
        ));
        Arc::new_cyclic(|me| Self {
            references: ReferencesPhase::new(
                Arc::clone(&ctx),
                Arc::clone(&template),
                Arc::clone(&live),
                me.clone(),
            ),
            ctx,
            template,
            live,
            retired: AtomicBool::new(false),
            opened: AtomicBool::new(false),
            guard: ReentrantMutex::new(()),
        })
    }

    pub(crate) fn live(&self) -> &Arc<InstanceLive> {
        &self.live
    }

    fn kind(&self) -> OpKind {
        match self.template.kind {
            ComponentKind::Container => OpKind::ContainerInstance,
            ComponentKind::Single => OpKind::SingleInstance,
            ComponentKind::Factory => OpKind::FactoryInstance,
        }
    }

    /// Excludes the instance from further opens; it is about to be dropped.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Every required configuration template has a configuration.
    pub(crate) fn is_configured(&self) -> bool {
        self.template
            .configurations
            .iter()
            .filter(|t| t.is_required())
            .all(|t| self.live.configuration_for(&t.pid).is_some())
    }

    /// Records `props` as the configuration satisfying `template`.
    pub(crate) fn configure(
        &self,
        template: &ConfigurationTemplate,
        pid: &str,
        factory_pid: Option<&str>,
        props: Properties,
    ) {
        self.live.put_configuration(ConfigurationLive {
            template: template.clone(),
            pid: pid.to_string(),
            factory_pid: factory_pid.map(str::to_string),
            properties: props,
        });
        trace!(instance = %self.live.name(), pid, "configuration applied");
        self.ctx.bus().publish(
            Event::new(EventKind::ConfigurationApplied)
                .with_component(self.template.name.as_str())
                .with_instance(self.live.name().clone())
                .with_pid(pid),
        );
    }

    /// Drops the configuration with `pid`.
    pub(crate) fn unconfigure(&self, pid: &str) -> bool {
        if !self.live.remove_configuration(pid) {
            return false;
        }
        self.ctx.bus().publish(
            Event::new(EventKind::ConfigurationRemoved)
                .with_component(self.template.name.as_str())
                .with_instance(self.live.name().clone())
                .with_pid(pid),
        );
        true
    }

    /// Closes now and queues a reopen; the completion is the reopen's.
    pub(crate) fn cycle(self: &Arc<Self>) -> Completion {
        let _ = super::close(&self.ctx, self);
        super::open(&self.ctx, self)
    }

    fn merged(&self) -> Properties {
        let configs = self.live.configurations();
        let ordered = self.template.configurations.iter().filter_map(|t| {
            configs
                .iter()
                .find(|c| c.template.pid == t.pid)
                .map(|c| &c.properties)
        });
        properties::merge(
            &self.template.properties,
            ordered,
            Identity::new(&self.template.name, self.live.id()),
        )
    }
}

impl Phase for InstancePhase {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.retired.load(Ordering::Acquire) || self.opened.load(Ordering::Acquire) {
            return Ok(false);
        }
        if !self.is_configured() {
            debug!(instance = %self.live.name(), "waiting for configuration");
            return Ok(false);
        }

        self.live.set_properties(self.merged());
        transition(&self.ctx, &self.template.name, &self.live, InstanceState::ConfigResolved);
        self.opened.store(true, Ordering::Release);
        if let Err(e) = self.references.open() {
            self.references.close();
            self.opened.store(false, Ordering::Release);
            transition(&self.ctx, &self.template.name, &self.live, InstanceState::Unresolved);
            return Err(e);
        }
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let was = self.opened.swap(false, Ordering::AcqRel);
        if was {
            self.references.close();
        }
        transition(&self.ctx, &self.template.name, &self.live, InstanceState::Unresolved);
        was
    }

    fn open_op(&self) -> Op {
        Op::open(self.kind(), self.live.name().clone())
    }

    fn close_op(&self) -> Op {
        Op::close(self.kind(), self.live.name().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::core::test_context;
    use crate::filter::Filter;
    use crate::injector::{Activation, Injector};
    use crate::op::OpMode;
    use crate::registry::{ComponentObject, ServiceObject, ServiceRegistry};
    use crate::template::{ConfigurationTemplate, ReferenceTemplate, ServiceScope};

    struct Unit;

    impl Injector for Unit {
        fn create(&self, _: &Activation<'_>) -> anyhow::Result<ComponentObject> {
            let object: ComponentObject = Arc::new(());
            Ok(object)
        }
    }

    fn instance(template: ComponentTemplate) -> (Arc<SubmissionContext>, Arc<InstancePhase>) {
        let ctx = test_context();
        ctx.injector().set(Arc::new(Unit));
        let instance = InstancePhase::new(Arc::clone(&ctx), Arc::new(template), None);
        (ctx, instance)
    }

    fn published(ctx: &SubmissionContext, ty: &str) -> usize {
        ctx.registry().find(&Filter::object_class(ty)).len()
    }

    fn one(pairs: &[(&str, serde_json::Value)]) -> Properties {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn waits_for_required_configuration() {
        let template = ComponentTemplate::single("a")
            .scope(ServiceScope::Singleton)
            .service("A")
            .property("x", 0)
            .configuration(ConfigurationTemplate::required("svc.a"));
        let (ctx, instance) = instance(template.clone());

        assert_eq!(instance.open(), Ok(false));
        assert_eq!(instance.live().state(), InstanceState::Unresolved);

        instance.configure(&template.configurations[0], "svc.a", None, one(&[("x", json!(1))]));
        assert_eq!(instance.open(), Ok(true));
        assert_eq!(instance.open(), Ok(false));
        assert_eq!(instance.live().state(), InstanceState::Active);
        assert_eq!(published(&ctx, "A"), 1);

        let props = instance.live().properties();
        assert_eq!(props["x"], json!(1));
        assert_eq!(props[properties::COMPONENT_NAME], json!("a"));
        assert_eq!(props[properties::COMPONENT_ID], json!(instance.live().id()));

        assert!(instance.close());
        assert_eq!(instance.live().state(), InstanceState::Unresolved);
        assert_eq!(published(&ctx, "A"), 0);
    }

    #[tokio::test]
    async fn unsatisfied_reference_keeps_it_unresolved() {
        let template = ComponentTemplate::single("a")
            .scope(ServiceScope::Singleton)
            .service("A")
            .reference(ReferenceTemplate::mandatory("foo", "Foo"));
        let (ctx, instance) = instance(template);

        assert_eq!(instance.open(), Ok(true));
        assert_eq!(instance.live().state(), InstanceState::Unresolved);
        assert_eq!(instance.live().references().len(), 1);
        assert!(!instance.live().references()[0].is_satisfied());

        let reopened = ctx.watch(|op| op.is(OpMode::Open, OpKind::SingleInstance, "a"));
        ctx.registry().register(
            &["Foo".to_string()],
            Properties::new(),
            ServiceObject::Singleton(Arc::new(())),
        );
        assert_eq!(reopened.await, Ok(true));
        assert_eq!(instance.live().state(), InstanceState::Active);
        assert_eq!(published(&ctx, "A"), 1);
    }

    #[tokio::test]
    async fn bad_override_fails_and_resets() {
        let template = ComponentTemplate::single("a")
            .property("foo.target", "(broken")
            .reference(ReferenceTemplate::mandatory("foo", "Foo"));
        let (_ctx, instance) = instance(template);
        assert_eq!(instance.open().map_err(|e| e.as_label()), Err("lifecycle_reference"));
        assert_eq!(instance.live().state(), InstanceState::Unresolved);
        assert!(!instance.close());
    }

    #[tokio::test]
    async fn retired_instance_never_opens() {
        let (_ctx, instance) = instance(ComponentTemplate::single("a"));
        instance.retire();
        assert_eq!(instance.open(), Ok(false));
    }

    #[tokio::test]
    async fn factory_instance_is_named_after_its_pid() {
        let ctx = test_context();
        let template = Arc::new(
            ComponentTemplate::factory("pool").configuration(ConfigurationTemplate::factory("pool")),
        );
        let instance = InstancePhase::new(ctx, template, Some("pool~one".into()));
        assert_eq!(&**instance.live().name(), "pool[pool~one]");
        assert_eq!(instance.open_op().to_string(), "open:factory-instance:pool[pool~one]");
    }
}
