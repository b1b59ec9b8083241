//! Component activator: owns the instances of one component.
//!
//! ## Instances
//! - single and container components: exactly one, created when the activator opens;
//! - factory components: one per factory configuration, keyed by its pid.
//!
//! Configurations present in the store when the activator opens are applied right away;
//! later changes arrive through [`configuration_updated`](ComponentActivator::configuration_updated)
//! and [`configuration_deleted`](ComponentActivator::configuration_deleted).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};

use super::instance::InstancePhase;
use super::Phase;
use crate::core::SubmissionContext;
use crate::error::LifecycleError;
use crate::live::ComponentLive;
use crate::op::{Op, OpKind};
use crate::properties::Properties;
use crate::template::{ComponentKind, ComponentTemplate, ConfigurationCardinality};

pub(crate) struct ComponentActivator {
    ctx: Arc<SubmissionContext>,
    live: Arc<ComponentLive>,
    instances: Mutex<Vec<Arc<InstancePhase>>>,
    opened: AtomicBool,
    guard: ReentrantMutex<()>,
}

impl ComponentActivator {
    pub(crate) fn new(ctx: Arc<SubmissionContext>, live: Arc<ComponentLive>) -> Self {
        Self {
            ctx,
            live,
            instances: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
            guard: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn template(&self) -> &Arc<ComponentTemplate> {
        self.live.template()
    }

    fn instance(&self, pid: Option<String>) -> Arc<InstancePhase> {
        let instance = InstancePhase::new(Arc::clone(&self.ctx), Arc::clone(self.template()), pid);
        self.seed(&instance);
        instance
    }

    /// Applies the singleton configurations the store already holds.
    fn seed(&self, instance: &InstancePhase) {
        let store = self.ctx.store();
        for template in &self.template().configurations {
            if template.cardinality != ConfigurationCardinality::One {
                continue;
            }
            if let Some(props) = store.get(&template.pid) {
                instance.configure(template, &template.pid, None, props);
            }
        }
    }

    fn mirror(&self, instances: &[Arc<InstancePhase>]) {
        self.live
            .set_instances(instances.iter().map(|i| Arc::clone(i.live())).collect());
    }

    /// Applies a created or updated configuration.
    ///
    /// Returns the instances that must be cycled for it to take effect.
    pub(crate) fn configuration_updated(
        &self,
        pid: &str,
        factory_pid: Option<&str>,
        props: Properties,
    ) -> Vec<Arc<InstancePhase>> {
        let _guard = self.guard.lock();
        if !self.opened.load(Ordering::Acquire) {
            return Vec::new();
        }

        let mut affected: Vec<Arc<InstancePhase>> = Vec::new();
        for template in self.template().configurations.iter().filter(|t| t.matches(pid, factory_pid)) {
            match template.cardinality {
                ConfigurationCardinality::Many => {
                    let existing = self
                        .instances
                        .lock()
                        .iter()
                        .find(|i| i.live().pid() == Some(pid))
                        .cloned();
                    let instance = match existing {
                        Some(instance) => instance,
                        None => {
                            let instance = self.instance(Some(pid.to_string()));
                            let instances = {
                                let mut instances = self.instances.lock();
                                instances.push(Arc::clone(&instance));
                                instances.clone()
                            };
                            self.mirror(&instances);
                            debug!(component = %self.live.name(), pid, "factory instance created");
                            instance
                        }
                    };
                    instance.configure(template, pid, factory_pid, props.clone());
                    push_unique(&mut affected, instance);
                }
                ConfigurationCardinality::One => {
                    let instances = self.instances.lock().clone();
                    for instance in instances {
                        instance.configure(template, pid, factory_pid, props.clone());
                        push_unique(&mut affected, instance);
                    }
                }
            }
        }
        affected
    }

    /// Applies a configuration deletion.
    ///
    /// Affected instances are closed now; returns those that must be reopened
    /// (their configuration was optional).
    pub(crate) fn configuration_deleted(
        &self,
        pid: &str,
        factory_pid: Option<&str>,
    ) -> Vec<Arc<InstancePhase>> {
        let _guard = self.guard.lock();
        if !self.opened.load(Ordering::Acquire) {
            return Vec::new();
        }

        let mut reopen: Vec<Arc<InstancePhase>> = Vec::new();
        for template in self.template().configurations.iter().filter(|t| t.matches(pid, factory_pid)) {
            match template.cardinality {
                ConfigurationCardinality::Many => {
                    let (removed, instances) = {
                        let mut instances = self.instances.lock();
                        let removed: Vec<_> = instances
                            .iter()
                            .filter(|i| i.live().pid() == Some(pid))
                            .cloned()
                            .collect();
                        instances.retain(|i| i.live().pid() != Some(pid));
                        (removed, instances.clone())
                    };
                    for instance in &removed {
                        instance.retire();
                        let _ = super::close(&self.ctx, instance);
                        instance.unconfigure(pid);
                        debug!(component = %self.live.name(), pid, "factory instance removed");
                    }
                    self.mirror(&instances);
                }
                ConfigurationCardinality::One => {
                    let instances = self.instances.lock().clone();
                    for instance in instances {
                        let _ = super::close(&self.ctx, &instance);
                        instance.unconfigure(pid);
                        if !template.is_required() {
                            push_unique(&mut reopen, instance);
                        }
                    }
                }
            }
        }
        reopen
    }
}

fn push_unique(list: &mut Vec<Arc<InstancePhase>>, instance: Arc<InstancePhase>) {
    if !list.iter().any(|i| Arc::ptr_eq(i, &instance)) {
        list.push(instance);
    }
}

impl Phase for ComponentActivator {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.opened.load(Ordering::Acquire) {
            return Ok(false);
        }

        let template = self.template();
        let instances: Vec<Arc<InstancePhase>> = match template.kind {
            ComponentKind::Factory => match template.factory_configuration() {
                Some(factory) => self
                    .ctx
                    .store()
                    .list_factory(&factory.pid)
                    .into_iter()
                    .map(|(pid, props)| {
                        let instance = self.instance(Some(pid.clone()));
                        instance.configure(factory, &pid, Some(factory.pid.as_str()), props);
                        instance
                    })
                    .collect(),
                None => Vec::new(),
            },
            ComponentKind::Single | ComponentKind::Container => vec![self.instance(None)],
        };
        *self.instances.lock() = instances.clone();
        self.opened.store(true, Ordering::Release);
        self.mirror(&instances);
        info!(component = %self.live.name(), instances = instances.len(), "component activator opened");

        for instance in &instances {
            if let Err(e) = instance.open() {
                self.ctx.record_error(format!("{}: {e}", instance.open_op()));
            }
        }
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let was = self.opened.swap(false, Ordering::AcqRel);
        let instances = std::mem::take(&mut *self.instances.lock());
        for instance in instances.iter().rev() {
            instance.retire();
            let _ = super::close(&self.ctx, instance);
        }
        if was {
            self.mirror(&[]);
            info!(component = %self.live.name(), "component activator closed");
        }
        was
    }

    fn open_op(&self) -> Op {
        Op::open(OpKind::ComponentActivator, self.live.name())
    }

    fn close_op(&self) -> Op {
        Op::close(OpKind::ComponentActivator, self.live.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::configuration::InMemoryConfigurationStore;
    use crate::core::test_context_with;
    use crate::injector::{Activation, Injector};
    use crate::live::{ChangeCount, InstanceState};
    use crate::registry::ComponentObject;
    use crate::template::ConfigurationTemplate;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl Injector for Counting {
        fn create(&self, _: &Activation<'_>) -> anyhow::Result<ComponentObject> {
            self.0.fetch_add(1, Ordering::SeqCst);
            let object: ComponentObject = Arc::new(());
            Ok(object)
        }
    }

    fn activator(
        template: ComponentTemplate,
    ) -> (Arc<InMemoryConfigurationStore>, Arc<Counting>, ComponentActivator) {
        let store = Arc::new(InMemoryConfigurationStore::new());
        let ctx = test_context_with(store.clone());
        let injector = Arc::new(Counting::default());
        ctx.injector().set(injector.clone());
        let live = Arc::new(ComponentLive::new(Arc::new(template), Arc::new(ChangeCount::default())));
        (store, injector, ComponentActivator::new(ctx, live))
    }

    fn states(activator: &ComponentActivator) -> Vec<InstanceState> {
        activator.live.instances().iter().map(|i| i.state()).collect()
    }

    #[tokio::test]
    async fn single_seeds_from_the_store() {
        let (store, injector, activator) = activator(
            ComponentTemplate::single("a").configuration(ConfigurationTemplate::required("svc.a")),
        );
        store.update("svc.a", Properties::new()).await;

        assert_eq!(activator.open(), Ok(true));
        assert_eq!(activator.open(), Ok(false));
        assert_eq!(states(&activator), vec![InstanceState::Active]);
        assert_eq!(injector.0.load(Ordering::SeqCst), 1);

        assert!(activator.close());
        assert!(activator.live.instances().is_empty());
    }

    #[tokio::test]
    async fn factory_tracks_configurations() {
        let (store, _injector, activator) = activator(
            ComponentTemplate::factory("pool").configuration(ConfigurationTemplate::factory("pool")),
        );
        let one = store.update_factory("pool", "one", Properties::new()).await;
        activator.open().unwrap();
        assert_eq!(states(&activator), vec![InstanceState::Active]);

        let affected = activator.configuration_updated("pool~two", Some("pool"), Properties::new());
        assert_eq!(affected.len(), 1);
        assert_eq!(activator.live.instances().len(), 2);

        let affected = activator.configuration_updated(&one, Some("pool"), Properties::new());
        assert_eq!(affected.len(), 1);
        assert_eq!(activator.live.instances().len(), 2);

        assert!(activator.configuration_deleted(&one, Some("pool")).is_empty());
        let left = activator.live.instances();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].pid(), Some("pool~two"));
    }

    #[tokio::test]
    async fn optional_deletion_asks_for_reopen() {
        let (store, _injector, activator) = activator(
            ComponentTemplate::single("a")
                .configuration(ConfigurationTemplate::optional("opt"))
                .configuration(ConfigurationTemplate::required("req")),
        );
        store.update("opt", Properties::new()).await;
        store.update("req", Properties::new()).await;
        activator.open().unwrap();
        assert_eq!(states(&activator), vec![InstanceState::Active]);

        let reopen = activator.configuration_deleted("opt", None);
        assert_eq!(reopen.len(), 1);
        assert_eq!(states(&activator), vec![InstanceState::Unresolved]);
        assert!(reopen[0].live().configuration_for("opt").is_none());

        assert!(activator.configuration_deleted("req", None).is_empty());
        assert_eq!(activator.live.instances().len(), 1);
    }

    #[tokio::test]
    async fn closed_activator_ignores_configuration() {
        let (_store, _injector, activator) = activator(
            ComponentTemplate::single("a").configuration(ConfigurationTemplate::required("svc.a")),
        );
        assert!(activator.configuration_updated("svc.a", None, Properties::new()).is_empty());
        assert!(activator.configuration_deleted("svc.a", None).is_empty());
        assert!(!activator.close());
    }
}
