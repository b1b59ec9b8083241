use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::config::RuntimeConfig;
use super::context::SubmissionContext;
use super::runtime::{self, Runtime};
use crate::configuration::{ConfigurationStore, InMemoryConfigurationStore};
use crate::error::TemplateError;
use crate::events::Bus;
use crate::injector::InjectorHandle;
use crate::live::ComponentLive;
use crate::phase::{ComponentPhase, ContainerPhase};
use crate::registry::{InMemoryRegistry, ServiceRegistry};
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::template::ComponentTemplate;

/// Builder for a [`Runtime`].
///
/// Collaborators left unset default to the in-memory registry, the in-memory
/// configuration store and an empty injector handle.
pub struct RuntimeBuilder {
    cfg: RuntimeConfig,
    subscribers: Vec<Arc<dyn Subscribe>>,
    registry: Option<Arc<dyn ServiceRegistry>>,
    store: Option<Arc<dyn ConfigurationStore>>,
    injector: InjectorHandle,
    templates: Vec<ComponentTemplate>,
}

impl RuntimeBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RuntimeConfig) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            registry: None,
            store: None,
            injector: InjectorHandle::new(),
            templates: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Shares a registry with other runtimes (or with the application).
    pub fn with_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_configuration_store(mut self, store: Arc<dyn ConfigurationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Injector slot; it may be filled after the runtime was built.
    pub fn with_injector(mut self, injector: InjectorHandle) -> Self {
        self.injector = injector;
        self
    }

    pub fn with_template(mut self, template: ComponentTemplate) -> Self {
        self.templates.push(template);
        self
    }

    pub fn with_templates(mut self, templates: impl IntoIterator<Item = ComponentTemplate>) -> Self {
        self.templates.extend(templates);
        self
    }

    /// Builds the runtime; must be called inside a tokio runtime.
    ///
    /// Templates failing validation, or reusing a component name, are recorded in the
    /// runtime error list and excluded from activation.
    pub fn build(self) -> Arc<Runtime> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let token = CancellationToken::new();
        let listener = runtime::event_listener(&bus, Arc::clone(&subs), token.clone());

        let registry: Arc<dyn ServiceRegistry> = match self.registry {
            Some(registry) => registry,
            None => Arc::new(InMemoryRegistry::new()),
        };
        let store: Arc<dyn ConfigurationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryConfigurationStore::new()),
        };
        let (ctx, sequencer) =
            SubmissionContext::start(&self.cfg, bus, registry, store, self.injector, token);

        let mut names = HashSet::new();
        let mut components = Vec::with_capacity(self.templates.len());
        for template in self.templates {
            let accepted = template.validate().and_then(|()| {
                if names.insert(template.name.clone()) {
                    Ok(())
                } else {
                    Err(TemplateError::DuplicateComponent {
                        component: template.name.clone(),
                    })
                }
            });
            if let Err(e) = accepted {
                warn!(component = %template.name, error = e.as_label(), "template rejected");
                ctx.record_error(e.to_string());
                continue;
            }
            let live = Arc::new(ComponentLive::new(Arc::new(template), Arc::clone(ctx.changes())));
            components.push(Arc::new(ComponentPhase::new(Arc::clone(&ctx), live)));
        }
        let container = Arc::new(ContainerPhase::new(Arc::clone(&ctx), components));

        Arc::new(Runtime::new_internal(
            self.cfg,
            ctx,
            container,
            subs,
            vec![sequencer, listener],
        ))
    }
}
