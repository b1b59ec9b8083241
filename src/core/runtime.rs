//! # Runtime: one container of components.
//!
//! The [`Runtime`] owns the submission context, the container phase and the event fan-out.
//! It is built by [`RuntimeBuilder`](crate::RuntimeBuilder), started once, and stopped once.
//!
//! ## Architecture
//! ```text
//! RuntimeBuilder::build()
//!   ├─ Bus + SubscriberSet + event listener task
//!   ├─ SubmissionContext (+ sequencer task)
//!   ├─ validate templates ──► invalid ones recorded as errors, excluded
//!   └─ ContainerPhase [ComponentPhase ...]
//!
//! start():  wait for injector (bounded) ──► RuntimeStarted ──► OPEN container (sequenced)
//! stop():   closing = true ──► RuntimeStopping ──► CLOSE container (on the caller)
//!           ──► RuntimeStopped ──► cancel token ──► join tasks ──► drain subscribers
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use scrim::{
//!     Activation, ComponentObject, ComponentTemplate, ConfigurationTemplate, Injector,
//!     InjectorHandle, InMemoryConfigurationStore, InstanceState, Runtime, RuntimeConfig,
//!     ServiceScope, properties::Properties,
//! };
//!
//! struct Hello;
//!
//! impl Injector for Hello {
//!     fn create(&self, _: &Activation<'_>) -> anyhow::Result<ComponentObject> {
//!         let object: ComponentObject = Arc::new("hello");
//!         Ok(object)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryConfigurationStore::new());
//!     let runtime = Runtime::builder(RuntimeConfig::default())
//!         .with_configuration_store(store.clone())
//!         .with_injector(InjectorHandle::with(Arc::new(Hello)))
//!         .with_template(
//!             ComponentTemplate::single("greeter")
//!                 .scope(ServiceScope::Singleton)
//!                 .service("Greeter")
//!                 .configuration(ConfigurationTemplate::required("greeter")),
//!         )
//!         .build();
//!
//!     runtime.start().await?;
//!     store.update("greeter", Properties::new()).await;
//!
//!     let snapshot = runtime.snapshot();
//!     assert_eq!(snapshot.components[0].instances[0].state, InstanceState::Active);
//!     runtime.stop().await;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::builder::RuntimeBuilder;
use super::completion::Completion;
use super::config::RuntimeConfig;
use super::context::SubmissionContext;
use crate::configuration::ConfigurationStore;
use crate::error::RuntimeError;
use crate::events::{Bus, Event, EventKind};
use crate::injector::InjectorHandle;
use crate::introspection::{ComponentSnapshot, RuntimeSnapshot};
use crate::op::Op;
use crate::phase::{self, ComponentPhase, ContainerPhase, Phase};
use crate::registry::ServiceRegistry;
use crate::subscribers::SubscriberSet;

/// A running container of components.
pub struct Runtime {
    cfg: RuntimeConfig,
    ctx: Arc<SubmissionContext>,
    container: Arc<ContainerPhase>,
    subs: Arc<SubscriberSet>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Runtime {
    /// Starts building a runtime.
    pub fn builder(cfg: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        cfg: RuntimeConfig,
        ctx: Arc<SubmissionContext>,
        container: Arc<ContainerPhase>,
        subs: Arc<SubscriberSet>,
        tasks: Vec<JoinHandle<()>>,
    ) -> Self {
        Self {
            cfg,
            ctx,
            container,
            subs,
            started: AtomicBool::new(false),
            tasks: Mutex::new(tasks),
        }
    }

    /// Opens the container once the injector is ready.
    ///
    /// Waits for the injector up to `RuntimeConfig::injector_timeout` and fails with
    /// [`RuntimeError::InjectorTimeout`] without opening anything if it elapses. Resolves
    /// when the container open (and every activation it cascaded into) has finished.
    /// Starting twice is a no-op.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.ctx.is_closing() {
            return Err(RuntimeError::Closing {
                name: self.cfg.name.clone(),
            });
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(timeout) = self.cfg.injector_wait() {
            if self.ctx.injector().wait(timeout).await.is_none() {
                self.started.store(false, Ordering::Release);
                let err = RuntimeError::InjectorTimeout { timeout };
                self.ctx.record_error(err.to_string());
                return Err(err);
            }
        }

        info!(runtime = %self.cfg.name, components = self.container.components().len(), "runtime starting");
        self.ctx.bus().publish(Event::new(EventKind::RuntimeStarted));
        phase::open(&self.ctx, &self.container).await?;
        Ok(())
    }

    /// Closes every component and stops the runtime's tasks; idempotent.
    ///
    /// Opens submitted from now on resolve with `Ok(false)` without running.
    pub async fn stop(&self) {
        if self.ctx.begin_closing() {
            return;
        }
        info!(runtime = %self.cfg.name, "runtime stopping");
        self.ctx.bus().publish(Event::new(EventKind::RuntimeStopping));
        let _ = phase::close(&self.ctx, &self.container);
        self.ctx.bus().publish(Event::new(EventKind::RuntimeStopped));

        self.ctx.token().cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(runtime = %self.cfg.name, error = %e, "runtime task failed");
            }
        }
        self.subs.shutdown().await;
        info!(runtime = %self.cfg.name, "runtime stopped");
    }

    fn component(&self, name: &str) -> Result<&Arc<ComponentPhase>, RuntimeError> {
        self.container
            .components()
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| RuntimeError::UnknownComponent {
                name: name.to_string(),
            })
    }

    /// Enables a component and, if the runtime is started, submits its open.
    pub fn enable_component(&self, name: &str) -> Result<Completion, RuntimeError> {
        if self.ctx.is_closing() {
            return Err(RuntimeError::Closing {
                name: self.cfg.name.clone(),
            });
        }
        let component = self.component(name)?;
        component.live().set_enabled(true);
        if self.container.is_open() {
            Ok(phase::open(&self.ctx, component))
        } else {
            Ok(Completion::ready(component.open_op(), Ok(false)))
        }
    }

    /// Disables a component and closes it; resolved on return.
    pub fn disable_component(&self, name: &str) -> Result<Completion, RuntimeError> {
        let component = self.component(name)?;
        component.live().set_enabled(false);
        Ok(phase::close(&self.ctx, component))
    }

    /// Resolves with the outcome of the next op matching `predicate`.
    ///
    /// Register before triggering the change you want to observe.
    pub fn watch<P>(&self, predicate: P) -> Completion
    where
        P: Fn(&Op) -> bool + Send + Sync + 'static,
    {
        self.ctx.watch(predicate)
    }

    /// Current state, re-derived from the live objects.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let change_count = self.ctx.change_count();
        RuntimeSnapshot {
            name: self.cfg.name.clone(),
            errors: self.ctx.errors(),
            components: self
                .container
                .components()
                .iter()
                .map(|c| ComponentSnapshot::of(c.live()))
                .collect(),
            change_count,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.cfg
    }

    pub fn context(&self) -> &Arc<SubmissionContext> {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        self.ctx.registry()
    }

    pub fn store(&self) -> &Arc<dyn ConfigurationStore> {
        self.ctx.store()
    }

    pub fn injector(&self) -> &InjectorHandle {
        self.ctx.injector()
    }

    /// Event bus of this runtime.
    pub fn bus(&self) -> &Bus {
        self.ctx.bus()
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.ctx.token().cancel();
    }
}

/// Forwards bus events to the subscriber set until cancelled, then drains what is left.
pub(crate) fn event_listener(bus: &Bus, subs: Arc<SubscriberSet>, token: CancellationToken) -> JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                ev = rx.recv() => match ev {
                    Ok(ev) => subs.emit(&ev),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged");
                    }
                    Err(RecvError::Closed) => return,
                },
            }
        }
        loop {
            match rx.try_recv() {
                Ok(ev) => subs.emit(&ev),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
    })
}
