//! # scrim
//!
//! **Scrim** is a dependency-driven component lifecycle engine.
//!
//! Components are declared as [`ComponentTemplate`]s: which services they provide, which
//! configurations they need, and which services they reference. The runtime activates a
//! component once everything it depends on is present, publishes its services into a
//! [`ServiceRegistry`], and tears it down again when a dependency goes away.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ComponentTemplate  ComponentTemplate  ComponentTemplate
//!          └─────────────────┼─────────────────┘
//!                            ▼
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  Runtime                                                         │
//! │  - SubmissionContext (closes inline, opens sequenced)            │
//! │  - ServiceRegistry, ConfigurationStore, InjectorHandle           │
//! │  - Bus + SubscriberSet (event fan-out)                           │
//! └──────────────────────────────┬───────────────────────────────────┘
//!                                ▼
//!                         ContainerPhase
//!                                │ one per template
//!                                ▼
//!                         ComponentPhase ◄──── configuration events
//!                                │
//!                                ▼
//!                       ComponentActivator
//!                                │ one per instance (factory: one per configuration)
//!                                ▼
//!                         InstancePhase      gate: required configurations
//!                                │
//!                                ▼
//!                        ReferencesPhase ◄──── registry events (ReferenceResolver)
//!                                │           gate: every reference satisfied
//!                                ▼
//!                       InstanceActivator ───► register / unregister services
//! ```
//!
//! ### Instance states
//! ```text
//! UNRESOLVED ──► CONFIG_RESOLVED ──► REFERENCES_RESOLVED ──► ACTIVE
//!     ▲                                                        │
//!     └──────────────── close (any dependency lost) ───────────┘
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                                 |
//! |-------------------|---------------------------------------------------------------|----------------------------------------------------|
//! | **Templates**     | Declare components, configurations and references.            | [`ComponentTemplate`], [`ReferenceTemplate`]       |
//! | **Runtime**       | Start, stop, enable and disable components.                   | [`Runtime`], [`RuntimeBuilder`], [`RuntimeConfig`] |
//! | **Registry**      | Publish and look up services by filter.                       | [`ServiceRegistry`], [`Filter`]                    |
//! | **Configuration** | Supply component configurations, notify on change.            | [`ConfigurationStore`]                             |
//! | **Injection**     | Create component objects with their bound references.         | [`Injector`], [`Activation`]                       |
//! | **Introspection** | Read-only snapshots of every instance.                        | [`RuntimeSnapshot`]                                |
//! | **Subscriber API**| Hook into lifecycle events.                                   | [`Subscribe`], [`Event`]                           |
//! | **Errors**        | Typed errors for templates, lifecycle and the runtime.        | [`TemplateError`], [`LifecycleError`]              |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use scrim::{
//!     Activation, ComponentObject, ComponentTemplate, Injector, InjectorHandle, InstanceState,
//!     ReferenceTemplate, Runtime, RuntimeConfig, ServiceScope,
//! };
//!
//! struct Unit;
//!
//! impl Injector for Unit {
//!     fn create(&self, _: &Activation<'_>) -> anyhow::Result<ComponentObject> {
//!         let object: ComponentObject = Arc::new(());
//!         Ok(object)
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn scrim::Subscribe>> = vec![Arc::new(scrim::LogWriter::default())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn scrim::Subscribe>> = Vec::new();
//!
//!     let runtime = Runtime::builder(RuntimeConfig::default())
//!         .with_subscribers(subs)
//!         .with_injector(InjectorHandle::with(Arc::new(Unit)))
//!         .with_template(
//!             ComponentTemplate::single("provider")
//!                 .scope(ServiceScope::Singleton)
//!                 .service("Foo"),
//!         )
//!         .with_template(
//!             ComponentTemplate::single("consumer")
//!                 .reference(ReferenceTemplate::mandatory("foo", "Foo")),
//!         )
//!         .build();
//!
//!     runtime.start().await?;
//!
//!     let snapshot = runtime.snapshot();
//!     let state = snapshot.component("consumer").map(|c| c.instances[0].state);
//!     assert_eq!(state, Some(InstanceState::Active));
//!     runtime.stop().await;
//!     Ok(())
//! }
//! ```
mod activator;
mod configuration;
mod core;
mod error;
mod events;
mod filter;
mod injector;
mod introspection;
mod live;
mod op;
mod phase;
pub mod properties;
mod reference;
mod registry;
mod subscribers;
mod template;

// ---- Public re-exports ----

pub use configuration::{
    ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ConfigurationStore,
    InMemoryConfigurationStore, ListenerId,
};
pub use self::core::{Completion, OpOutcome, Runtime, RuntimeBuilder, RuntimeConfig, SubmissionContext};
pub use error::{FilterError, LifecycleError, RuntimeError, TemplateError};
pub use events::{Bus, Event, EventKind};
pub use filter::Filter;
pub use injector::{Activation, Bindings, Injector, InjectorHandle};
pub use introspection::{
    ComponentSnapshot, ConfigurationSnapshot, InstanceSnapshot, ReferenceSnapshot, RuntimeSnapshot,
};
pub use live::{ChangeCount, ComponentLive, ConfigurationLive, InstanceLive, InstanceState, ReferenceLive};
pub use op::{Op, OpKind, OpMode};
pub use reference::{ReferenceChange, ReferenceResolver};
pub use registry::{
    ComponentObject, ConsumerId, InMemoryRegistry, ServiceEvent, ServiceEventKind, ServiceFactory,
    ServiceListener, ServiceObject, ServiceRef, ServiceRegistry, WatchId,
};
pub use subscribers::{Subscribe, SubscriberSet};
pub use template::{
    ComponentKind, ComponentTemplate, ConfigurationCardinality, ConfigurationPolicy,
    ConfigurationTemplate, PolicyOption, ReferencePolicy, ReferenceTemplate, ServiceScope,
};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
