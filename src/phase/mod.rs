//! # Phase chain.
//!
//! A component's activation is a chain of phases, each guarding the next:
//!
//! ```text
//! ContainerPhase ──► ComponentPhase ──► ComponentActivator ──► InstancePhase ──► ReferencesPhase ──► InstanceActivator
//!  (one/runtime)     (one/template)      (owns instances)      (one/instance)     (one resolver       (immediate, singleton,
//!                     gate: enabled                             gate: required      per reference)      bundle, prototype)
//!                                                               configs present     gate: satisfied
//! ```
//!
//! ## Rules
//! - `open()` is idempotent: already open or preconditions unmet → `Ok(false)`, no side effects.
//! - `close()` is safe on an unopened phase and always closes `next` if it was opened.
//! - A phase only opens `next` after its own open succeeded.
//! - Each phase serializes its own open/close bodies with a reentrant lock; siblings do not
//!   contend with each other.

mod component;
mod component_activator;
mod container;
mod instance;
mod references;

use std::sync::Arc;

use crate::core::{Completion, SubmissionContext};
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};
use crate::live::{InstanceLive, InstanceState};
use crate::op::Op;

pub(crate) use component::ComponentPhase;
pub(crate) use component_activator::ComponentActivator;
pub(crate) use container::ContainerPhase;
pub(crate) use instance::InstancePhase;

/// One stage of the activation chain.
pub(crate) trait Phase: Send + Sync + 'static {
    /// Opens this phase and, on success, its successor.
    fn open(&self) -> Result<bool, LifecycleError>;

    /// Closes the successor (if opened), then this phase.
    fn close(&self) -> bool;

    fn open_op(&self) -> Op;

    fn close_op(&self) -> Op;
}

/// Submits the open of `phase` through `ctx`.
pub(crate) fn open<P: Phase>(ctx: &SubmissionContext, phase: &Arc<P>) -> Completion {
    let phase = Arc::clone(phase);
    ctx.submit(phase.open_op(), move || phase.open())
}

/// Runs the close of `phase` through `ctx`; resolved on return.
pub(crate) fn close<P: Phase>(ctx: &SubmissionContext, phase: &Arc<P>) -> Completion {
    let phase = Arc::clone(phase);
    ctx.submit(phase.close_op(), move || Ok(phase.close()))
}

/// Moves `live` to `state` and publishes the transition.
pub(crate) fn transition(ctx: &SubmissionContext, component: &str, live: &InstanceLive, state: InstanceState) {
    if live.set_state(state) != state {
        ctx.bus().publish(
            Event::new(EventKind::InstanceStateChanged)
                .with_component(component)
                .with_instance(live.name().clone())
                .with_state(state),
        );
    }
}
