//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to publish
//! lifecycle activity of the submission context and the phase chain.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `SubmissionContext` (op outcomes, errors), `InstancePhase` and
//!   `InstanceActivator` (state, publication), the configuration listener, the
//!   references phase, `SubscriberSet` workers (overflow/panic), `Runtime`.
//! - **Consumers**: the runtime's event listener, which fans out to `SubscriberSet`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
