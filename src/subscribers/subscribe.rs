//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for observing the runtime: op outcomes,
//! instance state changes, service publication, configuration and reference activity.
//!
//! Each subscriber gets:
//! - **Dedicated worker task** (runs independently)
//! - **Per-subscriber bounded queue** (capacity via [`Subscribe::queue_capacity`])
//! - **Panic isolation** (panics are reported as `EventKind::SubscriberPanicked`)
//!
//! ## Rules
//! - A slow subscriber only affects its own queue; the phase chain never waits for it.
//! - Queue overflow drops the event **for this subscriber only** and publishes
//!   `EventKind::SubscriberOverflow`.
//! - Events are processed sequentially (FIFO) per subscriber.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use scrim::{Event, EventKind, Subscribe};
//!
//! struct Activations;
//!
//! #[async_trait]
//! impl Subscribe for Activations {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::ServicePublished) {
//!             // count publications, etc.
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "activations" }
//!     fn queue_capacity(&self) -> usize { 256 }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Runtime event subscriber.
///
/// Use async I/O, handle errors internally, do not panic.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes one event, on the subscriber's own worker task.
    async fn on_event(&self, event: &Event);

    /// Name used in logs and in overflow/panic events.
    ///
    /// The default is `type_name::<Self>()`; override it with something short.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Queue capacity for this subscriber (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
