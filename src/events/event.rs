//! # Runtime events emitted by the submission context and the phase chain.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Operation events**: the outcome of each submitted open/close
//! - **State events**: instance state transitions and service (un)publication
//! - **Input events**: configuration and reference changes reaching an instance
//! - **Runtime events**: start/stop, recorded errors and subscriber trouble
//!
//! The [`Event`] struct carries the metadata: op, component/instance names, reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use scrim::{Event, EventKind, InstanceState};
//!
//! let ev = Event::new(EventKind::InstanceStateChanged)
//!     .with_instance("greeter")
//!     .with_state(InstanceState::Active);
//!
//! assert_eq!(ev.kind, EventKind::InstanceStateChanged);
//! assert_eq!(ev.instance.as_deref(), Some("greeter"));
//! assert_eq!(ev.state, Some(InstanceState::Active));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::live::InstanceState;
use crate::op::Op;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Operation events ===
    /// A submitted operation finished.
    ///
    /// Sets:
    /// - `op`: the operation
    /// - `opened`: whether the phase changed state
    OpCompleted,

    /// A submitted operation failed.
    ///
    /// Sets:
    /// - `op`: the operation
    /// - `reason`: failure message
    OpFailed,

    /// An open was not run because the runtime is closing.
    ///
    /// Sets:
    /// - `op`: the operation
    OpSuppressed,

    // === State events ===
    /// An instance changed state.
    ///
    /// Sets:
    /// - `instance`: instance name
    /// - `state`: new state
    InstanceStateChanged,

    /// An instance published its service.
    ///
    /// Sets:
    /// - `instance`: instance name
    /// - `service`: registry service id
    ServicePublished,

    /// An instance withdrew its service.
    ///
    /// Sets:
    /// - `instance`: instance name
    /// - `service`: registry service id
    ServiceUnpublished,

    // === Input events ===
    /// A configuration was applied to a component.
    ///
    /// Sets:
    /// - `component`: component name
    /// - `pid`: configuration pid
    ConfigurationApplied,

    /// A configuration was removed from a component.
    ///
    /// Sets:
    /// - `component`: component name
    /// - `pid`: configuration pid
    ConfigurationRemoved,

    /// The matches of a reference changed.
    ///
    /// Sets:
    /// - `instance`: instance name
    /// - `reference`: reference name
    /// - `reason`: `satisfied` or `unsatisfied`
    ReferenceChanged,

    // === Runtime events ===
    /// An error was appended to the runtime error list.
    ///
    /// Sets:
    /// - `reason`: the recorded message
    ErrorRecorded,

    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `component`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `component`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    /// The container opened.
    RuntimeStarted,

    /// Teardown began; opens are suppressed from here on.
    RuntimeStopping,

    /// Teardown finished.
    RuntimeStopped,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Operation the event is about.
    pub op: Option<Op>,
    /// Component (or subscriber) name.
    pub component: Option<Arc<str>>,
    /// Instance name.
    pub instance: Option<Arc<str>>,
    /// Reference name.
    pub reference: Option<Arc<str>>,
    /// Configuration pid.
    pub pid: Option<Arc<str>>,
    /// Registry service id.
    pub service: Option<u64>,
    /// New instance state.
    pub state: Option<InstanceState>,
    /// Whether an operation changed anything.
    pub opened: Option<bool>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            op: None,
            component: None,
            instance: None,
            reference: None,
            pid: None,
            service: None,
            state: None,
            opened: None,
            reason: None,
        }
    }

    #[inline]
    pub fn with_op(mut self, op: Op) -> Self {
        self.op = Some(op);
        self
    }

    #[inline]
    pub fn with_component(mut self, component: impl Into<Arc<str>>) -> Self {
        self.component = Some(component.into());
        self
    }

    #[inline]
    pub fn with_instance(mut self, instance: impl Into<Arc<str>>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    #[inline]
    pub fn with_reference(mut self, reference: impl Into<Arc<str>>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    #[inline]
    pub fn with_pid(mut self, pid: impl Into<Arc<str>>) -> Self {
        self.pid = Some(pid.into());
        self
    }

    #[inline]
    pub fn with_service(mut self, id: u64) -> Self {
        self.service = Some(id);
        self
    }

    #[inline]
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = Some(state);
        self
    }

    #[inline]
    pub fn with_opened(mut self, opened: bool) -> Self {
        self.opened = Some(opened);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_component(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_component(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpKind;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::RuntimeStarted);
        let b = Event::new(EventKind::RuntimeStopped);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_fill_fields() {
        let ev = Event::new(EventKind::OpFailed)
            .with_op(Op::open(OpKind::SingleInstance, "a"))
            .with_reason("boom");
        assert_eq!(ev.op.as_ref().map(|o| o.to_string()).as_deref(), Some("open:single-instance:a"));
        assert_eq!(ev.reason.as_deref(), Some("boom"));
        assert!(ev.instance.is_none());
    }
}
