//! # LogWriter: renders runtime events through `tracing`.
//!
//! Routine activity goes to `debug`, state and publication changes to `info`,
//! failures and subscriber trouble to `warn`/`error`.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO scrim: instance state instance="greeter" state="active"
//! INFO scrim: service published instance="greeter" service=3
//! WARN scrim: op failed op="open:single-instance:greeter" reason="activation of greeter failed: boom"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn text(v: &Option<std::sync::Arc<str>>) -> &str {
    v.as_deref().unwrap_or("-")
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let op = e.op.as_ref().map(ToString::to_string).unwrap_or_default();
        match e.kind {
            EventKind::OpCompleted => {
                debug!(target: "scrim", op = %op, opened = ?e.opened, "op completed");
            }
            EventKind::OpFailed => {
                warn!(target: "scrim", op = %op, reason = text(&e.reason), "op failed");
            }
            EventKind::OpSuppressed => {
                debug!(target: "scrim", op = %op, "op suppressed while closing");
            }
            EventKind::InstanceStateChanged => {
                info!(
                    target: "scrim",
                    instance = text(&e.instance),
                    state = e.state.map(|s| s.as_label()).unwrap_or("-"),
                    "instance state"
                );
            }
            EventKind::ServicePublished => {
                info!(target: "scrim", instance = text(&e.instance), service = ?e.service, "service published");
            }
            EventKind::ServiceUnpublished => {
                info!(target: "scrim", instance = text(&e.instance), service = ?e.service, "service unpublished");
            }
            EventKind::ConfigurationApplied => {
                debug!(target: "scrim", component = text(&e.component), pid = text(&e.pid), "configuration applied");
            }
            EventKind::ConfigurationRemoved => {
                debug!(target: "scrim", component = text(&e.component), pid = text(&e.pid), "configuration removed");
            }
            EventKind::ReferenceChanged => {
                debug!(
                    target: "scrim",
                    instance = text(&e.instance),
                    reference = text(&e.reference),
                    status = text(&e.reason),
                    "reference changed"
                );
            }
            EventKind::ErrorRecorded => {
                error!(target: "scrim", reason = text(&e.reason), "error recorded");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "scrim", subscriber = text(&e.component), reason = text(&e.reason), "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "scrim", subscriber = text(&e.component), info = text(&e.reason), "subscriber panicked");
            }
            EventKind::RuntimeStarted => info!(target: "scrim", "runtime started"),
            EventKind::RuntimeStopping => info!(target: "scrim", "runtime stopping"),
            EventKind::RuntimeStopped => info!(target: "scrim", "runtime stopped"),
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
