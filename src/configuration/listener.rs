//! Per-component configuration listener.
//!
//! Bridges store notifications into the runtime: each event becomes one op on the
//! submission context, and the notification does not return before the op and the
//! instance cycles it caused have finished.
//!
//! ```text
//! Updated(pid)  ──► OPEN  configuration-listener:<component>@<pid>  (sequenced)
//!                     └─ apply to matching instances ──► cycle each (close now, reopen queued)
//! Deleted(pid)  ──► CLOSE configuration-listener:<component>@<pid>  (on the caller)
//!                     └─ close matching instances, drop the configuration
//!                        ──► reopen those whose template is optional
//! LocationChanged ──► ignored
//! ```
//!
//! An `Updated` job reads the properties from the store when it runs, so a job that was
//! coalesced with a later update, or overtaken by a deletion, applies the current state.
//! Coalesced notifications share one follow-up list: every one of them waits for the
//! cycles the shared job queued.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::store::{ConfigurationEvent, ConfigurationEventKind, ConfigurationListener};
use crate::core::{Completion, OpOutcome, SubmissionContext};
use crate::op::{Op, OpKind};
use crate::phase::{self, ComponentActivator};

type Followup = Shared<BoxFuture<'static, OpOutcome>>;
type Followups = Arc<Mutex<Vec<Followup>>>;

fn followup(completion: Completion) -> Followup {
    completion.boxed().shared()
}

pub(crate) struct ComponentConfigurationListener {
    ctx: Arc<SubmissionContext>,
    component: Arc<str>,
    activator: Weak<ComponentActivator>,
    /// Follow-ups of the `Updated` job still queued per identity.
    queued: Arc<Mutex<HashMap<String, Followups>>>,
}

impl ComponentConfigurationListener {
    pub(crate) fn new(
        ctx: Arc<SubmissionContext>,
        component: &str,
        activator: Weak<ComponentActivator>,
    ) -> Self {
        Self {
            ctx,
            component: component.into(),
            activator,
            queued: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn forget(queued: &Mutex<HashMap<String, Followups>>, identity: &str, sink: &Followups) {
        let mut queued = queued.lock();
        if queued.get(identity).is_some_and(|s| Arc::ptr_eq(s, sink)) {
            queued.remove(identity);
        }
    }
}

#[async_trait]
impl ConfigurationListener for ComponentConfigurationListener {
    async fn configuration_event(&self, event: &ConfigurationEvent) {
        let Some(activator) = self.activator.upgrade() else {
            return;
        };
        let factory_pid = event.factory_pid.clone();
        let relevant = activator
            .template()
            .configurations
            .iter()
            .any(|t| t.matches(&event.pid, factory_pid.as_deref()));
        if !relevant {
            return;
        }

        let identity = format!("{}@{}", self.component, event.pid);
        let pid = event.pid.clone();
        let (completion, sink) = match event.kind {
            ConfigurationEventKind::Updated => {
                // held across submit so a coalesced submission always shares the sink
                let mut queued = self.queued.lock();
                let sink = Arc::clone(queued.entry(identity.clone()).or_default());
                let ctx = Arc::clone(&self.ctx);
                let queue = Arc::clone(&self.queued);
                let job_sink = Arc::clone(&sink);
                let key = identity.clone();
                let op = Op::open(OpKind::ConfigurationListener, identity.clone());
                let completion = self.ctx.submit(op, move || {
                    Self::forget(&queue, &key, &job_sink);
                    let Some(props) = ctx.store().get(&pid) else {
                        return Ok(false);
                    };
                    let affected = activator.configuration_updated(&pid, factory_pid.as_deref(), props);
                    let mut pending = job_sink.lock();
                    for instance in &affected {
                        pending.push(followup(instance.cycle()));
                    }
                    Ok(!affected.is_empty())
                });
                drop(queued);
                (completion, sink)
            }
            ConfigurationEventKind::Deleted => {
                let ctx = Arc::clone(&self.ctx);
                let sink = Followups::default();
                let job_sink = Arc::clone(&sink);
                let op = Op::close(OpKind::ConfigurationListener, identity.clone());
                let completion = self.ctx.submit(op, move || {
                    let reopen = activator.configuration_deleted(&pid, factory_pid.as_deref());
                    let mut pending = job_sink.lock();
                    for instance in &reopen {
                        pending.push(followup(phase::open(&ctx, instance)));
                    }
                    Ok(true)
                });
                (completion, sink)
            }
            ConfigurationEventKind::LocationChanged => {
                trace!(component = %self.component, pid = %event.pid, "location change ignored");
                return;
            }
        };

        if let Err(e) = completion.await {
            debug!(component = %self.component, pid = %event.pid, error = %e, "configuration change failed");
        }
        // a suppressed job never ran to unregister its sink
        Self::forget(&self.queued, &identity, &sink);
        let followups = sink.lock().clone();
        for followup in followups {
            let _ = followup.await;
        }
    }
}
