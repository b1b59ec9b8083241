//! References phase: one [`ReferenceResolver`] per reference template, gating the activator.
//!
//! ## Reacting to registry changes
//! ```text
//! resolver change ──► satisfaction crossed?           ──► cycle the instance (close, then open)
//!                 └─► satisfied and active:
//!                       Dynamic, bound set changed    ──► queued rebind, no teardown
//!                       Static+Greedy, bound changed  ──► cycle the instance
//!                       Static+Reluctant, a held service gone ──► cycle the instance
//! ```
//! Changes are handled with no lock of this phase held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace};

use super::instance::InstancePhase;
use super::{Phase, transition};
use crate::activator::InstanceActivator;
use crate::core::SubmissionContext;
use crate::error::LifecycleError;
use crate::events::{Event, EventKind};
use crate::injector::Bindings;
use crate::live::{InstanceLive, InstanceState};
use crate::op::{Op, OpKind};
use crate::reference::{ReferenceChange, ReferenceResolver};
use crate::template::{ComponentTemplate, PolicyOption, ReferencePolicy};

pub(crate) struct ReferencesPhase {
    ctx: Arc<SubmissionContext>,
    template: Arc<ComponentTemplate>,
    live: Arc<InstanceLive>,
    me: Weak<ReferencesPhase>,
    instance: Weak<InstancePhase>,
    activator: Arc<InstanceActivator>,
    resolvers: Mutex<Vec<Arc<ReferenceResolver>>>,
    opened: AtomicBool,
    guard: ReentrantMutex<()>,
}

impl ReferencesPhase {
    pub(crate) fn new(
        ctx: Arc<SubmissionContext>,
        template: Arc<ComponentTemplate>,
        live: Arc<InstanceLive>,
        instance: Weak<InstancePhase>,
    ) -> Arc<Self> {
        let activator = Arc::new(InstanceActivator::new(
            Arc::clone(&ctx),
            Arc::clone(&template),
            Arc::clone(&live),
        ));
        Arc::new_cyclic(|me| Self {
            ctx,
            template,
            live,
            me: me.clone(),
            instance,
            activator,
            resolvers: Mutex::new(Vec::new()),
            opened: AtomicBool::new(false),
            guard: ReentrantMutex::new(()),
        })
    }

    fn bindings(resolvers: &[Arc<ReferenceResolver>]) -> Bindings {
        resolvers
            .iter()
            .map(|r| (r.template().name.clone(), r.bound()))
            .collect()
    }

    /// Publishes the resolver state; an active instance reports what it actually holds.
    fn mirror(&self, resolvers: &[Arc<ReferenceResolver>]) {
        let active = self.activator.is_active();
        let references = resolvers
            .iter()
            .map(|r| {
                let mut live = r.live();
                if active {
                    live.bound = self.activator.bound(&live.template.name);
                }
                Arc::new(live)
            })
            .collect();
        self.live.set_references(references);
    }

    fn reference_changed(&self, change: &ReferenceChange) {
        if !self.opened.load(Ordering::Acquire) {
            return;
        }
        let resolvers = self.resolvers.lock().clone();
        self.mirror(&resolvers);
        trace!(
            instance = %self.live.name(),
            reference = %change.reference,
            satisfied = change.satisfied,
            "reference changed"
        );
        self.ctx.bus().publish(
            Event::new(EventKind::ReferenceChanged)
                .with_component(self.template.name.as_str())
                .with_instance(self.live.name().clone())
                .with_reference(change.reference.as_str())
                .with_reason(if change.satisfied { "satisfied" } else { "unsatisfied" }),
        );

        let Some(instance) = self.instance.upgrade() else {
            return;
        };
        if change.crossed() {
            debug!(instance = %self.live.name(), reference = %change.reference, satisfied = change.satisfied, "reference crossed its minimum");
            let _ = instance.cycle();
            return;
        }
        if !change.satisfied || !self.activator.is_active() {
            return;
        }
        let Some(reference) = self
            .template
            .references
            .iter()
            .find(|r| r.name == change.reference)
        else {
            return;
        };
        match (reference.policy, reference.option) {
            (ReferencePolicy::Dynamic, _) if change.bound_changed() => self.submit_rebind(),
            (ReferencePolicy::Static, PolicyOption::Greedy) if change.bound_changed() => {
                let _ = instance.cycle();
            }
            (ReferencePolicy::Static, PolicyOption::Reluctant)
                if change.lost(&self.activator.bound(&change.reference)) =>
            {
                let _ = instance.cycle();
            }
            _ => {}
        }
    }

    /// Queues a push of the current bindings into the live object.
    fn submit_rebind(&self) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let _ = self
            .ctx
            .submit(Op::open(OpKind::Rebind, self.live.name().clone()), move || me.rebind());
    }

    fn rebind(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if !self.opened.load(Ordering::Acquire) {
            return Ok(false);
        }
        let resolvers = self.resolvers.lock().clone();
        let rebound = self.activator.rebind(Self::bindings(&resolvers))?;
        self.mirror(&resolvers);
        Ok(rebound)
    }
}

impl Phase for ReferencesPhase {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.opened.load(Ordering::Acquire) {
            return Ok(false);
        }

        let props = self.live.properties();
        let mut resolvers = Vec::with_capacity(self.template.references.len());
        for reference in &self.template.references {
            let me = self.me.clone();
            let opened = ReferenceResolver::open(
                reference,
                self.live.name(),
                &props,
                Arc::clone(self.ctx.registry()),
                move |change| {
                    if let Some(me) = me.upgrade() {
                        me.reference_changed(change);
                    }
                },
            );
            match opened {
                Ok(resolver) => resolvers.push(resolver),
                Err(e) => {
                    resolvers.iter().for_each(|r| r.close());
                    return Err(e);
                }
            }
        }
        *self.resolvers.lock() = resolvers.clone();
        self.opened.store(true, Ordering::Release);
        self.mirror(&resolvers);

        if !resolvers.iter().all(|r| r.is_satisfied()) {
            debug!(instance = %self.live.name(), "waiting for references");
            transition(&self.ctx, &self.template.name, &self.live, InstanceState::Unresolved);
            return Ok(true);
        }
        transition(&self.ctx, &self.template.name, &self.live, InstanceState::ReferencesResolved);
        self.activator.set_bindings(Self::bindings(&resolvers));
        self.activator.open()?;
        self.mirror(&resolvers);
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let was = self.opened.swap(false, Ordering::AcqRel);
        let resolvers = std::mem::take(&mut *self.resolvers.lock());
        resolvers.iter().for_each(|r| r.close());
        let closed = self.activator.close();
        if was {
            self.live.set_references(Vec::new());
        }
        was || closed
    }

    fn open_op(&self) -> Op {
        Op::open(OpKind::References, self.live.name().clone())
    }

    fn close_op(&self) -> Op {
        Op::close(OpKind::References, self.live.name().clone())
    }
}
