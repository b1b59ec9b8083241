//! Container phase: one per runtime, opens every component.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::ReentrantMutex;
use tracing::info;

use super::Phase;
use super::component::ComponentPhase;
use crate::core::SubmissionContext;
use crate::error::LifecycleError;
use crate::op::{Op, OpKind};
use crate::template::ComponentKind;

pub(crate) struct ContainerPhase {
    ctx: Arc<SubmissionContext>,
    components: Vec<Arc<ComponentPhase>>,
    opened: AtomicBool,
    guard: ReentrantMutex<()>,
}

impl ContainerPhase {
    /// Container components open first and close last.
    pub(crate) fn new(ctx: Arc<SubmissionContext>, mut components: Vec<Arc<ComponentPhase>>) -> Self {
        components.sort_by_key(|c| c.live().template().kind != ComponentKind::Container);
        Self {
            ctx,
            components,
            opened: AtomicBool::new(false),
            guard: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn components(&self) -> &[Arc<ComponentPhase>] {
        &self.components
    }

    pub(crate) fn is_open(&self) -> bool {
        self.opened.load(Ordering::Acquire)
    }
}

impl Phase for ContainerPhase {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.ctx.is_closing() || self.opened.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        for component in &self.components {
            if let Err(e) = component.open() {
                self.ctx.record_error(format!("{}: {e}", component.open_op()));
            }
        }
        info!(runtime = %self.ctx.name(), components = self.components.len(), "container opened");
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let was = self.opened.swap(false, Ordering::AcqRel);
        for component in self.components.iter().rev() {
            let _ = super::close(&self.ctx, component);
        }
        if was {
            info!(runtime = %self.ctx.name(), "container closed");
        }
        was
    }

    fn open_op(&self) -> Op {
        Op::open(OpKind::Container, self.ctx.name().clone())
    }

    fn close_op(&self) -> Op {
        Op::close(OpKind::Container, self.ctx.name().clone())
    }
}
