//! Component phase: gate on enablement, listen for configuration, open the activator.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, info};

use super::Phase;
use super::component_activator::ComponentActivator;
use crate::configuration::{ComponentConfigurationListener, ListenerId};
use crate::core::SubmissionContext;
use crate::error::LifecycleError;
use crate::live::ComponentLive;
use crate::op::{Op, OpKind};
use crate::template::ComponentKind;

pub(crate) struct ComponentPhase {
    ctx: Arc<SubmissionContext>,
    live: Arc<ComponentLive>,
    activator: Arc<ComponentActivator>,
    listener: Mutex<Option<ListenerId>>,
    opened: AtomicBool,
    guard: ReentrantMutex<()>,
}

impl ComponentPhase {
    pub(crate) fn new(ctx: Arc<SubmissionContext>, live: Arc<ComponentLive>) -> Self {
        let activator = Arc::new(ComponentActivator::new(Arc::clone(&ctx), Arc::clone(&live)));
        Self {
            ctx,
            live,
            activator,
            listener: Mutex::new(None),
            opened: AtomicBool::new(false),
            guard: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn live(&self) -> &Arc<ComponentLive> {
        &self.live
    }

    pub(crate) fn name(&self) -> &str {
        self.live.name()
    }

    fn kind(&self) -> OpKind {
        match self.live.template().kind {
            ComponentKind::Container => OpKind::ContainerComponent,
            ComponentKind::Single => OpKind::SingleComponent,
            ComponentKind::Factory => OpKind::FactoryComponent,
        }
    }

    fn unlisten(&self) {
        if let Some(id) = self.listener.lock().take() {
            self.ctx.store().remove_listener(id);
        }
    }
}

impl Phase for ComponentPhase {
    fn open(&self) -> Result<bool, LifecycleError> {
        let _guard = self.guard.lock();
        if self.ctx.is_closing() || self.opened.load(Ordering::Acquire) {
            return Ok(false);
        }
        if !self.live.is_enabled() {
            debug!(component = %self.name(), "component disabled");
            return Ok(false);
        }

        let listener = ComponentConfigurationListener::new(
            Arc::clone(&self.ctx),
            self.live.name(),
            Arc::downgrade(&self.activator),
        );
        *self.listener.lock() = Some(self.ctx.store().add_listener(Arc::new(listener)));
        self.opened.store(true, Ordering::Release);

        if let Err(e) = self.activator.open() {
            self.unlisten();
            self.opened.store(false, Ordering::Release);
            return Err(e);
        }
        info!(component = %self.name(), "component opened");
        Ok(true)
    }

    fn close(&self) -> bool {
        let _guard = self.guard.lock();
        let was = self.opened.swap(false, Ordering::AcqRel);
        self.unlisten();
        let _ = super::close(&self.ctx, &self.activator);
        if was {
            info!(component = %self.name(), "component closed");
        }
        was
    }

    fn open_op(&self) -> Op {
        Op::open(self.kind(), self.name())
    }

    fn close_op(&self) -> Op {
        Op::close(self.kind(), self.name())
    }
}
