//! # Task submission context.
//!
//! One [`SubmissionContext`] exists per runtime. Every phase holds it and routes every
//! open and close through [`submit`](SubmissionContext::submit). It decides how an op
//! runs:
//!
//! ```text
//! submit(op, task)
//!   ├─ CLOSE            ──► run now, on the caller (catch_unwind) ──► ready Completion
//!   ├─ OPEN, closing    ──► not run                               ──► Ok(false)
//!   └─ OPEN             ──► sequencer queue (FIFO, one worker)    ──► pending Completion
//!
//! watch(predicate) ──► fires with the outcome of the next submitted op it matches,
//!                      then is removed
//! ```
//!
//! It also owns the runtime-wide bookkeeping: the error list, the change counter, the
//! instance id counter and handles to the collaborators (registry, configuration store,
//! injector) and the event bus.

use std::any::Any;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::completion::{Completion, OpOutcome};
use super::config::RuntimeConfig;
use super::sequencer::{self, Job, Sequencer};
use crate::configuration::ConfigurationStore;
use crate::error::LifecycleError;
use crate::events::{Bus, Event, EventKind};
use crate::injector::InjectorHandle;
use crate::live::ChangeCount;
use crate::op::{Op, OpMode};
use crate::registry::ServiceRegistry;

type Predicate = Box<dyn Fn(&Op) -> bool + Send + Sync>;

struct Watcher {
    predicate: Predicate,
    reply: oneshot::Sender<OpOutcome>,
}

/// Per-runtime submission context.
pub struct SubmissionContext {
    name: Arc<str>,
    closing: AtomicBool,
    sequencer: Sequencer,
    watchers: Mutex<Vec<Watcher>>,
    errors: Mutex<VecDeque<String>>,
    error_capacity: usize,
    changes: Arc<ChangeCount>,
    ids: AtomicU64,
    bus: Bus,
    token: CancellationToken,
    registry: Arc<dyn ServiceRegistry>,
    store: Arc<dyn ConfigurationStore>,
    injector: InjectorHandle,
}

impl SubmissionContext {
    /// Creates the context and spawns its sequencer; must be called inside a tokio runtime.
    pub(crate) fn start(
        cfg: &RuntimeConfig,
        bus: Bus,
        registry: Arc<dyn ServiceRegistry>,
        store: Arc<dyn ConfigurationStore>,
        injector: InjectorHandle,
        token: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (sequencer, rx) = Sequencer::new();
        let ctx = Arc::new(Self {
            name: cfg.name.as_str().into(),
            closing: AtomicBool::new(false),
            sequencer,
            watchers: Mutex::new(Vec::new()),
            errors: Mutex::new(VecDeque::new()),
            error_capacity: cfg.error_capacity_clamped(),
            changes: Arc::new(ChangeCount::default()),
            ids: AtomicU64::new(0),
            bus,
            token: token.clone(),
            registry,
            store,
            injector,
        });
        let worker = sequencer::spawn(Arc::clone(&ctx), rx, token);
        (ctx, worker)
    }

    /// Runs or schedules `task` for `op`.
    ///
    /// - `Close`: runs synchronously on the caller; the completion is already resolved.
    /// - `Open` while closing: not run; resolves to `Ok(false)`.
    /// - `Open`: queued on the sequencer.
    ///
    /// Watchers matching `op` are resolved with the same outcome and removed.
    pub fn submit<F>(&self, op: Op, task: F) -> Completion
    where
        F: FnOnce() -> OpOutcome + Send + 'static,
    {
        let watchers = self.take_watchers(&op);
        match op.mode {
            OpMode::Close => {
                trace!(op = %op, "close");
                let outcome = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(task)) {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(LifecycleError::Panicked {
                        op: op.to_string().into(),
                        reason: panic_reason(payload.as_ref()).into(),
                    }),
                };
                self.finished(&op, &outcome);
                for reply in watchers {
                    let _ = reply.send(outcome.clone());
                }
                Completion::ready(op, outcome)
            }
            OpMode::Open if self.is_closing() => {
                self.suppressed(&op);
                for reply in watchers {
                    let _ = reply.send(Ok(false));
                }
                Completion::ready(op, Ok(false))
            }
            OpMode::Open => {
                trace!(op = %op, "open queued");
                let (completion, reply) = Completion::pending(Some(op.clone()));
                let mut replies = watchers;
                replies.push(reply);
                self.sequencer.enqueue(Job {
                    op,
                    task: async move { task() }.boxed(),
                    replies,
                });
                completion
            }
        }
    }

    /// Resolves with the outcome of the next submitted op matching `predicate`.
    pub fn watch<P>(&self, predicate: P) -> Completion
    where
        P: Fn(&Op) -> bool + Send + Sync + 'static,
    {
        let (completion, reply) = Completion::pending(None);
        self.watchers.lock().push(Watcher {
            predicate: Box::new(predicate),
            reply,
        });
        completion
    }

    fn take_watchers(&self, op: &Op) -> Vec<oneshot::Sender<OpOutcome>> {
        let mut watchers = self.watchers.lock();
        let mut fired = Vec::new();
        let mut i = 0;
        while i < watchers.len() {
            if watchers[i].reply.is_closed() {
                watchers.remove(i);
            } else if (watchers[i].predicate)(op) {
                fired.push(watchers.remove(i).reply);
            } else {
                i += 1;
            }
        }
        fired
    }

    pub(crate) fn finished(&self, op: &Op, outcome: &OpOutcome) {
        match outcome {
            Ok(opened) => {
                trace!(op = %op, opened, "op completed");
                self.bus
                    .publish(Event::new(EventKind::OpCompleted).with_op(op.clone()).with_opened(*opened));
            }
            Err(e) => {
                self.record_error(format!("{op}: {e}"));
                self.bus.publish(
                    Event::new(EventKind::OpFailed)
                        .with_op(op.clone())
                        .with_reason(e.to_string()),
                );
            }
        }
    }

    pub(crate) fn suppressed(&self, op: &Op) {
        trace!(op = %op, "open suppressed, runtime closing");
        self.bus
            .publish(Event::new(EventKind::OpSuppressed).with_op(op.clone()));
    }

    /// Appends to the runtime error list, evicting the oldest entry when full.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(runtime = %self.name, "{message}");
        {
            let mut errors = self.errors.lock();
            while errors.len() >= self.error_capacity {
                errors.pop_front();
            }
            errors.push_back(message.clone());
        }
        self.changes.bump();
        self.bus
            .publish(Event::new(EventKind::ErrorRecorded).with_reason(message));
    }

    /// Recorded errors, oldest first.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().iter().cloned().collect()
    }

    /// True once teardown began; opens are suppressed from then on.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Flips into closing state; returns whether it already was.
    pub(crate) fn begin_closing(&self) -> bool {
        self.closing.swap(true, Ordering::AcqRel)
    }

    /// Next runtime-unique instance id.
    pub(crate) fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub fn change_count(&self) -> u64 {
        self.changes.get()
    }

    pub(crate) fn changes(&self) -> &Arc<ChangeCount> {
        &self.changes
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<dyn ServiceRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConfigurationStore> {
        &self.store
    }

    pub fn injector(&self) -> &InjectorHandle {
        &self.injector
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }
}

/// Renders a panic payload.
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use crate::configuration::InMemoryConfigurationStore;
    use crate::op::OpKind;
    use crate::registry::InMemoryRegistry;

    pub(crate) fn context() -> Arc<SubmissionContext> {
        context_with(Arc::new(InMemoryConfigurationStore::new()))
    }

    pub(crate) fn context_with(store: Arc<dyn ConfigurationStore>) -> Arc<SubmissionContext> {
        let cfg = RuntimeConfig {
            error_capacity: 4,
            ..RuntimeConfig::default()
        };
        let (ctx, _worker) = SubmissionContext::start(
            &cfg,
            Bus::new(64),
            Arc::new(InMemoryRegistry::new()),
            store,
            InjectorHandle::new(),
            CancellationToken::new(),
        );
        ctx
    }

    #[tokio::test]
    async fn close_runs_on_the_caller() {
        let ctx = context();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let completion = ctx.submit(Op::close(OpKind::SingleInstance, "a"), move || {
            flag.store(true, Ordering::SeqCst);
            Ok(true)
        });
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(completion.await, Ok(true));
    }

    #[tokio::test]
    async fn opens_run_in_submission_order() {
        let ctx = context();
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut completions = Vec::new();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            completions.push(ctx.submit(Op::open(OpKind::SingleInstance, name), move || {
                log.lock().push(name);
                Ok(true)
            }));
        }
        assert!(log.lock().is_empty());
        for c in completions {
            assert_eq!(c.await, Ok(true));
        }
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn identical_queued_opens_coalesce() {
        let ctx = context();
        let runs = Arc::new(AtomicUsize::new(0));
        let submit = |runs: Arc<AtomicUsize>| {
            ctx.submit(Op::open(OpKind::References, "a"), move || {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            })
        };
        let first = submit(runs.clone());
        let second = submit(runs.clone());
        assert_eq!(first.await, Ok(true));
        assert_eq!(second.await, Ok(true));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(submit(runs.clone()).await, Ok(true));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn opens_are_suppressed_while_closing() {
        let ctx = context();
        let queued = ctx.submit(Op::open(OpKind::SingleInstance, "queued"), || Ok(true));
        ctx.begin_closing();
        let late = ctx.submit(Op::open(OpKind::SingleInstance, "late"), || {
            panic!("must not run")
        });
        assert_eq!(late.await, Ok(false));
        assert_eq!(queued.await, Ok(false));
        assert!(ctx.errors().is_empty());
    }

    #[tokio::test]
    async fn watchers_fire_once_with_the_outcome() {
        let ctx = context();
        let watched = ctx.watch(|op| op.is(OpMode::Open, OpKind::SingleInstance, "b"));
        let _ = ctx.submit(Op::open(OpKind::SingleInstance, "a"), || Ok(true)).await;
        let _ = ctx.submit(Op::open(OpKind::SingleInstance, "b"), || {
            Err(LifecycleError::activation("b", "boom"))
        });
        assert_eq!(watched.await, Err(LifecycleError::activation("b", "boom")));
        assert!(ctx.watchers.lock().is_empty());
    }

    #[tokio::test]
    async fn failures_and_panics_are_recorded() {
        let ctx = context();
        let failed = ctx
            .submit(Op::open(OpKind::SingleInstance, "a"), || {
                Err(LifecycleError::activation("a", "boom"))
            })
            .await;
        assert!(failed.is_err());

        let panicked = ctx
            .submit(Op::open(OpKind::SingleInstance, "b"), || panic!("kaput"))
            .await;
        assert_eq!(panicked.map_err(|e| e.as_label()), Err("lifecycle_panicked"));

        let errors = ctx.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("boom"));
        assert!(errors[1].contains("kaput"));
        assert!(ctx.change_count() >= 2);
    }

    #[tokio::test]
    async fn error_list_is_bounded() {
        let ctx = context();
        for i in 0..6 {
            ctx.record_error(format!("e{i}"));
        }
        assert_eq!(ctx.errors(), vec!["e2", "e3", "e4", "e5"]);
    }
}
