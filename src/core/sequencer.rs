//! # Single-worker sequencer for open operations.
//!
//! Every OPEN of one runtime runs on one tokio task, strictly in submission order.
//! An OPEN submitted while an identical OPEN is still queued is coalesced onto it:
//! both completions resolve with the outcome of the one run.
//!
//! ## Architecture
//! ```text
//! submit(OPEN) ──► enqueue ──┬─► pending[op] exists? ──► add reply, done
//!                            └─► pending[op] = []  ──► [unbounded queue]
//!                                                            │
//!                        worker loop (select on cancel) ◄────┘
//!                          ├─ take pending[op] followers
//!                          ├─ closing?  ──► Ok(false) to all replies
//!                          └─ run task (catch_unwind) ──► outcome to all replies
//! ```
//!
//! ## Rules
//! - Jobs never overlap; a job is a synchronous phase cascade wrapped in a future.
//! - A panicking job fails its replies with `LifecycleError::Panicked`; the loop survives.
//! - After cancellation the remaining queue is drained with `Ok(false)`.

use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::completion::OpOutcome;
use super::context::{SubmissionContext, panic_reason};
use crate::error::LifecycleError;
use crate::op::Op;

/// One queued open.
pub(crate) struct Job {
    pub(crate) op: Op,
    pub(crate) task: BoxFuture<'static, OpOutcome>,
    pub(crate) replies: Vec<oneshot::Sender<OpOutcome>>,
}

impl Job {
    pub(crate) fn reply(self, outcome: OpOutcome) {
        for reply in self.replies {
            let _ = reply.send(outcome.clone());
        }
    }
}

/// Submission side of the sequencer.
pub(crate) struct Sequencer {
    tx: mpsc::UnboundedSender<Job>,
    pending: Mutex<HashMap<Op, Vec<oneshot::Sender<OpOutcome>>>>,
}

impl Sequencer {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: Mutex::new(HashMap::new()),
            },
            rx,
        )
    }

    /// Queues `job`, or folds its replies into an identical queued job.
    pub(crate) fn enqueue(&self, job: Job) {
        let mut pending = self.pending.lock();
        if let Some(followers) = pending.get_mut(&job.op) {
            trace!(op = %job.op, "coalesced onto queued op");
            followers.extend(job.replies);
            return;
        }
        let op = job.op.clone();
        pending.insert(op.clone(), Vec::new());
        if self.tx.send(job).is_err() {
            // worker gone; dropping the replies resolves them as abandoned
            pending.remove(&op);
        }
    }

    /// Marks `job` as started; later identical opens queue anew.
    fn start(&self, job: &mut Job) {
        if let Some(followers) = self.pending.lock().remove(&job.op) {
            job.replies.extend(followers);
        }
    }
}

/// Spawns the worker loop of `ctx`.
pub(crate) fn spawn(
    ctx: Arc<SubmissionContext>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                job = rx.recv() => match job {
                    Some(job) => run(&ctx, job).await,
                    None => break,
                },
            }
        }

        rx.close();
        while let Ok(mut job) = rx.try_recv() {
            ctx.sequencer().start(&mut job);
            ctx.suppressed(&job.op);
            job.reply(Ok(false));
        }
        trace!(runtime = %ctx.name(), "sequencer stopped");
    })
}

async fn run(ctx: &SubmissionContext, mut job: Job) {
    ctx.sequencer().start(&mut job);
    if ctx.is_closing() {
        ctx.suppressed(&job.op);
        job.reply(Ok(false));
        return;
    }

    let task = std::mem::replace(&mut job.task, async { Ok(false) }.boxed());
    let outcome = match std::panic::AssertUnwindSafe(task).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(LifecycleError::Panicked {
            op: job.op.to_string().into(),
            reason: panic_reason(payload.as_ref()).into(),
        }),
    };
    ctx.finished(&job.op, &outcome);
    job.reply(outcome);
}
