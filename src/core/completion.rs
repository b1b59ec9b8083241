//! # Completion of a submitted operation.
//!
//! A [`Completion`] resolves to the outcome of one op: `Ok(true)` if the phase changed
//! state, `Ok(false)` if there was nothing to do (already open, preconditions unmet,
//! runtime closing) and `Err` on an activation failure.
//!
//! Dropping a completion does not cancel the op.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::LifecycleError;
use crate::op::Op;

/// Result of one op.
pub type OpOutcome = Result<bool, LifecycleError>;

enum State {
    Ready(Option<OpOutcome>),
    Pending(oneshot::Receiver<OpOutcome>),
}

/// Future resolving to an [`OpOutcome`].
#[must_use = "a completion does nothing unless awaited"]
pub struct Completion {
    op: Option<Op>,
    state: State,
}

impl Completion {
    /// Already resolved.
    pub(crate) fn ready(op: Op, outcome: OpOutcome) -> Self {
        Self {
            op: Some(op),
            state: State::Ready(Some(outcome)),
        }
    }

    /// Resolved by the sender side.
    pub(crate) fn pending(op: Option<Op>) -> (Self, oneshot::Sender<OpOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                op,
                state: State::Pending(rx),
            },
            tx,
        )
    }

    /// The op this completion belongs to; `None` for watch completions.
    pub fn op(&self) -> Option<&Op> {
        self.op.as_ref()
    }

    fn abandoned(&self) -> LifecycleError {
        LifecycleError::Abandoned {
            op: self
                .op
                .as_ref()
                .map(|op| op.to_string())
                .unwrap_or_else(|| "watch".to_string())
                .into(),
        }
    }
}

impl Future for Completion {
    type Output = OpOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let polled = match &mut this.state {
            State::Ready(outcome) => Poll::Ready(outcome.take()),
            State::Pending(rx) => Pin::new(rx).poll(cx).map(Result::ok),
        };
        polled.map(|outcome| outcome.unwrap_or_else(|| Err(this.abandoned())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::OpKind;

    #[tokio::test]
    async fn dropped_sender_is_abandoned() {
        let (completion, tx) = Completion::pending(Some(Op::open(OpKind::Container, "rt")));
        drop(tx);
        assert_eq!(
            completion.await,
            Err(LifecycleError::Abandoned {
                op: "open:container:rt".into()
            })
        );
    }

    #[tokio::test]
    async fn ready_resolves_immediately() {
        let op = Op::close(OpKind::Container, "rt");
        assert_eq!(Completion::ready(op, Ok(true)).await, Ok(true));
    }
}
