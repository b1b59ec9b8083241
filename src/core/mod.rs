//! Runtime core: submission, sequencing and the runtime lifecycle.
//!
//! The public API from this module is [`Runtime`], its [`RuntimeBuilder`] and
//! [`RuntimeConfig`], plus the [`SubmissionContext`] every phase routes its ops through.
//!
//! Internal modules:
//! - [`context`]: decides whether an op runs now, is queued, or is suppressed;
//! - [`sequencer`]: the single worker executing queued opens in order;
//! - [`completion`]: the future every submission resolves to;
//! - [`runtime`]: start/stop, enablement, snapshots;
//! - [`builder`]: assembles a runtime from templates and collaborators.

mod builder;
mod completion;
mod config;
mod context;
mod runtime;
mod sequencer;

pub use builder::RuntimeBuilder;
pub use completion::{Completion, OpOutcome};
pub use config::RuntimeConfig;
pub use context::SubmissionContext;
pub use runtime::Runtime;

pub(crate) use context::panic_reason;

#[cfg(test)]
pub(crate) use context::tests::{context as test_context, context_with as test_context_with};
