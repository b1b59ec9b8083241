//! # Lifecycle operation descriptors.
//!
//! An [`Op`] is an immutable `(mode, kind, name)` triple naming one open or close
//! of one phase. Ops are used for tracing, to coalesce queued duplicate opens, and
//! as the match key for [`SubmissionContext::watch`](crate::SubmissionContext::watch).
//!
//! ```rust
//! use scrim::{Op, OpKind, OpMode};
//!
//! let op = Op::open(OpKind::SingleInstance, "greeter");
//! assert!(op.is(OpMode::Open, OpKind::SingleInstance, "greeter"));
//! assert_eq!(op.to_string(), "open:single-instance:greeter");
//! ```

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Direction of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpMode {
    /// Runs on the sequencer, in submission order.
    Open,
    /// Runs synchronously on the submitting thread.
    Close,
}

/// Which phase an operation targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    /// The runtime-wide container phase.
    Container,
    /// Component phase of the container component.
    ContainerComponent,
    /// Component phase of a single component.
    SingleComponent,
    /// Component phase of a factory component.
    FactoryComponent,
    /// A configuration event delivered to a component.
    ConfigurationListener,
    /// Instance bookkeeping of one component.
    ComponentActivator,
    /// Instance of the container component.
    ContainerInstance,
    /// Instance of a single component.
    SingleInstance,
    /// One instance of a factory component.
    FactoryInstance,
    /// Reference resolution of one instance.
    References,
    /// In-place rebind of an active instance's dynamic references.
    Rebind,
    /// Construct and hold, no publication.
    ImmediateActivator,
    /// One shared published object.
    SingletonActivator,
    /// One object per consumer.
    BundleActivator,
    /// One object per request.
    PrototypeActivator,
}

impl OpKind {
    /// Returns the stable kebab-case label.
    pub fn as_label(&self) -> &'static str {
        match self {
            OpKind::Container => "container",
            OpKind::ContainerComponent => "container-component",
            OpKind::SingleComponent => "single-component",
            OpKind::FactoryComponent => "factory-component",
            OpKind::ConfigurationListener => "configuration-listener",
            OpKind::ComponentActivator => "component-activator",
            OpKind::ContainerInstance => "container-instance",
            OpKind::SingleInstance => "single-instance",
            OpKind::FactoryInstance => "factory-instance",
            OpKind::References => "references",
            OpKind::Rebind => "rebind",
            OpKind::ImmediateActivator => "immediate-activator",
            OpKind::SingletonActivator => "singleton-activator",
            OpKind::BundleActivator => "bundle-activator",
            OpKind::PrototypeActivator => "prototype-activator",
        }
    }
}

/// One traced lifecycle operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Op {
    /// Open or close.
    pub mode: OpMode,
    /// Targeted phase kind.
    pub kind: OpKind,
    /// Identity of the targeted phase (component or instance name).
    pub name: Arc<str>,
}

impl Op {
    /// Creates an op.
    pub fn new(mode: OpMode, kind: OpKind, name: impl Into<Arc<str>>) -> Self {
        Self {
            mode,
            kind,
            name: name.into(),
        }
    }

    /// Shorthand for an `Open` op.
    pub fn open(kind: OpKind, name: impl Into<Arc<str>>) -> Self {
        Self::new(OpMode::Open, kind, name)
    }

    /// Shorthand for a `Close` op.
    pub fn close(kind: OpKind, name: impl Into<Arc<str>>) -> Self {
        Self::new(OpMode::Close, kind, name)
    }

    /// True if all three parts match.
    #[inline]
    pub fn is(&self, mode: OpMode, kind: OpKind, name: &str) -> bool {
        self.mode == mode && self.kind == kind && &*self.name == name
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.mode == OpMode::Open
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            OpMode::Open => "open",
            OpMode::Close => "close",
        };
        write!(f, "{mode}:{}:{}", self.kind.as_label(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn equal_ops_hash_together() {
        let mut set = HashSet::new();
        set.insert(Op::open(OpKind::References, "a"));
        set.insert(Op::open(OpKind::References, "a"));
        set.insert(Op::close(OpKind::References, "a"));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn serializes_with_shared_name() {
        let op = Op::open(OpKind::Rebind, "a");
        assert_eq!(
            serde_json::to_value(&op).unwrap(),
            serde_json::json!({ "mode": "OPEN", "kind": "rebind", "name": "a" })
        );
        assert_ne!(op, Op::open(OpKind::References, "a"));
    }

    #[test]
    fn display_is_mode_kind_name() {
        let op = Op::close(OpKind::FactoryInstance, "cache[cache~one]");
        assert_eq!(op.to_string(), "close:factory-instance:cache[cache~one]");
    }
}
