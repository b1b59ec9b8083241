//! Error types used by the scrim runtime.
//!
//! This module defines four enums, one per failure class:
//!
//! - [`TemplateError`]: discovery-time problems with a component template; the
//!   component is excluded from activation and the error is listed in the snapshot.
//! - [`LifecycleError`]: activation-time failures caught at a phase boundary; they
//!   fail the completion of the operation that triggered them.
//! - [`RuntimeError`]: failures surfaced synchronously to the caller of the
//!   [`Runtime`](crate::Runtime) API (e.g. the injector never became ready).
//! - [`FilterError`]: syntax errors in registry filter expressions.
//!
//! All of them provide `as_label` for logs/metrics.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// # Errors found while validating a component template.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// Component name is empty.
    #[error("component name must not be empty")]
    EmptyName,

    /// Two templates share a component name.
    #[error("component {component}: duplicate component name")]
    DuplicateComponent {
        /// Offending component name.
        component: String,
    },

    /// A factory component must be identified by exactly one `Many` configuration.
    #[error("component {component}: factory component needs exactly one Many configuration, found {found}")]
    FactoryConfiguration {
        /// Offending component name.
        component: String,
        /// Number of `Many` configuration templates declared.
        found: usize,
    },

    /// Single and container components cannot declare a `Many` configuration.
    #[error("component {component}: only factory components may declare Many configuration {pid}")]
    UnexpectedFactoryConfiguration {
        /// Offending component name.
        component: String,
        /// The factory pid that was declared.
        pid: String,
    },

    /// The identifying factory configuration must be `Required`.
    #[error("component {component}: factory configuration {pid} must be Required")]
    OptionalFactoryConfiguration {
        /// Offending component name.
        component: String,
        /// The factory pid that was declared.
        pid: String,
    },

    /// The same pid is declared twice.
    #[error("component {component}: duplicate configuration pid {pid}")]
    DuplicateConfiguration {
        /// Offending component name.
        component: String,
        /// Duplicated pid.
        pid: String,
    },

    /// The same reference name is declared twice.
    #[error("component {component}: duplicate reference {reference}")]
    DuplicateReference {
        /// Offending component name.
        component: String,
        /// Duplicated reference name.
        reference: String,
    },

    /// A reference has an empty name or service type.
    #[error("component {component}: reference {reference:?} needs a name and a service type")]
    IncompleteReference {
        /// Offending component name.
        component: String,
        /// Reference name as declared (possibly empty).
        reference: String,
    },

    /// `maximum` is smaller than `minimum` (or zero).
    #[error("component {component}: reference {reference} has maximum {maximum} below minimum {minimum}")]
    Cardinality {
        /// Offending component name.
        component: String,
        /// Reference name.
        reference: String,
        /// Declared minimum.
        minimum: usize,
        /// Declared maximum.
        maximum: usize,
    },

    /// The static target filter of a reference does not parse.
    #[error("component {component}: reference {reference} has invalid target: {source}")]
    Target {
        /// Offending component name.
        component: String,
        /// Reference name.
        reference: String,
        /// Parse failure.
        source: FilterError,
    },

    /// A published scope needs at least one service type.
    #[error("component {component}: service scope requires at least one service type")]
    MissingServiceType {
        /// Offending component name.
        component: String,
    },
}

impl TemplateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TemplateError::EmptyName => "template_empty_name",
            TemplateError::DuplicateComponent { .. } => "template_duplicate_component",
            TemplateError::FactoryConfiguration { .. } => "template_factory_configuration",
            TemplateError::UnexpectedFactoryConfiguration { .. } => {
                "template_unexpected_factory_configuration"
            }
            TemplateError::OptionalFactoryConfiguration { .. } => {
                "template_optional_factory_configuration"
            }
            TemplateError::DuplicateConfiguration { .. } => "template_duplicate_configuration",
            TemplateError::DuplicateReference { .. } => "template_duplicate_reference",
            TemplateError::IncompleteReference { .. } => "template_incomplete_reference",
            TemplateError::Cardinality { .. } => "template_cardinality",
            TemplateError::Target { .. } => "template_target",
            TemplateError::MissingServiceType { .. } => "template_missing_service_type",
        }
    }
}

/// # Errors raised while opening a phase.
///
/// Clonable: a single outcome completes the submitter and every matching observer.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The injector failed to construct (or the registry failed to publish) a component.
    #[error("activation of {component} failed: {reason}")]
    Activation {
        /// Instance name.
        component: Arc<str>,
        /// Underlying failure message.
        reason: Arc<str>,
    },

    /// A reference could not be resolved (bad override filter or cardinality).
    #[error("reference {reference} of {component} failed: {reason}")]
    Reference {
        /// Instance name.
        component: Arc<str>,
        /// Reference name.
        reference: Arc<str>,
        /// Underlying failure message.
        reason: Arc<str>,
    },

    /// The injector handle was not set when activation needed it.
    #[error("injector unavailable for {component}")]
    InjectorUnavailable {
        /// Instance name.
        component: Arc<str>,
    },

    /// Work submitted for an operation panicked.
    #[error("operation {op} panicked: {reason}")]
    Panicked {
        /// Rendered op.
        op: Arc<str>,
        /// Panic payload, if it was a string.
        reason: Arc<str>,
    },

    /// The sequencer stopped before the operation ran.
    #[error("operation {op} abandoned")]
    Abandoned {
        /// Rendered op.
        op: Arc<str>,
    },
}

impl LifecycleError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LifecycleError::Activation { .. } => "lifecycle_activation",
            LifecycleError::Reference { .. } => "lifecycle_reference",
            LifecycleError::InjectorUnavailable { .. } => "lifecycle_injector_unavailable",
            LifecycleError::Panicked { .. } => "lifecycle_panicked",
            LifecycleError::Abandoned { .. } => "lifecycle_abandoned",
        }
    }

    pub(crate) fn activation(component: &str, reason: impl ToString) -> Self {
        LifecycleError::Activation {
            component: component.into(),
            reason: reason.to_string().into(),
        }
    }

    pub(crate) fn reference(component: &str, reference: &str, reason: impl ToString) -> Self {
        LifecycleError::Reference {
            component: component.into(),
            reference: reference.into(),
            reason: reason.to_string().into(),
        }
    }
}

/// # Errors returned by the [`Runtime`](crate::Runtime) API.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The injector did not become ready in time; nothing was opened.
    #[error("injector not ready within {timeout:?}")]
    InjectorTimeout {
        /// Configured wait.
        timeout: Duration,
    },

    /// No component with that name was accepted by the runtime.
    #[error("unknown component {name}")]
    UnknownComponent {
        /// Requested name.
        name: String,
    },

    /// The runtime was stopped; it cannot be started again.
    #[error("runtime {name} is closing")]
    Closing {
        /// Runtime name.
        name: String,
    },

    /// The operation itself failed.
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InjectorTimeout { .. } => "runtime_injector_timeout",
            RuntimeError::UnknownComponent { .. } => "runtime_unknown_component",
            RuntimeError::Closing { .. } => "runtime_closing",
            RuntimeError::Lifecycle(e) => e.as_label(),
        }
    }
}

/// # Syntax errors in filter expressions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Input ended inside an expression.
    #[error("unexpected end of filter at offset {offset}")]
    UnexpectedEnd {
        /// Character offset.
        offset: usize,
    },

    /// A character that cannot appear here.
    #[error("unexpected {found:?} at offset {offset}")]
    Unexpected {
        /// Offending character.
        found: char,
        /// Character offset.
        offset: usize,
    },

    /// An item without an attribute name.
    #[error("missing attribute name at offset {offset}")]
    EmptyAttribute {
        /// Character offset.
        offset: usize,
    },

    /// Input continues after a complete filter.
    #[error("trailing input at offset {offset}")]
    Trailing {
        /// Character offset.
        offset: usize,
    },
}

impl FilterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            FilterError::UnexpectedEnd { .. } => "filter_unexpected_end",
            FilterError::Unexpected { .. } => "filter_unexpected",
            FilterError::EmptyAttribute { .. } => "filter_empty_attribute",
            FilterError::Trailing { .. } => "filter_trailing",
        }
    }
}
