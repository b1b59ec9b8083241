//! # Component templates.
//!
//! Templates are the immutable, discovery-time description of a component: its kind,
//! how it is published, which configurations it needs and which service references
//! it depends on. The runtime only reads them.
//!
//! ## Example
//! ```rust
//! use scrim::{ComponentTemplate, ConfigurationTemplate, ReferenceTemplate, ServiceScope};
//!
//! let greeter = ComponentTemplate::single("greeter")
//!     .scope(ServiceScope::Singleton)
//!     .service("com.acme.Greeter")
//!     .configuration(ConfigurationTemplate::required("$"))
//!     .reference(ReferenceTemplate::mandatory("log", "com.acme.Log"));
//!
//! assert!(greeter.validate().is_ok());
//! assert_eq!(greeter.configurations[0].pid, "greeter");
//! ```

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use crate::error::TemplateError;
use crate::filter::Filter;
use crate::properties::Properties;

/// How many instances a component has.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Module-scoped component; exactly one instance.
    Container,
    /// Exactly one instance.
    Single,
    /// One instance per factory configuration.
    Factory,
}

/// How an active instance is exposed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceScope {
    /// Constructed and held; not published.
    None,
    /// One shared published object.
    Singleton,
    /// One object per consuming module.
    Bundle,
    /// One object per request.
    Prototype,
}

/// `ONE` (plain pid) or `MANY` (factory pid).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigurationCardinality {
    One,
    Many,
}

/// Whether an instance may activate without the configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConfigurationPolicy {
    Required,
    Optional,
}

/// A configuration requirement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConfigurationTemplate {
    /// Pid (`One`) or factory pid (`Many`). `"$"` stands for the component name.
    pub pid: String,
    pub cardinality: ConfigurationCardinality,
    pub policy: ConfigurationPolicy,
}

impl ConfigurationTemplate {
    /// Required single configuration.
    pub fn required(pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            cardinality: ConfigurationCardinality::One,
            policy: ConfigurationPolicy::Required,
        }
    }

    /// Optional single configuration.
    pub fn optional(pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            cardinality: ConfigurationCardinality::One,
            policy: ConfigurationPolicy::Optional,
        }
    }

    /// Identifying factory configuration of a factory component.
    pub fn factory(factory_pid: impl Into<String>) -> Self {
        Self {
            pid: factory_pid.into(),
            cardinality: ConfigurationCardinality::Many,
            policy: ConfigurationPolicy::Required,
        }
    }

    /// True if a configuration `pid` (with optional `factory_pid`) satisfies this template.
    pub fn matches(&self, pid: &str, factory_pid: Option<&str>) -> bool {
        match self.cardinality {
            ConfigurationCardinality::Many => factory_pid == Some(self.pid.as_str()),
            ConfigurationCardinality::One => factory_pid.is_none() && pid == self.pid,
        }
    }

    #[inline]
    pub fn is_required(&self) -> bool {
        self.policy == ConfigurationPolicy::Required
    }
}

/// Static references are rebound by reactivation, dynamic ones in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
    Static,
    Dynamic,
}

/// Whether a better match replaces a bound one (`Greedy`) or not (`Reluctant`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
    Reluctant,
    Greedy,
}

/// A service dependency.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferenceTemplate {
    /// Reference name; also the prefix of its override properties.
    pub name: String,
    /// Service type matched against `objectClass`.
    pub service_type: String,
    /// Optional static target filter.
    pub target: Option<String>,
    /// Minimum number of matches (`0` = optional).
    pub minimum: usize,
    /// Maximum number bound (`None` = unbounded).
    pub maximum: Option<usize>,
    pub policy: ReferencePolicy,
    pub option: PolicyOption,
}

impl ReferenceTemplate {
    /// Exactly one, required, static reluctant.
    pub fn mandatory(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            target: None,
            minimum: 1,
            maximum: Some(1),
            policy: ReferencePolicy::Static,
            option: PolicyOption::Reluctant,
        }
    }

    /// Zero or one.
    pub fn optional(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            minimum: 0,
            ..Self::mandatory(name, service_type)
        }
    }

    /// Zero or more.
    pub fn multiple(name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            minimum: 0,
            maximum: None,
            ..Self::mandatory(name, service_type)
        }
    }

    pub fn target(mut self, filter: impl Into<String>) -> Self {
        self.target = Some(filter.into());
        self
    }

    pub fn minimum(mut self, minimum: usize) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn maximum(mut self, maximum: Option<usize>) -> Self {
        self.maximum = maximum;
        self
    }

    pub fn dynamic(mut self) -> Self {
        self.policy = ReferencePolicy::Dynamic;
        self
    }

    pub fn greedy(mut self) -> Self {
        self.option = PolicyOption::Greedy;
        self
    }

    /// Name of the property that adds a target filter.
    pub fn target_property(&self) -> String {
        format!("{}.target", self.name)
    }

    /// Name of the property that raises the minimum cardinality.
    pub fn minimum_property(&self) -> String {
        format!("{}.cardinality.minimum", self.name)
    }
}

/// Immutable description of one component.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComponentTemplate {
    pub name: String,
    pub kind: ComponentKind,
    pub scope: ServiceScope,
    /// Types the component is published under (ignored for `ServiceScope::None`).
    pub service_types: Vec<String>,
    /// Default properties.
    pub properties: Properties,
    pub configurations: Vec<ConfigurationTemplate>,
    pub references: Vec<ReferenceTemplate>,
    /// Initial enablement.
    pub enabled: bool,
}

impl ComponentTemplate {
    /// Creates a template with no configurations or references.
    pub fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            scope: ServiceScope::None,
            service_types: Vec::new(),
            properties: Properties::new(),
            configurations: Vec::new(),
            references: Vec::new(),
            enabled: true,
        }
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Single)
    }

    pub fn factory(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Factory)
    }

    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Container)
    }

    pub fn scope(mut self, scope: ServiceScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn service(mut self, service_type: impl Into<String>) -> Self {
        self.service_types.push(service_type.into());
        self
    }

    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds a configuration requirement; pid `"$"` becomes the component name.
    pub fn configuration(mut self, mut template: ConfigurationTemplate) -> Self {
        if template.pid == "$" {
            template.pid = self.name.clone();
        }
        self.configurations.push(template);
        self
    }

    pub fn reference(mut self, template: ReferenceTemplate) -> Self {
        self.references.push(template);
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// The identifying factory configuration, if any.
    pub fn factory_configuration(&self) -> Option<&ConfigurationTemplate> {
        self.configurations
            .iter()
            .find(|c| c.cardinality == ConfigurationCardinality::Many)
    }

    /// Checks the structural rules a template must satisfy before activation.
    pub fn validate(&self) -> Result<(), TemplateError> {
        let component = || self.name.clone();
        if self.name.trim().is_empty() {
            return Err(TemplateError::EmptyName);
        }

        let many: Vec<&ConfigurationTemplate> = self
            .configurations
            .iter()
            .filter(|c| c.cardinality == ConfigurationCardinality::Many)
            .collect();
        match self.kind {
            ComponentKind::Factory => {
                if many.len() != 1 {
                    return Err(TemplateError::FactoryConfiguration {
                        component: component(),
                        found: many.len(),
                    });
                }
                if !many[0].is_required() {
                    return Err(TemplateError::OptionalFactoryConfiguration {
                        component: component(),
                        pid: many[0].pid.clone(),
                    });
                }
            }
            ComponentKind::Single | ComponentKind::Container => {
                if let Some(c) = many.first() {
                    return Err(TemplateError::UnexpectedFactoryConfiguration {
                        component: component(),
                        pid: c.pid.clone(),
                    });
                }
            }
        }

        let mut pids = HashSet::new();
        for c in &self.configurations {
            if !pids.insert(c.pid.as_str()) {
                return Err(TemplateError::DuplicateConfiguration {
                    component: component(),
                    pid: c.pid.clone(),
                });
            }
        }

        let mut names = HashSet::new();
        for r in &self.references {
            if r.name.trim().is_empty() || r.service_type.trim().is_empty() {
                return Err(TemplateError::IncompleteReference {
                    component: component(),
                    reference: r.name.clone(),
                });
            }
            if !names.insert(r.name.as_str()) {
                return Err(TemplateError::DuplicateReference {
                    component: component(),
                    reference: r.name.clone(),
                });
            }
            if let Some(max) = r.maximum {
                if max == 0 || max < r.minimum {
                    return Err(TemplateError::Cardinality {
                        component: component(),
                        reference: r.name.clone(),
                        minimum: r.minimum,
                        maximum: max,
                    });
                }
            }
            if let Some(target) = &r.target {
                target
                    .parse::<Filter>()
                    .map_err(|source| TemplateError::Target {
                        component: component(),
                        reference: r.name.clone(),
                        source,
                    })?;
            }
        }

        if self.scope != ServiceScope::None && self.service_types.is_empty() {
            return Err(TemplateError::MissingServiceType {
                component: component(),
            });
        }
        Ok(())
    }
}
