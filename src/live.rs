//! # Live runtime state.
//!
//! Live objects mirror what the phase chain is doing right now. They are written only
//! by the phase that owns them (under that phase's guard) and read by anyone, most
//! notably the introspection snapshot.
//!
//! ## Rules
//! - Lists are copy-on-write ([`ArcSwap`]); a reader always sees a whole list.
//! - [`ConfigurationLive`] and [`ReferenceLive`] are immutable; updates replace them.
//! - Every structural mutation bumps the shared [`ChangeCount`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::Serialize;

use crate::properties::Properties;
use crate::registry::ServiceRef;
use crate::template::{ComponentTemplate, ConfigurationTemplate, ReferenceTemplate};

/// Monotonic counter of structural mutations.
#[derive(Debug, Default)]
pub struct ChangeCount(AtomicU64);

impl ChangeCount {
    #[inline]
    pub(crate) fn bump(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Current value.
    #[inline]
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Acquire)
    }
}

/// Activation state of one instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceState {
    Unresolved,
    ConfigResolved,
    ReferencesResolved,
    Active,
}

impl InstanceState {
    pub fn as_label(&self) -> &'static str {
        match self {
            InstanceState::Unresolved => "unresolved",
            InstanceState::ConfigResolved => "config-resolved",
            InstanceState::ReferencesResolved => "references-resolved",
            InstanceState::Active => "active",
        }
    }
}

/// A configuration matched to an instance.
#[derive(Clone, Debug)]
pub struct ConfigurationLive {
    /// The requirement this configuration satisfies.
    pub template: ConfigurationTemplate,
    pub pid: String,
    pub factory_pid: Option<String>,
    /// Last observed properties.
    pub properties: Properties,
}

/// Resolution state of one reference of an instance.
#[derive(Clone, Debug)]
pub struct ReferenceLive {
    pub template: ReferenceTemplate,
    /// Effective filter, rendered.
    pub target: String,
    /// Effective minimum cardinality.
    pub minimum: usize,
    /// All matches, best first.
    pub matches: Vec<ServiceRef>,
    /// The matches handed to the component.
    pub bound: Vec<ServiceRef>,
}

impl ReferenceLive {
    #[inline]
    pub fn is_satisfied(&self) -> bool {
        self.matches.len() >= self.minimum
    }
}

/// Live state of one component.
#[derive(Debug)]
pub struct ComponentLive {
    template: Arc<ComponentTemplate>,
    enabled: AtomicBool,
    instances: ArcSwap<Vec<Arc<InstanceLive>>>,
    changes: Arc<ChangeCount>,
}

impl ComponentLive {
    pub(crate) fn new(template: Arc<ComponentTemplate>, changes: Arc<ChangeCount>) -> Self {
        Self {
            enabled: AtomicBool::new(template.enabled),
            template,
            instances: ArcSwap::from_pointee(Vec::new()),
            changes,
        }
    }

    pub fn template(&self) -> &Arc<ComponentTemplate> {
        &self.template
    }

    pub fn name(&self) -> &str {
        &self.template.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub(crate) fn set_enabled(&self, enabled: bool) -> bool {
        let was = self.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            self.changes.bump();
        }
        was
    }

    /// Current instances.
    pub fn instances(&self) -> Arc<Vec<Arc<InstanceLive>>> {
        self.instances.load_full()
    }

    pub(crate) fn set_instances(&self, instances: Vec<Arc<InstanceLive>>) {
        self.instances.store(Arc::new(instances));
        self.changes.bump();
    }
}

/// Live state of one instance.
#[derive(Debug)]
pub struct InstanceLive {
    name: Arc<str>,
    id: u64,
    pid: Option<String>,
    state: RwLock<InstanceState>,
    configurations: ArcSwap<Vec<Arc<ConfigurationLive>>>,
    references: ArcSwap<Vec<Arc<ReferenceLive>>>,
    properties: ArcSwap<Properties>,
    changes: Arc<ChangeCount>,
}

impl InstanceLive {
    pub(crate) fn new(
        name: Arc<str>,
        id: u64,
        pid: Option<String>,
        changes: Arc<ChangeCount>,
    ) -> Self {
        Self {
            name,
            id,
            pid,
            state: RwLock::new(InstanceState::Unresolved),
            configurations: ArcSwap::from_pointee(Vec::new()),
            references: ArcSwap::from_pointee(Vec::new()),
            properties: ArcSwap::from_pointee(Properties::new()),
            changes,
        }
    }

    /// Instance name (component name, or `component[pid]` for factory instances).
    pub fn name(&self) -> &Arc<str> {
        &self.name
    }

    /// Runtime-unique id, published as `component.id`.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identifying factory configuration pid, for factory instances.
    pub fn pid(&self) -> Option<&str> {
        self.pid.as_deref()
    }

    pub fn state(&self) -> InstanceState {
        *self.state.read()
    }

    /// Returns the previous state.
    pub(crate) fn set_state(&self, state: InstanceState) -> InstanceState {
        let prev = std::mem::replace(&mut *self.state.write(), state);
        if prev != state {
            self.changes.bump();
        }
        prev
    }

    pub fn configurations(&self) -> Arc<Vec<Arc<ConfigurationLive>>> {
        self.configurations.load_full()
    }

    /// Inserts or replaces the configuration satisfying `config.template`.
    pub(crate) fn put_configuration(&self, config: ConfigurationLive) {
        let current = self.configurations.load();
        let mut next: Vec<Arc<ConfigurationLive>> = current
            .iter()
            .filter(|c| c.template.pid != config.template.pid)
            .cloned()
            .collect();
        next.push(Arc::new(config));
        self.configurations.store(Arc::new(next));
        self.changes.bump();
    }

    /// Removes the configuration with `pid`; returns whether one was present.
    pub(crate) fn remove_configuration(&self, pid: &str) -> bool {
        let current = self.configurations.load();
        if !current.iter().any(|c| c.pid == pid) {
            return false;
        }
        let next: Vec<Arc<ConfigurationLive>> =
            current.iter().filter(|c| c.pid != pid).cloned().collect();
        self.configurations.store(Arc::new(next));
        self.changes.bump();
        true
    }

    /// Configuration satisfying the template with `pid`, if any.
    pub fn configuration_for(&self, template_pid: &str) -> Option<Arc<ConfigurationLive>> {
        self.configurations
            .load()
            .iter()
            .find(|c| c.template.pid == template_pid)
            .cloned()
    }

    pub fn references(&self) -> Arc<Vec<Arc<ReferenceLive>>> {
        self.references.load_full()
    }

    pub(crate) fn set_references(&self, references: Vec<Arc<ReferenceLive>>) {
        self.references.store(Arc::new(references));
        self.changes.bump();
    }

    /// Merged properties of the last activation attempt.
    pub fn properties(&self) -> Arc<Properties> {
        self.properties.load_full()
    }

    pub(crate) fn set_properties(&self, properties: Properties) {
        self.properties.store(Arc::new(properties));
        self.changes.bump();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::ConfigurationTemplate;
    use serde_json::json;

    fn config(template: &str, pid: &str, x: i64) -> ConfigurationLive {
        let mut properties = Properties::new();
        properties.insert("x".into(), json!(x));
        ConfigurationLive {
            template: ConfigurationTemplate::required(template),
            pid: pid.into(),
            factory_pid: None,
            properties,
        }
    }

    #[test]
    fn put_replaces_configuration_of_same_template() {
        let changes = Arc::new(ChangeCount::default());
        let live = InstanceLive::new("a".into(), 1, None, changes.clone());

        live.put_configuration(config("a", "a", 1));
        live.put_configuration(config("a", "a", 2));
        live.put_configuration(config("b", "b", 3));

        let configs = live.configurations();
        assert_eq!(configs.len(), 2);
        assert_eq!(live.configuration_for("a").map(|c| c.properties["x"].clone()), Some(json!(2)));
        assert_eq!(changes.get(), 3);
    }

    #[test]
    fn remove_reports_presence() {
        let live = InstanceLive::new("a".into(), 1, None, Arc::default());
        live.put_configuration(config("a", "a", 1));
        assert!(live.remove_configuration("a"));
        assert!(!live.remove_configuration("a"));
        assert!(live.configurations().is_empty());
    }

    #[test]
    fn unchanged_state_does_not_count() {
        let changes = Arc::new(ChangeCount::default());
        let live = InstanceLive::new("a".into(), 1, None, changes.clone());
        live.set_state(InstanceState::Unresolved);
        assert_eq!(changes.get(), 0);
        assert_eq!(live.set_state(InstanceState::Active), InstanceState::Unresolved);
        assert_eq!(changes.get(), 1);
    }
}
