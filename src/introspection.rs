//! # Introspection snapshots.
//!
//! [`RuntimeSnapshot`] is a read-only view of a runtime, re-derived from the live state on
//! every call. Compare `change_count` between two snapshots to detect "nothing changed"
//! without a deep comparison.
//!
//! Snapshots serialize with `serde` (camelCase keys):
//! ```text
//! { "name": "scrim", "errors": [...], "changeCount": 12,
//!   "components": [ { "name": "a", "kind": "single", "enabled": true,
//!                     "instances": [ { "name": "a", "id": 1, "state": "ACTIVE", ... } ] } ] }
//! ```

use serde::Serialize;

use crate::live::{ComponentLive, ConfigurationLive, InstanceLive, InstanceState, ReferenceLive};
use crate::properties::Properties;
use crate::template::{ComponentKind, ConfigurationCardinality, ConfigurationPolicy, ServiceScope};

/// Container-wide state.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    pub name: String,
    /// Recorded errors, oldest first.
    pub errors: Vec<String>,
    pub components: Vec<ComponentSnapshot>,
    /// Incremented on every structural mutation.
    pub change_count: u64,
}

impl RuntimeSnapshot {
    pub fn component(&self, name: &str) -> Option<&ComponentSnapshot> {
        self.components.iter().find(|c| c.name == name)
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSnapshot {
    pub name: String,
    pub kind: ComponentKind,
    pub scope: ServiceScope,
    pub enabled: bool,
    pub instances: Vec<InstanceSnapshot>,
}

impl ComponentSnapshot {
    pub(crate) fn of(live: &ComponentLive) -> Self {
        let template = live.template();
        Self {
            name: template.name.clone(),
            kind: template.kind,
            scope: template.scope,
            enabled: live.is_enabled(),
            instances: live.instances().iter().map(|i| InstanceSnapshot::of(i)).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub name: String,
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
    pub state: InstanceState,
    pub properties: Properties,
    pub configurations: Vec<ConfigurationSnapshot>,
    pub references: Vec<ReferenceSnapshot>,
}

impl InstanceSnapshot {
    fn of(live: &InstanceLive) -> Self {
        Self {
            name: live.name().to_string(),
            id: live.id(),
            pid: live.pid().map(str::to_string),
            state: live.state(),
            properties: (*live.properties()).clone(),
            configurations: live
                .configurations()
                .iter()
                .map(|c| ConfigurationSnapshot::of(c))
                .collect(),
            references: live.references().iter().map(|r| ReferenceSnapshot::of(r)).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationSnapshot {
    pub pid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub factory_pid: Option<String>,
    /// Pid of the template it satisfies.
    pub template: String,
    pub cardinality: ConfigurationCardinality,
    pub policy: ConfigurationPolicy,
    pub properties: Properties,
}

impl ConfigurationSnapshot {
    fn of(live: &ConfigurationLive) -> Self {
        Self {
            pid: live.pid.clone(),
            factory_pid: live.factory_pid.clone(),
            template: live.template.pid.clone(),
            cardinality: live.template.cardinality,
            policy: live.template.policy,
            properties: live.properties.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSnapshot {
    pub name: String,
    pub service_type: String,
    /// Effective filter.
    pub target: String,
    /// Effective minimum cardinality.
    pub minimum: usize,
    pub maximum: Option<usize>,
    pub satisfied: bool,
    /// Service ids of all matches, best first.
    pub matches: Vec<u64>,
    /// Service ids handed to the component.
    pub bound: Vec<u64>,
}

impl ReferenceSnapshot {
    fn of(live: &ReferenceLive) -> Self {
        Self {
            name: live.template.name.clone(),
            service_type: live.template.service_type.clone(),
            target: live.target.clone(),
            minimum: live.minimum,
            maximum: live.template.maximum,
            satisfied: live.is_satisfied(),
            matches: live.matches.iter().map(|r| r.id()).collect(),
            bound: live.bound.iter().map(|r| r.id()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::live::ChangeCount;
    use crate::template::{ComponentTemplate, ConfigurationTemplate};

    #[test]
    fn snapshot_serializes_camel_case() {
        let changes = Arc::new(ChangeCount::default());
        let live = ComponentLive::new(
            Arc::new(ComponentTemplate::factory("pool").configuration(ConfigurationTemplate::factory("pool"))),
            changes.clone(),
        );
        let instance = Arc::new(InstanceLive::new("pool[pool~one]".into(), 7, Some("pool~one".into()), changes.clone()));
        instance.put_configuration(ConfigurationLive {
            template: ConfigurationTemplate::factory("pool"),
            pid: "pool~one".into(),
            factory_pid: Some("pool".into()),
            properties: Properties::new(),
        });
        live.set_instances(vec![instance]);

        let snapshot = RuntimeSnapshot {
            name: "rt".into(),
            errors: vec![],
            components: vec![ComponentSnapshot::of(&live)],
            change_count: changes.get(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["changeCount"], serde_json::json!(changes.get()));
        let instance = &json["components"][0]["instances"][0];
        assert_eq!(instance["state"], "UNRESOLVED");
        assert_eq!(instance["configurations"][0]["factoryPid"], "pool");
        assert_eq!(snapshot.component("pool").map(|c| c.instances.len()), Some(1));
    }
}
