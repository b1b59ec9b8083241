//! # Configuration store collaborator.
//!
//! A configuration is a property map identified by a pid. Factory configurations
//! additionally carry a factory pid; their pid has the form `<factoryPid>~<name>`.
//!
//! ## Rules
//! - Stored properties always contain `service.pid` (and `service.factoryPid` for
//!   factory configurations).
//! - Mutators are `async` and deliver the resulting [`ConfigurationEvent`] to every
//!   listener in turn, awaiting each. When a mutator returns, every listener has
//!   finished reacting to it.
//! - The store lock is never held while a listener runs.
//!
//! ## Example
//! ```rust
//! use scrim::{ConfigurationStore, InMemoryConfigurationStore, properties::Properties};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryConfigurationStore::new();
//! let pid = store.update_factory("pool", "one", Properties::new()).await;
//! assert_eq!(pid, "pool~one");
//! assert_eq!(store.list_factory("pool").len(), 1);
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

use crate::properties::{self, Properties};

/// Kind of configuration change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigurationEventKind {
    Updated,
    Deleted,
    /// The binding location changed; properties did not.
    LocationChanged,
}

/// One configuration change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigurationEvent {
    pub kind: ConfigurationEventKind,
    pub pid: String,
    pub factory_pid: Option<String>,
}

/// Receives configuration changes.
#[async_trait]
pub trait ConfigurationListener: Send + Sync + 'static {
    /// Handles one event; the store waits for this to return.
    async fn configuration_event(&self, event: &ConfigurationEvent);
}

/// Identity of a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Read side of the configuration store plus listener registration.
pub trait ConfigurationStore: Send + Sync + 'static {
    /// Properties of `pid`, if present.
    fn get(&self, pid: &str) -> Option<Properties>;

    /// All `(pid, properties)` of factory configurations of `factory_pid`, by pid.
    fn list_factory(&self, factory_pid: &str) -> Vec<(String, Properties)>;

    fn add_listener(&self, listener: Arc<dyn ConfigurationListener>) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

struct Stored {
    factory_pid: Option<String>,
    properties: Properties,
    location: Option<String>,
}

#[derive(Default)]
struct Inner {
    configurations: BTreeMap<String, Stored>,
    listeners: Vec<(ListenerId, Arc<dyn ConfigurationListener>)>,
}

/// In-process configuration store.
#[derive(Default)]
pub struct InMemoryConfigurationStore {
    inner: Mutex<Inner>,
    ids: AtomicU64,
}

impl InMemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates or replaces the configuration `pid`.
    pub async fn update(&self, pid: &str, properties: Properties) {
        self.store(pid.to_string(), None, properties).await;
    }

    /// Creates or replaces the factory configuration `<factory_pid>~<name>`; returns its pid.
    pub async fn update_factory(&self, factory_pid: &str, name: &str, properties: Properties) -> String {
        let pid = format!("{factory_pid}~{name}");
        self.store(pid.clone(), Some(factory_pid.to_string()), properties)
            .await;
        pid
    }

    /// Deletes `pid`; returns whether it existed.
    pub async fn delete(&self, pid: &str) -> bool {
        let removed = self.inner.lock().configurations.remove(pid);
        let Some(stored) = removed else {
            return false;
        };
        self.notify(ConfigurationEvent {
            kind: ConfigurationEventKind::Deleted,
            pid: pid.to_string(),
            factory_pid: stored.factory_pid,
        })
        .await;
        true
    }

    /// Rebinds `pid` to another location.
    pub async fn set_location(&self, pid: &str, location: Option<String>) -> bool {
        let factory_pid = {
            let mut inner = self.inner.lock();
            let Some(stored) = inner.configurations.get_mut(pid) else {
                return false;
            };
            stored.location = location;
            stored.factory_pid.clone()
        };
        self.notify(ConfigurationEvent {
            kind: ConfigurationEventKind::LocationChanged,
            pid: pid.to_string(),
            factory_pid,
        })
        .await;
        true
    }

    /// Bound location of `pid`.
    pub fn location(&self, pid: &str) -> Option<String> {
        self.inner
            .lock()
            .configurations
            .get(pid)
            .and_then(|s| s.location.clone())
    }

    async fn store(&self, pid: String, factory_pid: Option<String>, mut props: Properties) {
        props.insert(properties::SERVICE_PID.into(), Value::from(pid.as_str()));
        if let Some(f) = &factory_pid {
            props.insert(properties::FACTORY_PID.into(), Value::from(f.as_str()));
        }
        {
            let mut inner = self.inner.lock();
            let location = inner
                .configurations
                .remove(&pid)
                .and_then(|previous| previous.location);
            inner.configurations.insert(
                pid.clone(),
                Stored {
                    factory_pid: factory_pid.clone(),
                    properties: props,
                    location,
                },
            );
        }
        self.notify(ConfigurationEvent {
            kind: ConfigurationEventKind::Updated,
            pid,
            factory_pid,
        })
        .await;
    }

    async fn notify(&self, event: ConfigurationEvent) {
        let listeners: Vec<Arc<dyn ConfigurationListener>> = self
            .inner
            .lock()
            .listeners
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        trace!(pid = %event.pid, kind = ?event.kind, listeners = listeners.len(), "configuration event");
        for listener in listeners {
            listener.configuration_event(&event).await;
        }
    }
}

impl ConfigurationStore for InMemoryConfigurationStore {
    fn get(&self, pid: &str) -> Option<Properties> {
        self.inner
            .lock()
            .configurations
            .get(pid)
            .map(|s| s.properties.clone())
    }

    fn list_factory(&self, factory_pid: &str) -> Vec<(String, Properties)> {
        self.inner
            .lock()
            .configurations
            .iter()
            .filter(|(_, s)| s.factory_pid.as_deref() == Some(factory_pid))
            .map(|(pid, s)| (pid.clone(), s.properties.clone()))
            .collect()
    }

    fn add_listener(&self, listener: Arc<dyn ConfigurationListener>) -> ListenerId {
        let id = ListenerId(self.ids.fetch_add(1, Ordering::Relaxed));
        self.inner.lock().listeners.push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.inner.lock().listeners.retain(|(l, _)| *l != id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<ConfigurationEvent>>);

    #[async_trait]
    impl ConfigurationListener for Recorder {
        async fn configuration_event(&self, event: &ConfigurationEvent) {
            self.0.lock().push(event.clone());
        }
    }

    #[tokio::test]
    async fn update_stamps_pids() {
        let store = InMemoryConfigurationStore::new();
        let pid = store.update_factory("pool", "a", Properties::new()).await;

        let props = store.get(&pid).unwrap();
        assert_eq!(props[properties::SERVICE_PID], json!("pool~a"));
        assert_eq!(props[properties::FACTORY_PID], json!("pool"));
    }

    #[tokio::test]
    async fn listeners_observe_every_change() {
        let store = InMemoryConfigurationStore::new();
        let recorder = Arc::new(Recorder::default());
        let id = store.add_listener(recorder.clone());

        store.update("svc.a", Properties::new()).await;
        store.set_location("svc.a", Some("mod-1".into())).await;
        assert!(store.delete("svc.a").await);
        assert!(!store.delete("svc.a").await);

        store.remove_listener(id);
        store.update("svc.b", Properties::new()).await;

        let kinds: Vec<ConfigurationEventKind> = recorder.0.lock().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ConfigurationEventKind::Updated,
                ConfigurationEventKind::LocationChanged,
                ConfigurationEventKind::Deleted,
            ]
        );
    }

    #[tokio::test]
    async fn location_survives_update() {
        let store = InMemoryConfigurationStore::new();
        store.update("svc.a", Properties::new()).await;
        store.set_location("svc.a", Some("mod-1".into())).await;
        store.update("svc.a", Properties::new()).await;
        assert_eq!(store.location("svc.a").as_deref(), Some("mod-1"));
    }

    #[tokio::test]
    async fn list_factory_filters_by_factory_pid() {
        let store = InMemoryConfigurationStore::new();
        store.update_factory("pool", "b", Properties::new()).await;
        store.update_factory("pool", "a", Properties::new()).await;
        store.update_factory("other", "a", Properties::new()).await;
        store.update("pool", Properties::new()).await;

        let pids: Vec<String> = store.list_factory("pool").into_iter().map(|(p, _)| p).collect();
        assert_eq!(pids, vec!["pool~a".to_string(), "pool~b".to_string()]);
    }
}
