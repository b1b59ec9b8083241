//! Configuration collaborator and the per-component listener driving instances from it.
//!
//! - [`ConfigurationStore`]: the contract the runtime reads and listens to;
//! - [`InMemoryConfigurationStore`]: in-process implementation;
//! - `ComponentConfigurationListener`: turns store events into ops on a component.

mod listener;
mod store;

pub(crate) use listener::ComponentConfigurationListener;
pub use store::{
    ConfigurationEvent, ConfigurationEventKind, ConfigurationListener, ConfigurationStore,
    InMemoryConfigurationStore, ListenerId,
};
