//! Shared service registry.
//!
//! - [`ServiceRegistry`]: the contract the reference resolver and instance activators use;
//! - [`InMemoryRegistry`]: in-process implementation.

mod memory;
mod service;

pub use memory::InMemoryRegistry;
pub use service::{
    ComponentObject, ConsumerId, ServiceEvent, ServiceEventKind, ServiceFactory, ServiceListener,
    ServiceObject, ServiceRef, ServiceRegistry, WatchId,
};
