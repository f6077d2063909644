//! Concrete fan-out tasks and the registry wiring for them.

pub mod add_nodes;
pub mod disconnect_slaves;
pub mod host_health;
pub mod node_health;
pub mod reconnect_slaves;
pub mod remove_nodes;
pub mod remove_slaves;
pub mod tags;
pub mod templates;

use std::sync::Arc;

use labkeeper_core::api::{Task, TaskRegistry};

pub use add_nodes::{AddNodesTask, ADD_NODES};
pub use disconnect_slaves::{DisconnectSlavesTask, DISCONNECT_SLAVES};
pub use host_health::{HostCheck, HostHealthMonitorTask, VmCheck, HOST_HEALTH_MONITOR};
pub use node_health::{NodeCheck, NodeHealthMonitorTask, NODE_HEALTH_MONITOR};
pub use reconnect_slaves::{ReconnectSlavesTask, RECONNECT_SLAVES};
pub use remove_nodes::{RemoveNodesTask, REMOVE_NODES};
pub use remove_slaves::{RemoveSlavesTask, REMOVE_SLAVES};

/// Register every task this crate ships under its public name.
pub fn register_builtin_tasks(registry: &mut TaskRegistry) -> &mut TaskRegistry {
    registry
        .register(NODE_HEALTH_MONITOR, |params, services, cfg| {
            Ok(Arc::new(NodeHealthMonitorTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(HOST_HEALTH_MONITOR, |params, services, cfg| {
            Ok(Arc::new(HostHealthMonitorTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(ADD_NODES, |params, services, cfg| {
            Ok(Arc::new(AddNodesTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(REMOVE_NODES, |params, services, cfg| {
            Ok(Arc::new(RemoveNodesTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(RECONNECT_SLAVES, |params, services, cfg| {
            Ok(Arc::new(ReconnectSlavesTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(DISCONNECT_SLAVES, |params, services, cfg| {
            Ok(Arc::new(DisconnectSlavesTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
        .register(REMOVE_SLAVES, |params, services, cfg| {
            Ok(Arc::new(RemoveSlavesTask::new(params, services, cfg)?) as Arc<dyn Task>)
        })
}

/// A registry holding every built-in task.
pub fn builtin_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    register_builtin_tasks(&mut registry);
    registry
}
