//! Drop nodes from the server pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use labkeeper_core::api::{
    params, Services, SubTaskId, SubTaskOutcome, Task, TaskContext, TaskError, TasksConfig,
};

pub const REMOVE_NODES: &str = "RemoveNodesTask";

pub struct RemoveNodesTask {
    ctx: TaskContext,
    services: Arc<Services>,
    nodes: Vec<String>,
    retries: u32,
}

impl RemoveNodesTask {
    /// Params: `data`, a list of `{"ipaddr": ...}` objects, and an optional
    /// `retries` count for the store deletes.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let nodes = params::required_object_list(params, "data")?
            .iter()
            .map(|node| params::require_str(node, "ipaddr", "node").map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        let retries = match params.get("retries") {
            None | Some(Value::Null) => services.servers.default_retries(),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    TaskError::InvalidParams(format!("retries has to be a positive integer : {v}"))
                })?,
        };
        Ok(Self {
            ctx: TaskContext::new(REMOVE_NODES, cfg.workers_for(REMOVE_NODES, None)),
            services: Arc::new(services.clone()),
            nodes,
            retries,
        })
    }
}

#[async_trait]
impl Task for RemoveNodesTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let pending: Vec<(String, SubTaskId)> = self
            .nodes
            .iter()
            .map(|ipaddr| {
                let id = self.add_sub_task(
                    "remove_node",
                    (self.services.clone(), ipaddr.clone(), self.retries),
                    remove_node,
                );
                (ipaddr.clone(), id)
            })
            .collect();

        for (ipaddr, id) in pending {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(ipaddr, result)?;
        }
        self.complete_task(true)
    }
}

async fn remove_node(
    (services, ipaddr, retries): (Arc<Services>, String, u32),
) -> SubTaskOutcome {
    services
        .servers
        .delete_with_retries(&ipaddr, retries)
        .await
        .map_err(|e| {
            TaskError::from(e).context(format!("Cannot delete node {ipaddr} doc in server-pool"))
        })?;
    info!(node = %ipaddr, "node removed from server pool");
    Ok(json!({ "remove_node_from_server_pool": true }))
}
