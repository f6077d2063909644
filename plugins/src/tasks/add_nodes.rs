//! Register new nodes in the server pool after introspecting them over SSH.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

use labkeeper_core::api::{
    params, HostCredentials, Services, SubTaskId, SubTaskOutcome, Task, TaskContext, TaskError,
    TasksConfig,
};

use super::templates::{empty_node, DOC_KEY};

pub const ADD_NODES: &str = "AddNodesTask";

/// Fields every entry of `data` needs besides `ipaddr`.
const NODE_FIELDS_REQUIRED: &[&str] =
    &["ssh_username", "ssh_password", "vm_name", "poolId", "origin"];

pub struct AddNodesTask {
    ctx: TaskContext,
    services: Arc<Services>,
    nodes: Vec<Map<String, Value>>,
}

impl AddNodesTask {
    /// Params: `data`, a list of node objects. Only `ipaddr` is checked
    /// here, and must be unique since it keys the report; the remaining
    /// fields fail the node's own subtask.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let nodes = params::required_object_list(params, "data")?;
        let mut seen = HashSet::with_capacity(nodes.len());
        for node in &nodes {
            let Some(ipaddr) = node.get("ipaddr").and_then(Value::as_str) else {
                return Err(TaskError::InvalidParams(format!(
                    "ipaddr missing from node : {}",
                    Value::Object(node.clone())
                )));
            };
            if !seen.insert(ipaddr) {
                return Err(TaskError::InvalidParams(format!(
                    "ipaddr {ipaddr} appears more than once in data"
                )));
            }
        }
        Ok(Self {
            ctx: TaskContext::new(ADD_NODES, cfg.workers_for(ADD_NODES, None)),
            services: Arc::new(services.clone()),
            nodes,
        })
    }
}

#[async_trait]
impl Task for AddNodesTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let pending: Vec<(String, SubTaskId)> = self
            .nodes
            .iter()
            .map(|node| {
                let ipaddr = node
                    .get("ipaddr")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let id = self.add_sub_task(
                    "add_node",
                    (self.services.clone(), node.clone()),
                    add_node,
                );
                (ipaddr, id)
            })
            .collect();

        for (ipaddr, id) in pending {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(ipaddr, result)?;
        }
        self.complete_task(true)
    }
}

async fn add_node((services, node): (Arc<Services>, Map<String, Value>)) -> SubTaskOutcome {
    let what = "node";
    let ipaddr = params::require_str(&node, "ipaddr", what)?;
    for required in NODE_FIELDS_REQUIRED {
        if !node.contains_key(*required) {
            return Err(TaskError::InvalidParams(format!(
                "Field {required} not present for node {ipaddr}"
            )));
        }
    }
    let creds = HostCredentials::new(
        ipaddr,
        params::require_str(&node, "ssh_username", what)?,
        params::require_str(&node, "ssh_password", what)?,
    );

    let remote = services
        .remote
        .connect(&creds)
        .await
        .map_err(|e| TaskError::from(e).context(format!("Cannot connect to node {ipaddr}")))?;
    info!(node = %ipaddr, "connected to node");

    let mac_address = remote.find_mac_address().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find mac address for node {ipaddr}"))
    })?;
    let memory = remote.find_memory_total().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find total memory for node {ipaddr}"))
    })?;
    let os = remote.find_os_version().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find os version for node {ipaddr}"))
    })?;
    let init_report = remote.initialize_node().await;
    info!(node = %ipaddr, "node initialization finished");

    let field = |key: &str| node.get(key).cloned().unwrap_or(Value::Null);
    let mut doc = empty_node();
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(DOC_KEY.into(), json!(ipaddr));
        obj.insert("ipaddr".into(), json!(ipaddr));
        obj.insert("mac_address".into(), json!(mac_address));
        obj.insert("vm_name".into(), field("vm_name"));
        obj.insert("memory".into(), json!(memory));
        obj.insert("origin".into(), field("origin"));
        obj.insert("os".into(), json!(os.os));
        obj.insert("os_version".into(), json!(os.os_version));
        obj.insert("poolId".into(), field("poolId"));
        obj.insert("state".into(), json!("available"));
        obj.insert("added_on".into(), json!(Utc::now().to_rfc3339()));
    }

    services
        .servers
        .upsert(ipaddr, &doc)
        .await
        .map_err(|e| TaskError::from(e).context(format!("Cannot add node {ipaddr} into server pool")))?;
    info!(node = %ipaddr, "node added to server pool");

    Ok(json!({
        "init_node_res": init_report,
        "node_doc": doc,
    }))
}
