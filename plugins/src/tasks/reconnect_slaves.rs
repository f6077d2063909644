//! Reconnect Jenkins build slaves and mark them online in the slave pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use labkeeper_core::api::{
    params, AdminOperation, Services, SubTaskId, SubTaskOutcome, Task, TaskContext, TaskError,
    TasksConfig,
};

pub const RECONNECT_SLAVES: &str = "ReconnectSlavesTask";

pub struct ReconnectSlavesTask {
    ctx: TaskContext,
    services: Arc<Services>,
    slaves: Vec<String>,
}

impl ReconnectSlavesTask {
    /// Params: `data`, a list of `{"name": ...}` objects.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let slaves = params::required_object_list(params, "data")?
            .iter()
            .map(|slave| {
                slave
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| {
                        TaskError::InvalidParams(format!(
                            "name missing from slave : {}",
                            Value::Object(slave.clone())
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            ctx: TaskContext::new(RECONNECT_SLAVES, cfg.workers_for(RECONNECT_SLAVES, None)),
            services: Arc::new(services.clone()),
            slaves,
        })
    }
}

#[async_trait]
impl Task for ReconnectSlavesTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let pending: Vec<(String, SubTaskId)> = self
            .slaves
            .iter()
            .map(|name| {
                let id = self.add_sub_task(
                    "reconnect_slave",
                    (self.services.clone(), name.clone()),
                    reconnect_slave,
                );
                (name.clone(), id)
            })
            .collect();

        for (name, id) in pending {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(name, result)?;
        }
        self.complete_task(true)
    }
}

async fn reconnect_slave((services, name): (Arc<Services>, String)) -> SubTaskOutcome {
    let mut doc = services.slaves.get(&name).await.map_err(|e| {
        TaskError::from(e).context(format!("Cannot find slave name {name} doc in slave-pool"))
    })?;
    let jenkins_host = doc
        .get("jenkins_host")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::Check(format!("slave {name} has no jenkins_host")))?;

    let jenkins = services.admin_for(jenkins_host).map_err(|e| {
        TaskError::from(e).context(format!("Cannot fetch jenkins client for slave {name}"))
    })?;
    let response = jenkins
        .call(&AdminOperation::ReconnectSlave { name: name.clone() })
        .await
        .map_err(|e| {
            TaskError::from(e).context(format!("Cannot reconnect slave {name} to jenkins"))
        })?;
    info!(slave = %name, instance = jenkins.name(), "slave reconnected to jenkins");

    if let Some(obj) = doc.as_object_mut() {
        obj.insert("state".into(), json!("online"));
    }
    services.slaves.upsert(&name, &doc).await.map_err(|e| {
        TaskError::from(e).context(format!("Cannot update slave {name} in slave pool"))
    })?;
    info!(slave = %name, "slave marked online in slave pool");

    let mut report = Map::new();
    report.insert("reconnect_slave_from_jenkins".into(), response.to_pair());
    report.insert("update_slave_in_slave_pool".into(), json!(true));
    Ok(Value::Object(report))
}
