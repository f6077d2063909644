//! Take Jenkins build slaves offline and mark them so in the slave pool.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use labkeeper_core::api::{
    params, AdminOperation, Services, SubTaskId, SubTaskOutcome, Task, TaskContext, TaskError,
    TasksConfig,
};

pub const DISCONNECT_SLAVES: &str = "DisconnectSlavesTask";

struct SlaveRequest {
    name: String,
    message: String,
}

pub struct DisconnectSlavesTask {
    ctx: TaskContext,
    services: Arc<Services>,
    slaves: Vec<SlaveRequest>,
}

impl DisconnectSlavesTask {
    /// Params: `data`, a list of `{"name": ..., "message": ...}` objects.
    /// `message` becomes the offline reason shown by Jenkins and may be
    /// left out.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let slaves = params::required_object_list(params, "data")?
            .iter()
            .map(|slave| {
                let name = params::require_str(slave, "name", "slave")?.to_string();
                let message = slave
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(SlaveRequest { name, message })
            })
            .collect::<Result<Vec<_>, TaskError>>()?;
        Ok(Self {
            ctx: TaskContext::new(DISCONNECT_SLAVES, cfg.workers_for(DISCONNECT_SLAVES, None)),
            services: Arc::new(services.clone()),
            slaves,
        })
    }
}

#[async_trait]
impl Task for DisconnectSlavesTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let pending: Vec<(String, SubTaskId)> = self
            .slaves
            .iter()
            .map(|slave| {
                let id = self.add_sub_task(
                    "disconnect_slave",
                    (self.services.clone(), slave.name.clone(), slave.message.clone()),
                    disconnect_slave,
                );
                (slave.name.clone(), id)
            })
            .collect();

        for (name, id) in pending {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(name, result)?;
        }
        self.complete_task(true)
    }
}

async fn disconnect_slave(
    (services, name, message): (Arc<Services>, String, String),
) -> SubTaskOutcome {
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
        .call(&AdminOperation::DisconnectSlave {
            name: name.clone(),
            reason: message,
        })
        .await
        .map_err(|e| {
            TaskError::from(e).context(format!("Cannot disconnect slave {name} from jenkins"))
        })?;
    info!(slave = %name, instance = jenkins.name(), "slave disconnected from jenkins");

    if let Some(obj) = doc.as_object_mut() {
        obj.insert("state".into(), json!("offline"));
    }
    services.slaves.upsert(&name, &doc).await.map_err(|e| {
        TaskError::from(e).context(format!("Cannot update slave {name} in slave pool"))
    })?;
    info!(slave = %name, "slave marked offline in slave pool");

    let mut report = Map::new();
    report.insert("disconnect_slave_from_jenkins".into(), response.to_pair());
    report.insert("update_slave_in_slave_pool".into(), json!(true));
    Ok(Value::Object(report))
}
