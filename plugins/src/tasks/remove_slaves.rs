//! Remove build slaves from the slave pool, and optionally from Jenkins.
//!
//! Each enabled step runs as its own wave over every slave, Jenkins first,
//! and lands under `<slave> -> <step>` in the report.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use labkeeper_core::api::{
    params, AdminOperation, Services, SubTaskId, SubTaskOutcome, Task, TaskContext, TaskError,
    TasksConfig,
};

pub const REMOVE_SLAVES: &str = "RemoveSlavesTask";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RemoveStep {
    FromJenkins,
    FromSlavePool,
}

impl RemoveStep {
    fn name(self) -> &'static str {
        match self {
            Self::FromJenkins => "remove_slave_from_jenkins",
            Self::FromSlavePool => "remove_slave_from_slave_pool",
        }
    }
}

pub struct RemoveSlavesTask {
    ctx: TaskContext,
    services: Arc<Services>,
    slaves: Vec<String>,
    steps: Vec<RemoveStep>,
}

impl RemoveSlavesTask {
    /// Params: `data`, a list of `{"name": ...}` objects, and the required
    /// bool `delete_from_jenkins`.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let slaves = params::required_object_list(params, "data")?
            .iter()
            .map(|slave| params::require_str(slave, "name", "slave").map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?;
        let delete_from_jenkins = match params.get("delete_from_jenkins") {
            Some(Value::Bool(flag)) => *flag,
            None | Some(Value::Null) => {
                return Err(TaskError::InvalidParams(
                    "delete_from_jenkins is not present in params".into(),
                ))
            }
            Some(other) => {
                return Err(TaskError::InvalidParams(format!(
                    "delete_from_jenkins param has to be a bool : {other}"
                )))
            }
        };

        let mut steps = Vec::with_capacity(2);
        if delete_from_jenkins {
            steps.push(RemoveStep::FromJenkins);
        }
        steps.push(RemoveStep::FromSlavePool);

        Ok(Self {
            ctx: TaskContext::new(REMOVE_SLAVES, cfg.workers_for(REMOVE_SLAVES, None)),
            services: Arc::new(services.clone()),
            slaves,
            steps,
        })
    }
}

#[async_trait]
impl Task for RemoveSlavesTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        for step in &self.steps {
            let pending: Vec<(String, SubTaskId)> = self
                .slaves
                .iter()
                .map(|name| {
                    let args = (self.services.clone(), name.clone());
                    let id = match step {
                        RemoveStep::FromJenkins => {
                            self.add_sub_task(step.name(), args, remove_from_jenkins)
                        }
                        RemoveStep::FromSlavePool => {
                            self.add_sub_task(step.name(), args, remove_from_slave_pool)
                        }
                    };
                    (name.clone(), id)
                })
                .collect();

            for (name, id) in pending {
                let result = self.get_sub_task_result(&id).await?;
                self.context()
                    .result()
                    .insert_grouped(name, step.name(), result)?;
            }
        }
        self.complete_task(true)
    }
}

async fn remove_from_jenkins((services, name): (Arc<Services>, String)) -> SubTaskOutcome {
    let doc = services.slaves.get(&name).await.map_err(|e| {
        TaskError::from(e).context(format!("Cannot find slave with name {name} in slave-pool"))
    })?;
    let jenkins_host = doc
        .get("jenkins_host")
        .and_then(Value::as_str)
        .ok_or_else(|| TaskError::Check(format!("slave {name} has no jenkins_host")))?;
    let jenkins = services.admin_for(jenkins_host).map_err(|e| {
        TaskError::from(e).context(format!("Cannot fetch jenkins client for slave {name}"))
    })?;

    let response = jenkins
        .call(&AdminOperation::DeleteSlave { name: name.clone() })
        .await
        .map_err(|e| TaskError::from(e).context(format!("Cannot remove slave {name} from jenkins")))?;
    info!(slave = %name, instance = jenkins.name(), "slave removed from jenkins");
    Ok(json!({ "remove_slave_from_jenkins": response.to_pair() }))
}

async fn remove_from_slave_pool((services, name): (Arc<Services>, String)) -> SubTaskOutcome {
    services.slaves.delete(&name).await.map_err(|e| {
        TaskError::from(e).context(format!("Cannot delete slave name {name} doc in slave-pool"))
    })?;
    info!(slave = %name, "slave removed from slave pool");
    Ok(json!({ "remove_slave_from_slave_pool": true }))
}
