use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::task::Task;
use crate::config::TasksConfig;
use crate::context::Services;
use crate::error::TaskError;

/// Builds a task from its JSON params. Validation happens here, before any
/// work is scheduled.
pub type TaskBuilder =
    Arc<dyn Fn(&Value, &Services, &TasksConfig) -> Result<Arc<dyn Task>, TaskError> + Send + Sync>;

/// Explicit name -> constructor table for every task the process can run.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    builders: BTreeMap<String, TaskBuilder>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, builder: F) -> &mut Self
    where
        F: Fn(&Value, &Services, &TasksConfig) -> Result<Arc<dyn Task>, TaskError>
            + Send
            + Sync
            + 'static,
    {
        self.builders.insert(name.into(), Arc::new(builder));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.builders.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.builders.keys().map(String::as_str).collect()
    }

    pub fn build(
        &self,
        name: &str,
        params: &Value,
        services: &Services,
        cfg: &TasksConfig,
    ) -> Result<Arc<dyn Task>, TaskError> {
        let builder = self.builders.get(name).ok_or_else(|| {
            TaskError::InvalidParams(format!(
                "unknown task '{}' (known: {})",
                name,
                self.names().join(", ")
            ))
        })?;
        builder(params, services, cfg)
    }
}
