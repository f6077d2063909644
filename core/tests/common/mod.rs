#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use labkeeper_core::error::TaskError;
use labkeeper_core::task::{SubTaskOutcome, Task, TaskContext};
use serde_json::{json, Map, Value};

/// What a test subtask does when it runs.
#[derive(Debug, Clone)]
pub enum Step {
    Ok,
    Fail(TaskError),
    Sleep(u64),
    Panic,
}

pub async fn run_step((host, step): (String, Step)) -> SubTaskOutcome {
    match step {
        Step::Ok => Ok(json!({"ok": true})),
        Step::Fail(err) => Err(err),
        Step::Sleep(ms) => {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(json!({"ok": true, "host": host}))
        }
        Step::Panic => panic!("step on {host} exploded"),
    }
}

/// One subtask per host, collected in submission order.
pub struct FanOutTask {
    ctx: TaskContext,
    hosts: Vec<(String, Step)>,
}

impl FanOutTask {
    pub fn new(max_workers: usize, hosts: Vec<(&str, Step)>) -> Self {
        Self {
            ctx: TaskContext::new("FanOutTask", max_workers),
            hosts: hosts
                .into_iter()
                .map(|(h, p)| (h.to_string(), p))
                .collect(),
        }
    }
}

#[async_trait]
impl Task for FanOutTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let ids: Vec<(String, String)> = self
            .hosts
            .iter()
            .map(|(host, step)| {
                let id = self.add_sub_task("step", (host.clone(), step.clone()), run_step);
                (host.clone(), id)
            })
            .collect();
        for (host, id) in ids {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(host, result)?;
        }
        self.complete_task(true)
    }
}

/// Two levels: one subtask per group, each fanning out one child per member
/// on the same pool.
pub struct NestedTask {
    ctx: TaskContext,
    groups: Vec<(String, Vec<String>)>,
}

impl NestedTask {
    pub fn new(max_workers: usize, groups: &[(&str, &[&str])]) -> Self {
        Self {
            ctx: TaskContext::new("NestedTask", max_workers),
            groups: groups
                .iter()
                .map(|(g, members)| (g.to_string(), members.iter().map(|m| m.to_string()).collect()))
                .collect(),
        }
    }
}

async fn run_group((ctx, members): (TaskContext, Vec<String>)) -> SubTaskOutcome {
    let ids: Vec<(String, String)> = members
        .into_iter()
        .map(|m| {
            let id = ctx.add_sub_task("leaf", (m.clone(), Step::Sleep(5)), run_step);
            (m, id)
        })
        .collect();
    let mut out = Map::new();
    for (member, id) in ids {
        let leaf = ctx.get_sub_task_result(&id).await?;
        out.insert(member, leaf.to_json()?.as_ref().clone());
    }
    Ok(Value::Object(out))
}

#[async_trait]
impl Task for NestedTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let ids: Vec<(String, String)> = self
            .groups
            .iter()
            .map(|(group, members)| {
                let id = self.add_sub_task(
                    "group",
                    (self.ctx.clone(), members.clone()),
                    run_group,
                );
                (group.clone(), id)
            })
            .collect();
        for (group, id) in ids {
            let result = self.get_sub_task_result(&id).await?;
            self.context().result().insert_subtask(group, result)?;
        }
        self.complete_task(true)
    }
}
