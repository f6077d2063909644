//! 任务管理器：接收任务、异步执行，并按 task id 提供状态查询与结果获取

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::result::TaskResult;
use super::state::TaskState;
use super::task::Task;
use crate::error::TaskError;
use crate::store::PoolClient;

/// Non-blocking view of a registered task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub task_name: String,
    pub state: TaskState,
    /// Present once the task has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    pub submitted_at: DateTime<Utc>,
    /// Partial tree while running, the final report once completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Value>,
}

/// Process-wide registry running tasks on its own bounded pool.
///
/// One permit per in-flight task; independent of each task's subtask pool.
/// With a report store, every collected result is also written there under
/// its task id.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<TaskManagerInner>,
}

struct TaskManagerInner {
    max_workers: usize,
    pool: Arc<Semaphore>,
    running: Mutex<HashMap<String, RunningTask>>,
    reports: Option<PoolClient>,
}

struct RunningTask {
    task: Arc<dyn Task>,
    handle: JoinHandle<()>,
    submitted_at: DateTime<Utc>,
}

impl TaskManager {
    pub fn new(max_workers: usize) -> Self {
        Self::build(max_workers, None)
    }

    pub fn with_report_store(max_workers: usize, reports: PoolClient) -> Self {
        Self::build(max_workers, Some(reports))
    }

    fn build(max_workers: usize, reports: Option<PoolClient>) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(TaskManagerInner {
                max_workers,
                pool: Arc::new(Semaphore::new(max_workers)),
                running: Mutex::new(HashMap::new()),
                reports,
            }),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    fn running(&self) -> MutexGuard<'_, HashMap<String, RunningTask>> {
        self.inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.running().len()
    }

    pub fn is_empty(&self) -> bool {
        self.running().is_empty()
    }

    /// Submit a task and return its id without waiting.
    pub fn add_task(&self, task: Arc<dyn Task>) -> String {
        let task_id = task.id().to_string();
        let pool = self.inner.pool.clone();
        let runner = task.clone();

        let handle = tokio::spawn(async move {
            let _permit = match pool.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    settle(
                        runner.as_ref(),
                        Err(TaskError::Internal("task manager pool closed".into())),
                    );
                    return;
                }
            };
            let outcome = AssertUnwindSafe(runner.execute())
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(TaskError::Panicked(panic_message(panic))));
            settle(runner.as_ref(), outcome);
        });

        info!(task_id = %task_id, task = %task.name(), "task submitted");
        self.running().insert(
            task_id.clone(),
            RunningTask {
                task,
                handle,
                submitted_at: Utc::now(),
            },
        );
        task_id
    }

    /// Wait for the task to finish, consume its entry and return its result
    /// with the flattened report already computed.
    pub async fn get_task_result(&self, task_id: &str) -> Result<TaskResult, TaskError> {
        let entry = self
            .running()
            .remove(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        let task_name = entry.task.name().to_string();
        let result = collect(entry).await;
        if let Some(reports) = &self.inner.reports {
            store_report(reports, task_id, &task_name, &result).await;
        }
        Ok(result)
    }

    /// Like [`get_task_result`](Self::get_task_result) but bounded. On
    /// timeout the task stays registered and keeps running.
    pub async fn await_result(
        &self,
        task_id: &str,
        timeout: Duration,
    ) -> Result<TaskResult, TaskError> {
        let shared = {
            let running = self.running();
            let entry = running
                .get(task_id)
                .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
            entry.task.context().result().clone()
        };
        shared.wait_completed(timeout).await?;
        self.get_task_result(task_id).await
    }

    pub fn peek_status(&self, task_id: &str) -> Result<TaskStatus, TaskError> {
        let running = self.running();
        let entry = running
            .get(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        Ok(status_of(task_id, entry, true))
    }

    pub fn list(&self) -> Vec<TaskStatus> {
        let mut out: Vec<TaskStatus> = self
            .running()
            .iter()
            .map(|(id, entry)| status_of(id, entry, false))
            .collect();
        out.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        out
    }

    /// Stop a task nobody will collect: cancel its work, release its pool
    /// slots and drop the entry.
    pub fn abandon(&self, task_id: &str) -> Result<(), TaskError> {
        let entry = self
            .running()
            .remove(task_id)
            .ok_or_else(|| TaskError::TaskNotFound(task_id.to_string()))?;
        entry.handle.abort();
        let ctx = entry.task.context();
        ctx.abort_pending();
        if !ctx.result().is_completed() {
            let _ = ctx.set_exception(TaskError::Aborted(format!(
                "task {task_id} abandoned by caller"
            )));
        }
        warn!(task_id = %task_id, "task abandoned");
        Ok(())
    }
}

/// Fold the outcome of `execute` into the task's own result.
fn settle(task: &dyn Task, outcome: Result<(), TaskError>) {
    let ctx = task.context();
    let shared = ctx.result();
    match outcome {
        Ok(()) if !shared.is_completed() => {
            if let Err(err) = ctx.complete_task(true) {
                warn!(task_id = %ctx.id(), "cannot complete task: {}", err);
            }
        }
        Ok(()) => {}
        Err(err) if !shared.is_completed() => {
            let _ = ctx.set_exception(err);
        }
        Err(err) => {
            error!(task_id = %ctx.id(), "task failed after completing: {}", err);
        }
    }
    ctx.abort_pending();
}

async fn collect(entry: RunningTask) -> TaskResult {
    let RunningTask { task, handle, .. } = entry;
    if let Err(join_err) = handle.await {
        let reason = if join_err.is_cancelled() {
            TaskError::Aborted(format!("task {} was cancelled", task.id()))
        } else {
            TaskError::Panicked(format!("task {} runner panicked", task.id()))
        };
        settle(task.as_ref(), Err(reason));
    }

    let shared = task.context().result();
    // Memoize on the shared result so every later reader sees the same tree.
    let _ = shared.to_json();
    shared.snapshot()
}

/// A store failure is logged and never fails the fetch.
async fn store_report(reports: &PoolClient, task_id: &str, task_name: &str, result: &TaskResult) {
    let report = match result.to_json() {
        Ok(tree) => tree.as_ref().clone(),
        Err(err) => err.to_json(),
    };
    let doc = json!({
        "task_name": task_name,
        "state": result.state(),
        "success": result.success(),
        "report": report,
        "stored_at": Utc::now().to_rfc3339(),
    });
    match reports.upsert(task_id, &doc).await {
        Ok(()) => info!(task_id = %task_id, collection = reports.collection(), "task report stored"),
        Err(err) => warn!(
            task_id = %task_id,
            collection = reports.collection(),
            "cannot store task report: {}",
            err
        ),
    }
}

fn status_of(task_id: &str, entry: &RunningTask, with_tree: bool) -> TaskStatus {
    let shared = entry.task.context().result();
    let snapshot = shared.snapshot();
    TaskStatus {
        task_id: task_id.to_string(),
        task_name: entry.task.name().to_string(),
        state: snapshot.state(),
        success: snapshot.success(),
        submitted_at: entry.submitted_at,
        tree: with_tree.then(|| snapshot.partial_json()),
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ImmediateRetry;
    use crate::store::{Document, DocumentStore, Query, StoreError};
    use crate::task::TaskContext;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Sleepy {
        ctx: TaskContext,
        millis: u64,
    }

    #[async_trait]
    impl Task for Sleepy {
        fn context(&self) -> &TaskContext {
            &self.ctx
        }

        async fn execute(&self) -> Result<(), TaskError> {
            self.start_task()?;
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            self.context().result().insert_subtask("slept", json!(self.millis))?;
            Ok(())
        }
    }

    struct Exploding {
        ctx: TaskContext,
    }

    #[async_trait]
    impl Task for Exploding {
        fn context(&self) -> &TaskContext {
            &self.ctx
        }

        async fn execute(&self) -> Result<(), TaskError> {
            self.start_task()?;
            Err(TaskError::Connection("store down".into()))
        }
    }

    fn sleepy(millis: u64) -> Arc<dyn Task> {
        Arc::new(Sleepy {
            ctx: TaskContext::new("Sleepy", 1),
            millis,
        })
    }

    #[tokio::test]
    async fn test_execute_ok_completes_task() {
        let manager = TaskManager::new(2);
        let id = manager.add_task(sleepy(5));
        let result = manager.get_task_result(&id).await.unwrap();
        assert_eq!(result.success(), Some(true));
        assert_eq!(result.to_json().unwrap().as_ref(), &json!({"slept": 5}));
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_execute_error_is_recorded_not_raised() {
        let manager = TaskManager::new(2);
        let id = manager.add_task(Arc::new(Exploding {
            ctx: TaskContext::new("Exploding", 1),
        }));
        let result = manager.get_task_result(&id).await.unwrap();
        assert_eq!(result.success(), Some(false));
        assert_eq!(
            result.to_json().unwrap().as_ref(),
            &json!({"kind": "connection", "message": "store down"})
        );
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let manager = TaskManager::new(1);
        assert!(matches!(
            manager.get_task_result("nope").await,
            Err(TaskError::TaskNotFound(_))
        ));
        assert!(manager.peek_status("nope").is_err());
        assert!(manager.abandon("nope").is_err());
    }

    #[tokio::test]
    async fn test_await_result_timeout_keeps_entry() {
        let manager = TaskManager::new(1);
        let id = manager.add_task(sleepy(300));

        let err = manager
            .await_result(&id, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::DeadlineExceeded { .. }));

        let status = manager.peek_status(&id).unwrap();
        assert_ne!(status.state, TaskState::Completed);
        assert_eq!(status.success, None);

        let result = manager
            .await_result(&id, Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(result.success(), Some(true));
        assert!(manager.peek_status(&id).is_err());
    }

    #[tokio::test]
    async fn test_abandon_marks_task_aborted() {
        let manager = TaskManager::new(1);
        let task = sleepy(60_000);
        let ctx = task.context().clone();
        let id = manager.add_task(task);

        manager.abandon(&id).unwrap();
        assert!(manager.is_empty());
        assert_eq!(ctx.result().state(), TaskState::Completed);
        assert_eq!(ctx.result().to_json().unwrap()["kind"], json!("aborted"));
    }

    /// Accepts nothing; every call fails as unavailable.
    struct DownStore;

    #[async_trait]
    impl DocumentStore for DownStore {
        fn name(&self) -> &str {
            "down"
        }

        async fn upsert(&self, _c: &str, _k: &str, _b: &Value) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn get(&self, _c: &str, _k: &str) -> Result<Value, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn delete(&self, _c: &str, _k: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }

        async fn query(&self, _c: &str, _q: &Query) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_report_store_failure_does_not_fail_fetch() {
        let reports = PoolClient::new(
            Arc::new(DownStore),
            "tasks",
            Arc::new(ImmediateRetry { max_attempts: 1 }),
            1,
        );
        let manager = TaskManager::with_report_store(1, reports);
        let id = manager.add_task(sleepy(5));
        let result = manager.get_task_result(&id).await.unwrap();
        assert_eq!(result.success(), Some(true));
        assert_eq!(result.to_json().unwrap().as_ref(), &json!({"slept": 5}));
    }

    #[tokio::test]
    async fn test_list_reports_without_trees() {
        let manager = TaskManager::new(1);
        let first = manager.add_task(sleepy(50));
        let _second = manager.add_task(sleepy(50));
        let listed = manager.list();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|s| s.tree.is_none()));
        assert!(listed.iter().any(|s| s.task_id == first));
    }
}
