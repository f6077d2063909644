use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::result::{SharedTaskResult, TaskResult};
use super::subtask::{SubTask, SubTaskId, SubTaskOutcome};
use crate::error::TaskError;

/// Everything a task instance owns: identity, its own result and a private
/// worker pool bounding how many of its subtasks run at once.
///
/// Cheap to clone; subtask bodies may hold a clone to fan out a second
/// level of subtasks. The pool must then be wide enough for both levels:
/// a parent holds its permit while it waits on its children.
#[derive(Clone)]
pub struct TaskContext {
    inner: Arc<TaskContextInner>,
}

struct TaskContextInner {
    id: String,
    name: String,
    max_workers: usize,
    result: SharedTaskResult,
    pool: Arc<Semaphore>,
    pending: Mutex<HashMap<SubTaskId, SubTask>>,
}

impl TaskContext {
    pub fn new(name: impl Into<String>, max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(TaskContextInner {
                id: Uuid::new_v4().to_string(),
                name: name.into(),
                max_workers,
                result: SharedTaskResult::new(),
                pool: Arc::new(Semaphore::new(max_workers)),
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn result(&self) -> &SharedTaskResult {
        &self.inner.result
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<SubTaskId, SubTask>> {
        self.inner
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn start_task(&self) -> Result<(), TaskError> {
        self.inner.result.start_task()?;
        info!(task_id = %self.id(), task = %self.name(), "task started");
        Ok(())
    }

    pub fn complete_task(&self, success: bool) -> Result<(), TaskError> {
        self.inner.result.complete_task(success)?;
        info!(
            task_id = %self.id(),
            task = %self.name(),
            success,
            "task completed"
        );
        Ok(())
    }

    /// Fail the whole task. Returns the error so callers can write
    /// `return Err(ctx.set_exception(err))`.
    pub fn set_exception(&self, err: impl Into<TaskError>) -> TaskError {
        let err = err.into();
        error!(task_id = %self.id(), task = %self.name(), kind = %err.kind(), "{}", err);
        if let Err(transition) = self.inner.result.set_exception(err.clone()) {
            warn!(task_id = %self.id(), "task already settled: {}", transition);
        }
        err
    }

    /// Normalize and log a failure raised inside a subtask body. The task's
    /// own state is left untouched; the error surfaces on the subtask node.
    pub fn set_subtask_exception(&self, err: impl Into<TaskError>) -> TaskError {
        let err = err.into();
        error!(task_id = %self.id(), task = %self.name(), kind = %err.kind(), "{}", err);
        err
    }

    /// Schedule `body(params)` on this task's pool and return immediately.
    pub fn add_sub_task<P, F, Fut>(&self, name: &str, params: P, body: F) -> SubTaskId
    where
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = SubTaskOutcome> + Send + 'static,
    {
        let sub = SubTask::spawn(name, params, body, self.inner.pool.clone());
        let id = sub.id().to_string();
        self.pending().insert(id.clone(), sub);
        id
    }

    /// Wait for one subtask and consume its entry. A second call with the
    /// same id fails with [`TaskError::SubTaskNotFound`].
    pub async fn get_sub_task_result(&self, id: &str) -> Result<TaskResult, TaskError> {
        let sub = self
            .pending()
            .remove(id)
            .ok_or_else(|| TaskError::SubTaskNotFound(id.to_string()))?;
        Ok(sub.finish().await)
    }

    /// Cancel every subtask that has not been collected yet.
    pub fn abort_pending(&self) -> usize {
        let drained: Vec<SubTask> = self.pending().drain().map(|(_, sub)| sub).collect();
        for sub in &drained {
            sub.abort();
        }
        if !drained.is_empty() {
            warn!(
                task_id = %self.id(),
                count = drained.len(),
                "aborted uncollected subtasks"
            );
        }
        drained.len()
    }

    pub async fn generate_json_result(&self, timeout: Duration) -> Result<Arc<Value>, TaskError> {
        self.inner.result.generate_json_result(timeout).await
    }
}

/// A unit of work that fans out into subtasks.
///
/// Implementors supply `context` and `execute`; the lifecycle helpers
/// delegate to the context.
#[async_trait]
pub trait Task: Send + Sync {
    fn context(&self) -> &TaskContext;

    async fn execute(&self) -> Result<(), TaskError>;

    fn id(&self) -> &str {
        self.context().id()
    }

    fn name(&self) -> &str {
        self.context().name()
    }

    fn start_task(&self) -> Result<(), TaskError> {
        self.context().start_task()
    }

    fn complete_task(&self, success: bool) -> Result<(), TaskError> {
        self.context().complete_task(success)
    }

    fn set_exception(&self, err: TaskError) -> TaskError {
        self.context().set_exception(err)
    }

    fn set_subtask_exception(&self, err: TaskError) -> TaskError {
        self.context().set_subtask_exception(err)
    }

    fn add_sub_task<P, F, Fut>(&self, name: &str, params: P, body: F) -> SubTaskId
    where
        Self: Sized,
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = SubTaskOutcome> + Send + 'static,
    {
        self.context().add_sub_task(name, params, body)
    }

    async fn get_sub_task_result(&self, id: &str) -> Result<TaskResult, TaskError> {
        self.context().get_sub_task_result(id).await
    }

    async fn generate_json_result(&self, timeout: Duration) -> Result<Arc<Value>, TaskError> {
        self.context().generate_json_result(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn test_subtask_results_are_consumed_once() {
        let ctx = TaskContext::new("ping", 4);
        let id = ctx.add_sub_task("echo", 1, |n| async move { Ok(json!(n)) });
        assert_eq!(ctx.pending_count(), 1);

        let result = ctx.get_sub_task_result(&id).await.unwrap();
        assert_eq!(result.to_json().unwrap().as_ref(), &json!(1));
        assert_eq!(ctx.pending_count(), 0);

        let err = ctx.get_sub_task_result(&id).await.unwrap_err();
        assert_eq!(err, TaskError::SubTaskNotFound(id));
    }

    #[tokio::test]
    async fn test_set_exception_fails_task_once() {
        let ctx = TaskContext::new("ping", 1);
        let err = ctx.set_exception(TaskError::InvalidParams("data missing".into()));
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidParams);
        assert_eq!(ctx.result().state(), TaskState::Completed);
        assert!(ctx.start_task().is_err());
        assert_eq!(
            ctx.result().to_json().unwrap()["kind"],
            json!("invalid_params")
        );
    }

    #[tokio::test]
    async fn test_subtask_exception_leaves_task_running() {
        let ctx = TaskContext::new("ping", 1);
        ctx.start_task().unwrap();
        let _ = ctx.set_subtask_exception(TaskError::Check("mismatch".into()));
        assert_eq!(ctx.result().state(), TaskState::Running);
    }

    #[tokio::test]
    async fn test_abort_pending_drains_table() {
        let ctx = TaskContext::new("ping", 1);
        ctx.add_sub_task("sleepy", (), |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Value::Null)
        });
        assert_eq!(ctx.abort_pending(), 1);
        assert_eq!(ctx.pending_count(), 0);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        let ctx = TaskContext::new("ping", 0);
        assert_eq!(ctx.max_workers(), 1);
        assert_ne!(ctx.id(), TaskContext::new("ping", 1).id());
    }
}
