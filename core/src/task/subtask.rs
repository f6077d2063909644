use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::result::TaskResult;
use crate::error::TaskError;

/// Identifier handed out by `add_sub_task`: `<name>_<uuid>`.
pub type SubTaskId = String;

/// Outcome of a subtask body: its payload on success.
pub type SubTaskOutcome = Result<Value, TaskError>;

/// One scheduled unit of work and the bookkeeping of its outcome.
///
/// The body runs on the owning task's worker pool; its own [`TaskResult`]
/// is held here and completed exactly once by [`SubTask::finish`].
pub struct SubTask {
    id: SubTaskId,
    name: String,
    result: TaskResult,
    handle: JoinHandle<SubTaskOutcome>,
}

impl SubTask {
    pub(crate) fn spawn<P, F, Fut>(name: &str, params: P, body: F, pool: Arc<Semaphore>) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) -> Fut + Send + 'static,
        Fut: Future<Output = SubTaskOutcome> + Send + 'static,
    {
        let id = format!("{}_{}", name, Uuid::new_v4());
        debug!(subtask_id = %id, "subtask submitted");
        let running_id = id.clone();
        let handle = tokio::spawn(async move {
            let _permit = pool
                .acquire_owned()
                .await
                .map_err(|_| TaskError::Internal("worker pool closed unexpectedly".into()))?;
            info!(subtask_id = %running_id, "subtask started");
            body(params).await
        });

        Self {
            id,
            name: name.to_string(),
            result: TaskResult::started(),
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub(crate) fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the body and fold its outcome into the subtask's result.
    ///
    /// A failing or panicking body never propagates: it becomes the error
    /// of this subtask's node. The flattened view is computed eagerly.
    pub async fn finish(self) -> TaskResult {
        let Self {
            id,
            mut result,
            handle,
            ..
        } = self;

        // The caller may be cancelled while waiting; take the body down too.
        let mut handle = AbortOnDrop(handle);
        let outcome = match (&mut handle.0).await {
            Ok(outcome) => outcome,
            Err(join_err) => Err(join_error_to_task_error(&id, join_err)),
        };

        complete_sub_task(&id, &mut result, outcome);
        let _ = result.to_json();
        result
    }
}

/// Record the body's outcome; a second completion is refused and logged.
fn complete_sub_task(id: &str, result: &mut TaskResult, outcome: SubTaskOutcome) {
    let settled = match outcome {
        Ok(payload) => result
            .set_payload(payload)
            .and_then(|_| result.complete_task(true)),
        Err(err) => {
            error!(subtask_id = %id, kind = %err.kind(), "{}", err);
            result.set_exception(err)
        }
    };
    match settled {
        Ok(()) => info!(
            subtask_id = %id,
            success = result.success().unwrap_or(false),
            "subtask completed"
        ),
        Err(err) => warn!(subtask_id = %id, "subtask result already settled: {}", err),
    }
}

struct AbortOnDrop(JoinHandle<SubTaskOutcome>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_error_to_task_error(id: &str, err: JoinError) -> TaskError {
    if err.is_cancelled() {
        return TaskError::Aborted(format!("subtask {id} was cancelled"));
    }
    let panic = err.into_panic();
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    };
    warn!(subtask_id = %id, "subtask panicked: {}", message);
    TaskError::Panicked(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskState;
    use serde_json::json;

    #[tokio::test]
    async fn test_finish_records_payload() {
        let pool = Arc::new(Semaphore::new(1));
        let sub = SubTask::spawn("ping", 3u32, |n| async move { Ok(json!({"n": n})) }, pool);
        assert!(sub.id().starts_with("ping_"));
        assert_eq!(sub.name(), "ping");

        let result = sub.finish().await;
        assert_eq!(result.state(), TaskState::Completed);
        assert_eq!(result.success(), Some(true));
        assert_eq!(result.to_json().unwrap().as_ref(), &json!({"n": 3}));
    }

    #[tokio::test]
    async fn test_finish_captures_error() {
        let pool = Arc::new(Semaphore::new(1));
        let sub = SubTask::spawn(
            "ping",
            (),
            |_| async { Err(TaskError::Remote("exit 1".into())) },
            pool,
        );
        let result = sub.finish().await;
        assert_eq!(result.success(), Some(false));
        assert_eq!(result.error(), Some(&TaskError::Remote("exit 1".into())));
    }

    #[tokio::test]
    async fn test_finish_captures_panic() {
        let pool = Arc::new(Semaphore::new(1));
        let sub = SubTask::spawn(
            "ping",
            (),
            |_| async {
                if true {
                    panic!("boom");
                }
                Ok(Value::Null)
            },
            pool,
        );
        let result = sub.finish().await;
        assert_eq!(result.error(), Some(&TaskError::Panicked("boom".into())));
    }

    #[tokio::test]
    async fn test_aborted_subtask_is_reported() {
        let pool = Arc::new(Semaphore::new(1));
        let sub = SubTask::spawn(
            "sleepy",
            (),
            |_| async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok(Value::Null)
            },
            pool,
        );
        sub.abort();
        let result = sub.finish().await;
        assert_eq!(result.error().map(TaskError::kind), Some(crate::error::ErrorKind::Aborted));
    }
}
