use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::watch;

use super::state::{StateTransition, TaskState, TransitionError};
use crate::error::TaskError;

/// A named child of a [`TaskResult`].
///
/// `Group` lets a task key results two levels deep (for example
/// `doc_key -> check -> result`) and still flatten through the generic path.
#[derive(Debug, Clone)]
pub enum SubTaskEntry {
    Result(TaskResult),
    Group(BTreeMap<String, SubTaskEntry>),
    Value(Value),
}

impl SubTaskEntry {
    fn to_json(&self) -> Value {
        match self {
            Self::Result(result) => match result.to_json() {
                Ok(value) => value.as_ref().clone(),
                Err(_) => result.partial_json(),
            },
            Self::Group(children) => flatten_children(children, Self::to_json),
            Self::Value(value) => value.clone(),
        }
    }

    fn partial_json(&self) -> Value {
        match self {
            Self::Result(result) => result.partial_json(),
            Self::Group(children) => flatten_children(children, Self::partial_json),
            Self::Value(value) => value.clone(),
        }
    }
}

impl From<TaskResult> for SubTaskEntry {
    fn from(result: TaskResult) -> Self {
        Self::Result(result)
    }
}

impl From<Value> for SubTaskEntry {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<BTreeMap<String, SubTaskEntry>> for SubTaskEntry {
    fn from(children: BTreeMap<String, SubTaskEntry>) -> Self {
        Self::Group(children)
    }
}

fn flatten_children(
    children: &BTreeMap<String, SubTaskEntry>,
    render: fn(&SubTaskEntry) -> Value,
) -> Value {
    let map: Map<String, Value> = children
        .iter()
        .map(|(name, entry)| (name.clone(), render(entry)))
        .collect();
    Value::Object(map)
}

/// Outcome record of one task or subtask invocation.
///
/// The flattened view is computed at most once: every call to [`to_json`]
/// after completion hands back the same `Arc`.
///
/// [`to_json`]: TaskResult::to_json
#[derive(Debug, Clone, Default)]
pub struct TaskResult {
    state: TaskState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    success: bool,
    error: Option<TaskError>,
    payload: Option<Value>,
    subtasks: BTreeMap<String, SubTaskEntry>,
    flattened: OnceLock<Arc<Value>>,
}

impl TaskResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// A result already in `Running`, used for freshly scheduled subtasks.
    pub(crate) fn started() -> Self {
        Self {
            state: TaskState::Running,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        StateTransition::is_terminal(self.state)
    }

    /// `None` until the result is completed.
    pub fn success(&self) -> Option<bool> {
        self.is_completed().then_some(self.success)
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    pub fn subtasks(&self) -> &BTreeMap<String, SubTaskEntry> {
        &self.subtasks
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    pub fn start_task(&mut self) -> Result<(), TransitionError> {
        StateTransition::validate(self.state, TaskState::Running)?;
        self.state = TaskState::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn complete_task(&mut self, success: bool) -> Result<(), TransitionError> {
        StateTransition::validate(self.state, TaskState::Completed)?;
        self.state = TaskState::Completed;
        self.ended_at = Some(Utc::now());
        self.success = success;
        Ok(())
    }

    /// The only path that marks a result as failed.
    pub fn set_exception(&mut self, err: impl Into<TaskError>) -> Result<(), TransitionError> {
        StateTransition::validate(self.state, TaskState::Completed)?;
        self.error = Some(err.into());
        self.complete_task(false)
    }

    pub fn set_payload(&mut self, payload: Value) -> Result<(), TransitionError> {
        self.ensure_open()?;
        self.payload = Some(payload);
        Ok(())
    }

    pub fn insert_subtask(
        &mut self,
        name: impl Into<String>,
        entry: impl Into<SubTaskEntry>,
    ) -> Result<(), TransitionError> {
        self.ensure_open()?;
        self.subtasks.insert(name.into(), entry.into());
        Ok(())
    }

    /// Insert `entry` under `group -> name`, creating the group on first use.
    pub fn insert_grouped(
        &mut self,
        group: impl Into<String>,
        name: impl Into<String>,
        entry: impl Into<SubTaskEntry>,
    ) -> Result<(), TransitionError> {
        self.ensure_open()?;
        let slot = self
            .subtasks
            .entry(group.into())
            .or_insert_with(|| SubTaskEntry::Group(BTreeMap::new()));
        if !matches!(slot, SubTaskEntry::Group(_)) {
            *slot = SubTaskEntry::Group(BTreeMap::new());
        }
        if let SubTaskEntry::Group(children) = slot {
            children.insert(name.into(), entry.into());
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), TransitionError> {
        if self.is_completed() {
            return Err(TransitionError::FromTerminalState { state: self.state });
        }
        Ok(())
    }

    /// Flattened, memoized report of this result.
    ///
    /// Succeeded: the payload if one was recorded, otherwise the children
    /// keyed by name. Failed: `{"kind", "message"}` of the captured error.
    pub fn to_json(&self) -> Result<Arc<Value>, TaskError> {
        if !self.is_completed() {
            return Err(TaskError::NotCompleted);
        }
        Ok(self
            .flattened
            .get_or_init(|| Arc::new(self.flatten()))
            .clone())
    }

    /// Best-effort view for status polling; never blocks and never memoizes
    /// an unfinished tree.
    pub fn partial_json(&self) -> Value {
        if let Ok(value) = self.to_json() {
            return value.as_ref().clone();
        }
        let mut node = json!({ "state": self.state.as_str() });
        if !self.subtasks.is_empty() {
            node["subtasks"] = flatten_children(&self.subtasks, SubTaskEntry::partial_json);
        }
        node
    }

    fn flatten(&self) -> Value {
        if !self.success {
            return match &self.error {
                Some(err) => err.to_json(),
                None => json!({
                    "kind": "internal",
                    "message": "completed as failed without a recorded error",
                }),
            };
        }
        match &self.payload {
            Some(payload) => payload.clone(),
            None => flatten_children(&self.subtasks, SubTaskEntry::to_json),
        }
    }
}

/// A task's own result, shared between the task body, the manager and
/// status readers. State changes are published on a watch channel so
/// waiters wake on completion instead of polling.
#[derive(Debug, Clone)]
pub struct SharedTaskResult {
    inner: Arc<SharedInner>,
}

#[derive(Debug)]
struct SharedInner {
    result: Mutex<TaskResult>,
    state_tx: watch::Sender<TaskState>,
}

impl Default for SharedTaskResult {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedTaskResult {
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(TaskState::Created);
        Self {
            inner: Arc::new(SharedInner {
                result: Mutex::new(TaskResult::new()),
                state_tx,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TaskResult> {
        self.inner
            .result
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> TaskState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_completed(&self) -> bool {
        StateTransition::is_terminal(self.state())
    }

    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.inner.state_tx.subscribe()
    }

    /// Mutate the result and publish the resulting state.
    ///
    /// Publishing happens under the result lock, so the channel observes
    /// states in the order they were reached and never moves backwards.
    pub fn update<R>(&self, f: impl FnOnce(&mut TaskResult) -> R) -> R {
        let mut guard = self.lock();
        let out = f(&mut guard);
        let state = guard.state();
        self.inner.state_tx.send_if_modified(|current| {
            if *current == state || StateTransition::is_terminal(*current) {
                return false;
            }
            *current = state;
            true
        });
        drop(guard);
        out
    }

    pub fn start_task(&self) -> Result<(), TransitionError> {
        self.update(TaskResult::start_task)
    }

    pub fn complete_task(&self, success: bool) -> Result<(), TransitionError> {
        self.update(|r| r.complete_task(success))
    }

    pub fn set_exception(&self, err: TaskError) -> Result<(), TransitionError> {
        self.update(|r| r.set_exception(err))
    }

    pub fn insert_subtask(
        &self,
        name: impl Into<String>,
        entry: impl Into<SubTaskEntry>,
    ) -> Result<(), TransitionError> {
        self.update(|r| r.insert_subtask(name, entry))
    }

    pub fn insert_grouped(
        &self,
        group: impl Into<String>,
        name: impl Into<String>,
        entry: impl Into<SubTaskEntry>,
    ) -> Result<(), TransitionError> {
        self.update(|r| r.insert_grouped(group, name, entry))
    }

    pub fn snapshot(&self) -> TaskResult {
        self.lock().clone()
    }

    pub fn to_json(&self) -> Result<Arc<Value>, TaskError> {
        self.lock().to_json()
    }

    pub fn partial_json(&self) -> Value {
        self.lock().partial_json()
    }

    /// Wait until the result reaches `Completed`, or fail with
    /// [`TaskError::DeadlineExceeded`] once `timeout` has elapsed. The
    /// underlying work is not stopped by a timeout.
    pub async fn wait_completed(&self, timeout: Duration) -> Result<(), TaskError> {
        let started = Instant::now();
        let mut rx = self.subscribe();
        let waited =
            tokio::time::timeout(timeout, rx.wait_for(|s| StateTransition::is_terminal(*s))).await;
        match waited {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(TaskError::Internal("result state channel closed".into())),
            Err(_) => Err(TaskError::DeadlineExceeded {
                waited_ms: started.elapsed().as_millis() as u64,
            }),
        }
    }

    pub async fn generate_json_result(&self, timeout: Duration) -> Result<Arc<Value>, TaskError> {
        self.wait_completed(timeout).await?;
        self.to_json()
    }
}
