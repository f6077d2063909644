use serde_json::{json, Value};
use thiserror::Error;

use crate::task::TransitionError;

/// Stable, machine-readable category of a [`TaskError`].
///
/// Rendered into result trees as the `kind` field of a failed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidParams,
    Connection,
    Store,
    Remote,
    Admin,
    Check,
    TaskNotFound,
    SubTaskNotFound,
    DeadlineExceeded,
    NotCompleted,
    Transition,
    Panicked,
    Aborted,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::Connection => "connection",
            Self::Store => "store",
            Self::Remote => "remote",
            Self::Admin => "admin",
            Self::Check => "check",
            Self::TaskNotFound => "task_not_found",
            Self::SubTaskNotFound => "subtask_not_found",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotCompleted => "not_completed",
            Self::Transition => "transition",
            Self::Panicked => "panicked",
            Self::Aborted => "aborted",
            Self::Internal => "internal",
        }
    }

    /// Failures that belong to the caller rather than to the work itself.
    pub fn is_usage_error(self) -> bool {
        matches!(
            self,
            Self::InvalidParams | Self::TaskNotFound | Self::SubTaskNotFound | Self::NotCompleted
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by tasks, subtasks and the manager.
///
/// Payloads are plain strings so the error can be cloned into every result
/// node that carries it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("document store error: {0}")]
    Store(String),

    #[error("remote execution failed: {0}")]
    Remote(String),

    #[error("admin api error: {message}")]
    Admin {
        status: Option<u16>,
        message: String,
    },

    #[error("check failed: {0}")]
    Check(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("subtask not found: {0}")]
    SubTaskNotFound(String),

    #[error("deadline exceeded after {waited_ms}ms")]
    DeadlineExceeded { waited_ms: u64 },

    #[error("result is not completed yet")]
    NotCompleted,

    #[error("illegal state transition: {0}")]
    Transition(String),

    #[error("subtask panicked: {0}")]
    Panicked(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Store(_) => ErrorKind::Store,
            Self::Remote(_) => ErrorKind::Remote,
            Self::Admin { .. } => ErrorKind::Admin,
            Self::Check(_) => ErrorKind::Check,
            Self::TaskNotFound(_) => ErrorKind::TaskNotFound,
            Self::SubTaskNotFound(_) => ErrorKind::SubTaskNotFound,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::NotCompleted => ErrorKind::NotCompleted,
            Self::Transition(_) => ErrorKind::Transition,
            Self::Panicked(_) => ErrorKind::Panicked,
            Self::Aborted(_) => ErrorKind::Aborted,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// The detail text without the category prefix used by `Display`.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidParams(m)
            | Self::Connection(m)
            | Self::Store(m)
            | Self::Remote(m)
            | Self::Check(m)
            | Self::TaskNotFound(m)
            | Self::SubTaskNotFound(m)
            | Self::Transition(m)
            | Self::Panicked(m)
            | Self::Aborted(m)
            | Self::Internal(m) => m.clone(),
            Self::Admin { message, .. } => message.clone(),
            Self::DeadlineExceeded { .. } | Self::NotCompleted => self.to_string(),
        }
    }

    /// Structured form embedded at a failed node of a result tree.
    pub fn to_json(&self) -> Value {
        let mut node = json!({
            "kind": self.kind().as_str(),
            "message": self.message(),
        });
        if let Self::Admin {
            status: Some(status),
            ..
        } = self
        {
            node["status"] = json!(status);
        }
        node
    }

    /// Prefix the detail with context while keeping the category.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        let wrap = |m: String| format!("{ctx} : {m}");
        match self {
            Self::InvalidParams(m) => Self::InvalidParams(wrap(m)),
            Self::Connection(m) => Self::Connection(wrap(m)),
            Self::Store(m) => Self::Store(wrap(m)),
            Self::Remote(m) => Self::Remote(wrap(m)),
            Self::Admin { status, message } => Self::Admin {
                status,
                message: wrap(message),
            },
            Self::Check(m) => Self::Check(wrap(m)),
            Self::Panicked(m) => Self::Panicked(wrap(m)),
            Self::Aborted(m) => Self::Aborted(wrap(m)),
            Self::Internal(m) => Self::Internal(wrap(m)),
            other => other,
        }
    }
}

impl From<TransitionError> for TaskError {
    fn from(err: TransitionError) -> Self {
        Self::Transition(err.to_string())
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::Internal(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::Internal(message.to_string())
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidParams(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_to_json_is_structured() {
        let err = TaskError::Connection("unreachable".into());
        assert_eq!(
            err.to_json(),
            json!({"kind": "connection", "message": "unreachable"})
        );
    }

    #[test]
    fn test_admin_status_is_rendered() {
        let err = TaskError::Admin {
            status: Some(502),
            message: "bad gateway".into(),
        };
        assert_eq!(err.to_json()["status"], json!(502));
        assert_eq!(err.kind(), ErrorKind::Admin);
    }

    #[test]
    fn test_context_keeps_kind() {
        let err = TaskError::Store("timeout".into()).context("Cannot upsert node 10.0.0.1");
        assert_eq!(err.kind(), ErrorKind::Store);
        assert_eq!(err.message(), "Cannot upsert node 10.0.0.1 : timeout");
    }

    #[test]
    fn test_plain_strings_become_internal() {
        let err: TaskError = "boom".into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.kind().is_usage_error());
        assert!(TaskError::TaskNotFound("x".into()).kind().is_usage_error());
    }
}
