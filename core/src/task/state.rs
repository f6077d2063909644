//! 任务生命周期状态与转换规则

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a task or subtask result. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Created,
    Running,
    Completed,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 状态转换错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("cannot transition from terminal state {state:?}")]
    FromTerminalState { state: TaskState },
}

/// 状态转换
pub struct StateTransition;

impl StateTransition {
    /// 验证状态转换是否合法
    pub fn validate(from: TaskState, to: TaskState) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (TaskState::Created, TaskState::Running) => true,
            (TaskState::Running, TaskState::Completed) => true,
            // 启动前就失败的任务（例如参数错误）直接进入终态
            (TaskState::Created, TaskState::Completed) => true,
            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn next_state(current: TaskState) -> Option<TaskState> {
        match current {
            TaskState::Created => Some(TaskState::Running),
            TaskState::Running => Some(TaskState::Completed),
            TaskState::Completed => None,
        }
    }

    /// 判断是否为终态
    pub fn is_terminal(state: TaskState) -> bool {
        matches!(state, TaskState::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(StateTransition::validate(TaskState::Created, TaskState::Running).is_ok());
        assert!(StateTransition::validate(TaskState::Running, TaskState::Completed).is_ok());
        assert!(StateTransition::validate(TaskState::Created, TaskState::Completed).is_ok());
    }

    #[test]
    fn test_invalid_transitions() {
        assert_eq!(
            StateTransition::validate(TaskState::Running, TaskState::Running),
            Err(TransitionError::InvalidTransition {
                from: TaskState::Running,
                to: TaskState::Running
            })
        );
        assert_eq!(
            StateTransition::validate(TaskState::Completed, TaskState::Running),
            Err(TransitionError::FromTerminalState {
                state: TaskState::Completed
            })
        );
        assert!(StateTransition::validate(TaskState::Running, TaskState::Created).is_err());
    }

    #[test]
    fn test_next_state() {
        assert_eq!(
            StateTransition::next_state(TaskState::Created),
            Some(TaskState::Running)
        );
        assert_eq!(StateTransition::next_state(TaskState::Completed), None);
        assert!(StateTransition::is_terminal(TaskState::Completed));
        assert!(!StateTransition::is_terminal(TaskState::Running));
    }

    #[test]
    fn test_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&TaskState::Completed).unwrap(),
            "\"completed\""
        );
    }
}
