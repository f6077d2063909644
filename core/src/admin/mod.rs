//! REST administration contract (CI controllers managing build slaves).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::error::TaskError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AdminOperation {
    ListSlaves,
    SlaveStatus { name: String },
    ReconnectSlave { name: String },
    DisconnectSlave { name: String, reason: String },
    DeleteSlave { name: String },
}

impl AdminOperation {
    pub fn label(&self) -> &'static str {
        match self {
            Self::ListSlaves => "list_slaves",
            Self::SlaveStatus { .. } => "slave_status",
            Self::ReconnectSlave { .. } => "reconnect_slave",
            Self::DisconnectSlave { .. } => "disconnect_slave",
            Self::DeleteSlave { .. } => "delete_slave",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminResponse {
    pub status: u16,
    #[serde(default)]
    pub payload: Value,
}

impl AdminResponse {
    /// `[status, payload]`, the shape stored in result trees.
    pub fn to_pair(&self) -> Value {
        json!([self.status.to_string(), self.payload])
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("admin endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("admin request timed out: {0}")]
    Timeout(String),

    #[error("admin request failed with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("unexpected admin response: {0}")]
    Decode(String),

    #[error("no admin instance configured for {0}")]
    UnknownInstance(String),
}

impl From<AdminError> for TaskError {
    fn from(err: AdminError) -> Self {
        let status = match &err {
            AdminError::Status { status, .. } => Some(*status),
            _ => None,
        };
        match err {
            AdminError::Unreachable(_) | AdminError::Timeout(_) => {
                TaskError::Connection(err.to_string())
            }
            other => TaskError::Admin {
                status,
                message: other.to_string(),
            },
        }
    }
}

/// 管理接口插件
#[async_trait]
pub trait AdminApi: Send + Sync {
    fn name(&self) -> &str;

    /// Base URL the instance answers on.
    fn base_url(&self) -> &str;

    async fn call(&self, op: &AdminOperation) -> Result<AdminResponse, AdminError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_keeps_code() {
        let err: TaskError = AdminError::Status {
            status: 404,
            message: "no such computer".into(),
        }
        .into();
        assert_eq!(
            err.to_json(),
            json!({"kind": "admin", "message": "admin request failed with status 404: no such computer", "status": 404})
        );
    }

    #[test]
    fn test_response_pair() {
        let resp = AdminResponse {
            status: 200,
            payload: json!(""),
        };
        assert_eq!(resp.to_pair(), json!(["200", ""]));
        assert_eq!(AdminOperation::ListSlaves.label(), "list_slaves");
    }
}
