//! Remote execution contract: run shell commands on a lab machine and read
//! back the facts the pools record about it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info};

use crate::error::TaskError;

const MAC_ADDRESS_COMMAND: &str = "ip -o link show |cut -d ' ' -f 2,20 | grep eth0";
const MEMORY_TOTAL_COMMAND: &str = "grep MemTotal /proc/meminfo";
const OS_RELEASE_COMMAND: &str = "cat /etc/os-release";

/// Packages every freshly added node needs.
pub const INIT_PACKAGES: &[&str] = &["wget", "curl", "libtinfo5"];

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCredentials {
    pub ipaddr: String,
    pub username: String,
    /// Empty means key based login.
    #[serde(default)]
    pub password: String,
}

impl HostCredentials {
    pub fn new(
        ipaddr: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            ipaddr: ipaddr.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for HostCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostCredentials")
            .field("ipaddr", &self.ipaddr)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Output of one remote command, split into lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl CommandOutput {
    pub fn from_text(stdout: &str, stderr: &str) -> Self {
        let lines = |s: &str| -> Vec<String> {
            s.lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect()
        };
        Self {
            stdout: lines(stdout),
            stderr: lines(stderr),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{host} is unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("authentication to {0} failed")]
    AuthFailed(String),

    #[error("Command {command} failed with error {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("remote command timed out after {0}s")]
    Timeout(u64),

    #[error("cannot parse remote output: {0}")]
    Parse(String),

    #[error("remote io error: {0}")]
    Io(String),
}

impl From<RemoteError> for TaskError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unreachable { .. } | RemoteError::AuthFailed(_) | RemoteError::Timeout(_) => {
                TaskError::Connection(err.to_string())
            }
            other => TaskError::Remote(other.to_string()),
        }
    }
}

/// `ID` and `PRETTY_NAME` from `/etc/os-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    pub os: String,
    pub os_version: String,
}

/// 远程执行插件
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    fn host(&self) -> &str;

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError>;

    /// Run a command and treat any stderr output as failure.
    async fn run_checked(&self, command: &str) -> Result<Vec<String>, RemoteError> {
        let out = self.run_command(command).await?;
        if !out.stderr.is_empty() {
            let err = RemoteError::CommandFailed {
                command: command.to_string(),
                stderr: out.stderr.join("\n"),
            };
            error!(host = %self.host(), "{}", err);
            return Err(err);
        }
        Ok(out.stdout)
    }

    async fn find_mac_address(&self) -> Result<String, RemoteError> {
        let lines = self.run_checked(MAC_ADDRESS_COMMAND).await?;
        Ok(parse_mac_address(&lines))
    }

    /// Total memory in kB.
    async fn find_memory_total(&self) -> Result<u64, RemoteError> {
        let lines = self.run_checked(MEMORY_TOTAL_COMMAND).await?;
        parse_memory_total(&lines)
    }

    async fn find_os_version(&self) -> Result<OsRelease, RemoteError> {
        let lines = self.run_checked(OS_RELEASE_COMMAND).await?;
        Ok(parse_os_release(&lines))
    }

    /// Prepare a Debian based node for the pool. Each step is reported as
    /// `true` or `[false, "<error>"]`; a failing step does not stop the rest.
    async fn initialize_node(&self) -> Value {
        let mut steps: Vec<(String, String)> = vec![
            ("apt-update".into(), "apt-get update".into()),
            (
                "init_journal_logs".into(),
                "journalctl --vacuum-size=100M;journalctl --vacuum-time=10d".into(),
            ),
        ];
        steps.extend(INIT_PACKAGES.iter().map(|pkg| {
            (
                format!("install_package-{pkg}"),
                format!("apt-get install -y {pkg}"),
            )
        }));

        let mut report = BTreeMap::new();
        for (step, command) in steps {
            let outcome = match self.run_checked(&command).await {
                Ok(_) => json!(true),
                Err(err) => json!([false, err.to_string()]),
            };
            report.insert(step, outcome);
        }
        info!(host = %self.host(), "node initialized");
        json!(report)
    }
}

/// Opens executors; one call per subtask, no process-wide cache.
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self, creds: &HostCredentials)
        -> Result<Arc<dyn RemoteExecutor>, RemoteError>;
}

/// Second column of the `eth0` line, empty when there is none.
pub fn parse_mac_address(lines: &[String]) -> String {
    lines
        .iter()
        .filter(|l| l.contains("eth0"))
        .filter_map(|l| l.split_whitespace().nth(1))
        .last()
        .unwrap_or_default()
        .to_string()
}

pub fn parse_memory_total(lines: &[String]) -> Result<u64, RemoteError> {
    let Some(line) = lines.iter().rev().find(|l| l.contains("MemTotal")) else {
        return Ok(0);
    };
    line.split_whitespace()
        .nth(1)
        .ok_or_else(|| RemoteError::Parse(format!("no value in '{line}'")))?
        .parse::<u64>()
        .map_err(|e| RemoteError::Parse(format!("'{line}': {e}")))
}

pub fn parse_os_release(lines: &[String]) -> OsRelease {
    let mut release = OsRelease::default();
    for line in lines {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').to_string();
        match key.trim() {
            "PRETTY_NAME" => release.os_version = value,
            "ID" => release.os = value,
            _ => {}
        }
    }
    release
}
