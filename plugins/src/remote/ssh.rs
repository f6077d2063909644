//! Remote execution through the system `ssh` client (and `sshpass` when a
//! password is configured).

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use labkeeper_core::api::{
    CommandOutput, HostCredentials, RemoteConfig, RemoteConnector, RemoteError, RemoteExecutor,
};

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_FAILED: i32 = 255;
/// sshpass exits with 5 on a rejected password.
const SSHPASS_BAD_PASSWORD: i32 = 5;
const REACHABILITY_COMMAND: &str = "echo labkeeper-ping";

#[derive(Debug, Clone)]
pub struct SshSettings {
    pub ssh_bin: String,
    pub sshpass_bin: String,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    pub connect_retries: u32,
}

impl From<&RemoteConfig> for SshSettings {
    fn from(cfg: &RemoteConfig) -> Self {
        Self {
            ssh_bin: cfg.ssh_bin.clone(),
            sshpass_bin: cfg.sshpass_bin.clone(),
            connect_timeout_secs: cfg.connect_timeout_secs,
            command_timeout_secs: cfg.command_timeout_secs,
            connect_retries: cfg.connect_retries,
        }
    }
}

pub struct SshExecutor {
    creds: HostCredentials,
    settings: SshSettings,
}

impl SshExecutor {
    pub fn new(creds: HostCredentials, settings: SshSettings) -> Self {
        Self { creds, settings }
    }

    /// Program and arguments for one remote command. The password travels in
    /// the `SSHPASS` environment variable, never on the command line.
    fn argv(&self, command: &str) -> (String, Vec<String>) {
        let mut args = Vec::new();
        let program = if self.creds.password.is_empty() {
            args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            self.settings.ssh_bin.clone()
        } else {
            args.extend(["-e".to_string(), self.settings.ssh_bin.clone()]);
            self.settings.sshpass_bin.clone()
        };
        for opt in [
            "StrictHostKeyChecking=no".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "LogLevel=ERROR".to_string(),
            format!("ConnectTimeout={}", self.settings.connect_timeout_secs),
        ] {
            args.push("-o".to_string());
            args.push(opt);
        }
        args.push(format!("{}@{}", self.creds.username, self.creds.ipaddr));
        args.push(command.to_string());
        (program, args)
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    fn host(&self) -> &str {
        &self.creds.ipaddr
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let (program, args) = self.argv(command);
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !self.creds.password.is_empty() {
            cmd.env("SSHPASS", &self.creds.password);
        }

        tracing::debug!(host = %self.creds.ipaddr, command, "remote.ssh.run");
        let limit = self.settings.command_timeout_secs;
        let output = tokio::time::timeout(Duration::from_secs(limit), cmd.output())
            .await
            .map_err(|_| RemoteError::Timeout(limit))?
            .map_err(|e| RemoteError::Io(format!("cannot spawn {program}: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        match output.status.code() {
            Some(SSH_CONNECTION_FAILED) => Err(RemoteError::Unreachable {
                host: self.creds.ipaddr.clone(),
                reason: stderr.trim().to_string(),
            }),
            Some(SSHPASS_BAD_PASSWORD) if !self.creds.password.is_empty() => {
                Err(RemoteError::AuthFailed(self.creds.ipaddr.clone()))
            }
            Some(0) => Ok(CommandOutput::from_text(&stdout, &stderr)),
            code => {
                let mut out = CommandOutput::from_text(&stdout, &stderr);
                if out.stderr.is_empty() {
                    out.stderr.push(format!("exited with status {code:?}"));
                }
                Ok(out)
            }
        }
    }
}

pub struct SshConnector {
    settings: SshSettings,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    fn name(&self) -> &str {
        "ssh"
    }

    /// Open and verify a session. Unreachable hosts are retried with a
    /// growing pause; every other failure returns at once.
    async fn connect(
        &self,
        creds: &HostCredentials,
    ) -> Result<Arc<dyn RemoteExecutor>, RemoteError> {
        let executor = SshExecutor::new(creds.clone(), self.settings.clone());
        let attempts = self.settings.connect_retries.max(1);
        let mut attempt = 0;
        loop {
            match executor.run_checked(REACHABILITY_COMMAND).await {
                Ok(_) => {
                    tracing::info!(host = %creds.ipaddr, "remote.ssh.connected");
                    return Ok(Arc::new(executor));
                }
                Err(err @ RemoteError::Unreachable { .. }) if attempt + 1 < attempts => {
                    attempt += 1;
                    tracing::warn!(host = %creds.ipaddr, attempt, "ssh connect failed, retrying: {}", err);
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SshSettings {
        SshSettings::from(&RemoteConfig::default())
    }

    #[test]
    fn test_key_login_uses_batch_mode() {
        let exec = SshExecutor::new(HostCredentials::new("10.0.0.1", "root", ""), settings());
        let (program, args) = exec.argv("uptime");
        assert_eq!(program, "ssh");
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert_eq!(args[args.len() - 2], "root@10.0.0.1");
        assert_eq!(args.last().unwrap(), "uptime");
    }

    #[test]
    fn test_password_login_keeps_secret_off_argv() {
        let exec = SshExecutor::new(HostCredentials::new("10.0.0.1", "root", "s3cret"), settings());
        let (program, args) = exec.argv("uptime");
        assert_eq!(program, "sshpass");
        assert_eq!(&args[..2], &["-e".to_string(), "ssh".to_string()]);
        assert!(!args.iter().any(|a| a.contains("s3cret")));
    }

    #[tokio::test]
    async fn test_missing_binary_is_io_error() {
        let mut s = settings();
        s.ssh_bin = "/nonexistent/labkeeper-ssh".into();
        let connector = SshConnector::new(s);
        let err = connector
            .connect(&HostCredentials::new("10.0.0.1", "root", ""))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::Io(_)));
    }
}
