use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub task_manager: TaskManagerConfig,

    #[serde(default)]
    pub tasks: TasksConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    /// Named CI controllers, e.g. `[jenkins.qa_jenkins]`.
    #[serde(default)]
    pub jenkins: BTreeMap<String, JenkinsInstanceConfig>,

    #[serde(default)]
    pub http_server: HttpServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or OS temp dir if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "labkeeper_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    /// Optional directory for log files. If empty or unset, uses OS temp dir.
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskManagerConfig {
    /// How many tasks may execute at once.
    #[serde(default = "default_manager_workers")]
    pub max_workers: usize,
}

fn default_manager_workers() -> usize {
    num_cpus::get().max(1)
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            max_workers: default_manager_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    /// Subtask pool width when a task has no override.
    #[serde(default = "default_task_workers")]
    pub default_max_workers: usize,

    /// Per task name, e.g. `HostHealthMonitorTask = 750`.
    #[serde(default)]
    pub max_workers: BTreeMap<String, usize>,

    #[serde(default = "default_result_timeout_secs")]
    pub result_timeout_secs: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_task_workers() -> usize {
    100
}

fn default_result_timeout_secs() -> u64 {
    3600
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            default_max_workers: default_task_workers(),
            max_workers: BTreeMap::new(),
            result_timeout_secs: default_result_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl TasksConfig {
    /// Pool width for `task_name`: explicit override, else `fallback`, else
    /// the configured default.
    pub fn workers_for(&self, task_name: &str, fallback: Option<usize>) -> usize {
        self.max_workers
            .get(task_name)
            .copied()
            .or(fallback)
            .unwrap_or(self.default_max_workers)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(flatten)]
    pub provider: StoreProvider,

    /// Total attempts per store call when the caller gives none.
    #[serde(default = "default_store_retries")]
    pub retries: u32,

    #[serde(default)]
    pub collections: CollectionsConfig,
}

fn default_store_retries() -> u32 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            provider: StoreProvider::Local(LocalStoreConfig::default()),
            retries: default_store_retries(),
            collections: CollectionsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider")]
pub enum StoreProvider {
    #[serde(rename = "local")]
    Local(LocalStoreConfig),
    #[serde(rename = "http")]
    Http(HttpStoreConfig),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// JSON snapshot loaded at start and rewritten after every change.
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpStoreConfig {
    #[serde(default = "default_store_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
            api_key: String::new(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_store_url() -> String {
    "http://127.0.0.1:8091".to_string()
}

fn default_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionsConfig {
    #[serde(default = "default_servers_collection")]
    pub servers: String,
    #[serde(default = "default_hosts_collection")]
    pub hosts: String,
    #[serde(default = "default_vms_collection")]
    pub vms: String,
    #[serde(default = "default_slaves_collection")]
    pub slaves: String,
    /// Finished task reports.
    #[serde(default = "default_tasks_collection")]
    pub tasks: String,
}

fn default_servers_collection() -> String {
    "servers".to_string()
}

fn default_hosts_collection() -> String {
    "hosts".to_string()
}

fn default_vms_collection() -> String {
    "vms".to_string()
}

fn default_slaves_collection() -> String {
    "slaves".to_string()
}

fn default_tasks_collection() -> String {
    "tasks".to_string()
}

impl Default for CollectionsConfig {
    fn default() -> Self {
        Self {
            servers: default_servers_collection(),
            hosts: default_hosts_collection(),
            vms: default_vms_collection(),
            slaves: default_slaves_collection(),
            tasks: default_tasks_collection(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// `exponential-backoff` or `linear`.
    #[serde(default = "default_retry_strategy")]
    pub strategy: String,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_retry_strategy() -> String {
    "exponential-backoff".to_string()
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: default_retry_strategy(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_ssh_bin")]
    pub ssh_bin: String,

    /// Used when a password is set; key based login otherwise.
    #[serde(default = "default_sshpass_bin")]
    pub sshpass_bin: String,

    /// Login used by the health checks, which carry no credentials.
    #[serde(default = "default_ssh_username")]
    pub default_username: String,
    #[serde(default)]
    pub default_password: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

fn default_ssh_bin() -> String {
    "ssh".to_string()
}

fn default_sshpass_bin() -> String {
    "sshpass".to_string()
}

fn default_ssh_username() -> String {
    "root".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_command_timeout_secs() -> u64 {
    300
}

fn default_connect_retries() -> u32 {
    3
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh_bin: default_ssh_bin(),
            sshpass_bin: default_sshpass_bin(),
            default_username: default_ssh_username(),
            default_password: String::new(),
            connect_timeout_secs: default_connect_timeout_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            connect_retries: default_connect_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JenkinsInstanceConfig {
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Upper bound a client may ask `/result` to wait.
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8650
}

fn default_max_wait_secs() -> u64 {
    300
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}
