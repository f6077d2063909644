#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use labkeeper_core::api::{
    AdminApi, CommandOutput, HostCredentials, ImmediateRetry, PoolClient, RemoteConnector,
    RemoteError, RemoteExecutor, Services, Task, TaskManager,
};
use labkeeper_plugins::store::LocalDocumentStore;
use serde_json::Value;

/// What a reachable fake node reports about itself.
#[derive(Debug, Clone)]
pub struct FakeNode {
    pub mac: String,
    pub mem_kb: u64,
    pub pretty_name: String,
}

impl FakeNode {
    pub fn new(mac: &str, mem_kb: u64, pretty_name: &str) -> Self {
        Self {
            mac: mac.into(),
            mem_kb,
            pretty_name: pretty_name.into(),
        }
    }
}

pub struct FakeExecutor {
    host: String,
    node: FakeNode,
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, RemoteError> {
        let stdout = if command.contains("eth0") {
            format!("eth0: {}", self.node.mac)
        } else if command.contains("MemTotal") {
            format!("MemTotal:       {} kB", self.node.mem_kb)
        } else if command.contains("os-release") {
            format!("PRETTY_NAME=\"{}\"\nID=debian", self.node.pretty_name)
        } else {
            "ok".to_string()
        };
        Ok(CommandOutput::from_text(&stdout, ""))
    }
}

/// Hosts not registered here are unreachable.
#[derive(Default)]
pub struct FakeConnector {
    nodes: HashMap<String, FakeNode>,
    logins: Mutex<Vec<HostCredentials>>,
}

impl FakeConnector {
    pub fn with_node(mut self, ipaddr: &str, node: FakeNode) -> Self {
        self.nodes.insert(ipaddr.to_string(), node);
        self
    }

    pub fn logins(&self) -> Vec<HostCredentials> {
        self.logins.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteConnector for FakeConnector {
    fn name(&self) -> &str {
        "fake"
    }

    async fn connect(
        &self,
        creds: &HostCredentials,
    ) -> Result<Arc<dyn RemoteExecutor>, RemoteError> {
        self.logins.lock().unwrap().push(creds.clone());
        match self.nodes.get(&creds.ipaddr) {
            Some(node) => Ok(Arc::new(FakeExecutor {
                host: creds.ipaddr.clone(),
                node: node.clone(),
            })),
            None => Err(RemoteError::Unreachable {
                host: creds.ipaddr.clone(),
                reason: "Connection timed out".into(),
            }),
        }
    }
}

/// Services over one in-memory store.
pub fn services(
    store: Arc<LocalDocumentStore>,
    connector: Arc<FakeConnector>,
    admins: BTreeMap<String, Arc<dyn AdminApi>>,
) -> Services {
    let retry = Arc::new(ImmediateRetry { max_attempts: 1 });
    let pool = |name: &str| PoolClient::new(store.clone(), name, retry.clone(), 1);
    Services {
        servers: pool("servers"),
        hosts: pool("hosts"),
        vms: pool("vms"),
        slaves: pool("slaves"),
        tasks: pool("tasks"),
        remote: connector,
        admins,
        default_login: HostCredentials::new("", "root", "secret"),
    }
}

/// Submit `task` to a fresh manager and return its flattened report.
pub async fn run_to_report(task: Arc<dyn Task>) -> Value {
    let manager = TaskManager::new(2);
    let id = manager.add_task(task);
    let result = manager
        .await_result(&id, Duration::from_secs(10))
        .await
        .expect("task should finish");
    assert_eq!(result.success(), Some(true), "task failed: {:?}", result.error());
    result.to_json().unwrap().as_ref().clone()
}
