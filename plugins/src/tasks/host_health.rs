//! Health checks over the host pool and the VMs each host runs.
//!
//! Two levels of fan-out share one worker pool: a subtask per host, which in
//! turn schedules a subtask per host check and one per VM. Hosts go out in
//! waves of half the pool so their children always find a free worker.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use labkeeper_core::api::{
    params, Document, PoolClient, Query, Services, SubTaskId, SubTaskOutcome, Task, TaskContext,
    TaskError, TasksConfig,
};

use super::tags::set_flat_tag;
use super::templates::{field_diff, HOST_FIELDS, VM_FIELDS};

pub const HOST_HEALTH_MONITOR: &str = "HostHealthMonitorTask";

/// Pool width when no override is configured; hosts carry hundreds of VMs.
const DEFAULT_WORKERS: usize = 750;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCheck {
    VmStates,
    CpuUtilization,
    MemoryUtilization,
    FieldConsistency,
}

impl HostCheck {
    pub const ALL: [HostCheck; 4] = [
        HostCheck::VmStates,
        HostCheck::CpuUtilization,
        HostCheck::MemoryUtilization,
        HostCheck::FieldConsistency,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::VmStates => "vm_states",
            Self::CpuUtilization => "cpu_utilization",
            Self::MemoryUtilization => "memory_utilization",
            Self::FieldConsistency => "field_consistency",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmCheck {
    Network,
    OsVersion,
    ServerPool,
    FieldConsistency,
}

impl VmCheck {
    pub const ALL: [VmCheck; 4] = [
        VmCheck::Network,
        VmCheck::OsVersion,
        VmCheck::ServerPool,
        VmCheck::FieldConsistency,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::OsVersion => "os_version",
            Self::ServerPool => "server_pool",
            Self::FieldConsistency => "field_consistency",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }
}

pub struct HostHealthMonitorTask {
    ctx: TaskContext,
    services: Arc<Services>,
    groups: Vec<String>,
    host_checks: Arc<[HostCheck]>,
    vm_checks: Arc<[VmCheck]>,
}

impl HostHealthMonitorTask {
    /// Params: `group`, `host_tasks` and `vm_tasks`, all optional lists.
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let groups = params::optional_string_list(params, "group")?;

        let requested = params::optional_string_list(params, "host_tasks")?;
        let known: Vec<&str> = HostCheck::ALL.iter().map(|c| c.name()).collect();
        let host_checks: Vec<HostCheck> = params::select_known(&requested, &known, "host task")?
            .into_iter()
            .filter_map(HostCheck::from_name)
            .collect();

        let requested = params::optional_string_list(params, "vm_tasks")?;
        let known: Vec<&str> = VmCheck::ALL.iter().map(|c| c.name()).collect();
        let vm_checks: Vec<VmCheck> = params::select_known(&requested, &known, "vm task")?
            .into_iter()
            .filter_map(VmCheck::from_name)
            .collect();

        // A host holds its worker while its checks run, so one is never enough.
        let workers = cfg.workers_for(HOST_HEALTH_MONITOR, Some(DEFAULT_WORKERS)).max(2);
        Ok(Self {
            ctx: TaskContext::new(HOST_HEALTH_MONITOR, workers),
            services: Arc::new(services.clone()),
            groups,
            host_checks: host_checks.into(),
            vm_checks: vm_checks.into(),
        })
    }

    async fn fetch_hosts(&self) -> Result<Vec<Document>, TaskError> {
        let query = if self.groups.is_empty() {
            Query::All
        } else {
            Query::any_of("group", self.groups.iter().map(|g| json!(g)).collect())
        };
        self.services
            .hosts
            .query(&query)
            .await
            .map_err(|e| TaskError::from(e).context("Cannot fetch hosts from host-pool"))
    }

    /// Addresses of the server pool, fetched only when a VM check needs them.
    async fn fetch_server_ips(&self) -> Result<Arc<HashSet<String>>, TaskError> {
        if !self.vm_checks.contains(&VmCheck::ServerPool) {
            return Ok(Arc::default());
        }
        let servers = self
            .services
            .servers
            .query(&Query::All)
            .await
            .map_err(|e| TaskError::from(e).context("Cannot fetch servers from server-pool"))?;
        Ok(Arc::new(
            servers
                .iter()
                .filter_map(|d| d.body.get("ipaddr").and_then(Value::as_str))
                .filter(|ip| !ip.is_empty())
                .map(str::to_string)
                .collect(),
        ))
    }

    fn wave_size(&self) -> usize {
        (self.ctx.max_workers() / 2).max(1)
    }
}

#[async_trait]
impl Task for HostHealthMonitorTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let hosts = self.fetch_hosts().await?;
        let server_ips = self.fetch_server_ips().await?;
        info!(task_id = %self.id(), hosts = hosts.len(), "host health monitor started");

        let mut hosts = hosts.into_iter().peekable();
        while hosts.peek().is_some() {
            let pending: Vec<(String, SubTaskId)> = hosts
                .by_ref()
                .take(self.wave_size())
                .map(|Document { key, body }| {
                    let name = display_name(&body, "name", &key);
                    let job = HostJob {
                        ctx: self.ctx.clone(),
                        services: self.services.clone(),
                        doc_key: key,
                        doc: body,
                        host_checks: self.host_checks.clone(),
                        vm_checks: self.vm_checks.clone(),
                        server_ips: server_ips.clone(),
                    };
                    (name, self.add_sub_task("host", job, run_host))
                })
                .collect();

            for (name, id) in pending {
                let result = self.get_sub_task_result(&id).await?;
                self.context().result().insert_subtask(name, result)?;
            }
        }

        self.complete_task(true)
    }
}

fn display_name(doc: &Value, field: &str, fallback: &str) -> String {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

/// Numbers in pool documents are sometimes stored as strings.
fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

struct HostJob {
    ctx: TaskContext,
    services: Arc<Services>,
    doc_key: String,
    doc: Value,
    host_checks: Arc<[HostCheck]>,
    vm_checks: Arc<[VmCheck]>,
    server_ips: Arc<HashSet<String>>,
}

async fn run_host(job: HostJob) -> SubTaskOutcome {
    let HostJob {
        ctx,
        services,
        doc_key,
        doc,
        host_checks,
        vm_checks,
        server_ips,
    } = job;
    let host = display_name(&doc, "name", &doc_key);

    let vms: Vec<Document> = services
        .vms
        .query(&Query::eq("host", host.as_str()))
        .await
        .map_err(|e| TaskError::from(e).context(format!("Cannot fetch vms of host {host}")))?;
    let vm_bodies: Arc<Vec<Value>> = Arc::new(vms.iter().map(|d| d.body.clone()).collect());
    let host_doc = Arc::new(Mutex::new(doc));

    let host_pending: Vec<(&'static str, SubTaskId)> = host_checks
        .iter()
        .map(|check| {
            let job = HostCheckJob {
                check: *check,
                hosts: services.hosts.clone(),
                doc_key: doc_key.clone(),
                doc: host_doc.clone(),
                vms: vm_bodies.clone(),
            };
            (check.name(), ctx.add_sub_task(check.name(), job, run_host_check))
        })
        .collect();

    let vm_pending: Vec<(String, SubTaskId)> = vms
        .into_iter()
        .map(|Document { key, body }| {
            let name = display_name(&body, "name_label", &key);
            let job = VmJob {
                vms: services.vms.clone(),
                doc_key: key,
                doc: body,
                checks: vm_checks.clone(),
                server_ips: server_ips.clone(),
            };
            (name, ctx.add_sub_task("vm", job, run_vm_checks))
        })
        .collect();

    let mut host_report = Map::new();
    for (name, id) in host_pending {
        let result = ctx.get_sub_task_result(&id).await?;
        host_report.insert(name.to_string(), result.to_json()?.as_ref().clone());
    }
    let mut vm_report = Map::new();
    for (name, id) in vm_pending {
        let result = ctx.get_sub_task_result(&id).await?;
        vm_report.insert(name, result.to_json()?.as_ref().clone());
    }

    info!(host = %host, vms = vm_report.len(), "host checked");
    Ok(json!({ "host_checks": host_report, "vms": vm_report }))
}

struct HostCheckJob {
    check: HostCheck,
    hosts: PoolClient,
    doc_key: String,
    doc: Arc<Mutex<Value>>,
    vms: Arc<Vec<Value>>,
}

async fn run_host_check(job: HostCheckJob) -> SubTaskOutcome {
    let mut doc = job.doc.lock().await;
    let host = display_name(&doc, "name", &job.doc_key);

    let (tag, value) = match job.check {
        HostCheck::VmStates => ("vm_states", json!(count_vm_states(&job.vms))),
        HostCheck::CpuUtilization => {
            let pct = allocated_utilization(&doc, &job.vms, "cpu").ok_or_else(|| {
                TaskError::Check(format!("host {host} has no usable cpu count"))
            })?;
            ("allocated_cpu_utilization", json!(pct))
        }
        HostCheck::MemoryUtilization => {
            let pct = allocated_utilization(&doc, &job.vms, "memory").ok_or_else(|| {
                TaskError::Check(format!("host {host} has no usable memory size"))
            })?;
            ("allocated_memory_utilization", json!(pct))
        }
        HostCheck::FieldConsistency => {
            ("field_consistency", field_consistency(&doc, HOST_FIELDS))
        }
    };

    set_flat_tag(&mut doc, tag, value.clone());
    job.hosts.upsert(&job.doc_key, &doc).await.map_err(|e| {
        TaskError::from(e).context(format!(
            "Cannot upsert host {host} with {} checks to host pool",
            job.check.name()
        ))
    })?;
    Ok(json!({ tag: value }))
}

fn count_vm_states(vms: &[Value]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for vm in vms {
        let state = vm
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        *counts.entry(state).or_insert(0) += 1;
    }
    counts
}

/// Sum of `field` over the VMs as a percentage of the host's own `field`.
fn allocated_utilization(host: &Value, vms: &[Value], field: &str) -> Option<f64> {
    let capacity = as_number(host.get(field)).filter(|c| *c > 0.0)?;
    let allocated: f64 = vms.iter().filter_map(|vm| as_number(vm.get(field))).sum();
    Some(allocated / capacity * 100.0)
}

struct VmJob {
    vms: PoolClient,
    doc_key: String,
    doc: Value,
    checks: Arc<[VmCheck]>,
    server_ips: Arc<HashSet<String>>,
}

/// Every VM check in order. A failing check is recorded under its own name
/// and the remaining ones still run.
async fn run_vm_checks(job: VmJob) -> SubTaskOutcome {
    let VmJob {
        vms,
        doc_key,
        mut doc,
        checks,
        server_ips,
    } = job;
    let name = display_name(&doc, "name_label", &doc_key);

    let mut report = Map::new();
    for check in checks.iter() {
        let result = match check {
            VmCheck::Network => check_vm_network(&mut doc),
            VmCheck::OsVersion => check_vm_os_version(&mut doc),
            VmCheck::ServerPool => check_vm_in_server_pool(&mut doc, &server_ips),
            VmCheck::FieldConsistency => {
                let report = field_consistency(&doc, VM_FIELDS);
                set_flat_tag(&mut doc, "field_consistency", report.clone());
                json!({ "field_consistency": report })
            }
        };
        let outcome = vms.upsert(&doc_key, &doc).await.map_err(|e| {
            TaskError::from(e).context(format!(
                "Cannot upsert vm {name} with {} checks to host pool",
                check.name()
            ))
        });
        let entry = match outcome {
            Ok(()) => result,
            Err(err) => {
                warn!(vm = %name, check = check.name(), "{}", err);
                err.to_json()
            }
        };
        report.insert(check.name().to_string(), entry);
    }
    Ok(Value::Object(report))
}

fn check_vm_network(doc: &mut Value) -> Value {
    let addresses_available = doc
        .get("addresses")
        .and_then(Value::as_object)
        .is_some_and(|addrs| addrs.keys().any(|k| k.contains("ipv4")));
    let main_ip_available = doc
        .get("mainIpAddress")
        .and_then(Value::as_str)
        .is_some_and(|ip| ip.split('.').count() == 4);

    set_flat_tag(doc, "addresses_available", json!(addresses_available));
    set_flat_tag(doc, "mainIpAddress_available", json!(main_ip_available));
    json!({
        "addresses_available": addresses_available,
        "mainIpAddress_available": main_ip_available,
    })
}

fn check_vm_os_version(doc: &mut Value) -> Value {
    let available = doc
        .get("os_version")
        .and_then(Value::as_str)
        .is_some_and(|v| !v.is_empty());
    set_flat_tag(doc, "os_version_available", json!(available));
    json!({ "os_version_available": available })
}

/// A VM is in the server pool when any of its addresses is a server's `ipaddr`.
fn check_vm_in_server_pool(doc: &mut Value, server_ips: &HashSet<String>) -> Value {
    let mut addresses: Vec<&str> = doc
        .get("addresses")
        .and_then(Value::as_object)
        .map(|addrs| addrs.values().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if let Some(main) = doc.get("mainIpAddress").and_then(Value::as_str) {
        addresses.push(main);
    }
    let in_pool = addresses.iter().any(|ip| server_ips.contains(*ip));

    set_flat_tag(doc, "vm_in_server_pool", json!(in_pool));
    json!({ "vm_in_server_pool": in_pool })
}

/// Compare a document's fields with its template. `tags` is written by the
/// checks themselves and never counts as extra.
fn field_consistency(doc: &Value, required: &[&str]) -> Value {
    let (absent, extra) = match doc.as_object() {
        Some(obj) => field_diff(obj, required),
        None => (required.iter().map(|f| f.to_string()).collect(), Vec::new()),
    };
    let extra: Vec<String> = extra.into_iter().filter(|f| f != "tags").collect();

    let mut report = json!({ "fields_match": absent.is_empty() && extra.is_empty() });
    if !absent.is_empty() {
        report["fields_absent"] = json!(absent);
    }
    if !extra.is_empty() {
        report["fields_extra"] = json!(extra);
    }
    report
}
