//! Health checks over the server pool.
//!
//! Checks run level by level: every node gets one subtask per check, and a
//! level is fully collected before the next starts, so later checks see the
//! tags earlier ones recorded (`node_stats_match` needs `connection_check`).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use labkeeper_core::api::{
    params, Document, Query, Services, StoreError, SubTaskId, SubTaskOutcome, Task, TaskContext,
    TaskError, TasksConfig,
};

use super::tags::{detail, flush_tags, initialize_tags, push_tag, set_detail};
use super::templates::{field_diff, DOC_KEY, NODE_FIELDS};

pub const NODE_HEALTH_MONITOR: &str = "NodeHealthMonitorTask";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCheck {
    Connectivity,
    FieldConsistency,
    NodeStatsMatch,
    HostPoolCheck,
}

impl NodeCheck {
    /// Execution order when a caller selects every check.
    pub const ALL: [NodeCheck; 4] = [
        NodeCheck::Connectivity,
        NodeCheck::FieldConsistency,
        NodeCheck::NodeStatsMatch,
        NodeCheck::HostPoolCheck,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::FieldConsistency => "field_consistency",
            Self::NodeStatsMatch => "node_stats_match",
            Self::HostPoolCheck => "host_pool_check",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Tags this check owns; they are cleared before it re-derives them.
    fn tags(self) -> &'static [&'static str] {
        match self {
            Self::Connectivity => &["unreachable"],
            Self::FieldConsistency => &["no_fields_consistency"],
            Self::NodeStatsMatch => &[
                "mac_address_node_mismatch",
                "memory_node_mismatch",
                "os_node_mismatch",
            ],
            Self::HostPoolCheck => &[
                "ip_not_in_host_pool",
                "origin_host_pool_mismatch",
                "vm_name_host_pool_mismatch",
                "os_host_pool_mismatch",
            ],
        }
    }
}

type SharedDoc = Arc<Mutex<Value>>;

pub struct NodeHealthMonitorTask {
    ctx: TaskContext,
    services: Arc<Services>,
    pool_ids: Vec<String>,
    checks: Vec<NodeCheck>,
}

impl NodeHealthMonitorTask {
    /// Params: `poolId` (optional list of pools, all nodes when empty) and
    /// `tasks` (optional list of check names, every check when empty).
    pub fn new(params: &Value, services: &Services, cfg: &TasksConfig) -> Result<Self, TaskError> {
        let pool_ids = params::optional_string_list(params, "poolId")?;
        let requested = params::optional_string_list(params, "tasks")?;
        let known: Vec<&str> = NodeCheck::ALL.iter().map(|c| c.name()).collect();
        let checks = params::select_known(&requested, &known, "task")?
            .into_iter()
            .filter_map(NodeCheck::from_name)
            .collect();

        Ok(Self {
            ctx: TaskContext::new(NODE_HEALTH_MONITOR, cfg.workers_for(NODE_HEALTH_MONITOR, None)),
            services: Arc::new(services.clone()),
            pool_ids,
            checks,
        })
    }

    pub fn checks(&self) -> &[NodeCheck] {
        &self.checks
    }

    async fn fetch_nodes(&self) -> Result<Vec<(String, SharedDoc)>, TaskError> {
        let query = if self.pool_ids.is_empty() {
            Query::All
        } else {
            Query::any_of("poolId", self.pool_ids.iter().map(|p| json!(p)).collect())
        };
        let rows = self
            .services
            .servers
            .query(&query)
            .await
            .map_err(|e| TaskError::from(e).context("Cannot fetch docs from server-pool"))?;

        Ok(rows
            .into_iter()
            .filter_map(|Document { key, mut body }| {
                let Some(obj) = body.as_object_mut() else {
                    warn!(doc_key = %key, "skipping server pool row that is not an object");
                    return None;
                };
                obj.insert(DOC_KEY.to_string(), json!(key));
                Some((key, Arc::new(Mutex::new(body))))
            })
            .collect())
    }
}

#[async_trait]
impl Task for NodeHealthMonitorTask {
    fn context(&self) -> &TaskContext {
        &self.ctx
    }

    async fn execute(&self) -> Result<(), TaskError> {
        self.start_task()?;
        let nodes = self.fetch_nodes().await?;
        info!(task_id = %self.id(), nodes = nodes.len(), checks = self.checks.len(), "node health monitor started");

        for check in &self.checks {
            let pending: Vec<(String, SubTaskId)> = nodes
                .iter()
                .map(|(doc_key, doc)| {
                    let job = NodeJob {
                        check: *check,
                        services: self.services.clone(),
                        doc_key: doc_key.clone(),
                        doc: doc.clone(),
                    };
                    (doc_key.clone(), self.add_sub_task(check.name(), job, run_node_check))
                })
                .collect();

            for (doc_key, id) in pending {
                let result = self.get_sub_task_result(&id).await?;
                self.context()
                    .result()
                    .insert_grouped(doc_key, check.name(), result)?;
            }
        }

        self.complete_task(true)
    }
}

struct NodeJob {
    check: NodeCheck,
    services: Arc<Services>,
    doc_key: String,
    doc: SharedDoc,
}

async fn run_node_check(job: NodeJob) -> SubTaskOutcome {
    let NodeJob {
        check,
        services,
        doc_key,
        doc,
    } = job;
    let mut doc = doc.lock().await;
    let ipaddr = doc
        .get("ipaddr")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TaskError::InvalidParams(format!("ipaddr missing from node {doc_key}")))?;

    if check == NodeCheck::NodeStatsMatch {
        ensure_reachable(&doc, &ipaddr)?;
    }

    initialize_tags(&mut doc);
    flush_tags(&mut doc, check.tags());

    let result = match check {
        NodeCheck::Connectivity => check_connectivity(&services, &ipaddr, &mut doc).await,
        NodeCheck::FieldConsistency => check_field_consistency(&mut doc),
        NodeCheck::NodeStatsMatch => check_node_stats(&services, &ipaddr, &mut doc).await?,
        NodeCheck::HostPoolCheck => check_host_pool(&services, &ipaddr, &mut doc).await?,
    };

    services.servers.upsert(&doc_key, &doc).await.map_err(|e| {
        TaskError::from(e).context(format!(
            "Cannot upsert node {ipaddr} with {} checks to server pool",
            check.name()
        ))
    })?;
    info!(node = %ipaddr, check = check.name(), "node document updated");
    Ok(result)
}

fn ensure_reachable(doc: &Value, ipaddr: &str) -> Result<(), TaskError> {
    match detail(doc, "connection_check").and_then(Value::as_bool) {
        Some(true) => Ok(()),
        Some(false) => Err(TaskError::Check(format!(
            "The node is unreachable, cannot perform node stats checks for {ipaddr}"
        ))),
        None => Err(TaskError::Check(format!(
            "Node stats check was run before connection checks for {ipaddr}"
        ))),
    }
}

async fn check_connectivity(services: &Services, ipaddr: &str, doc: &mut Value) -> Value {
    let outcome = services.remote.connect(&services.login_for(ipaddr)).await;
    if let Some(details) = doc
        .pointer_mut("/tags/details")
        .and_then(Value::as_object_mut)
    {
        details.remove("connection_check_err");
    }

    let mut result = Map::new();
    match outcome {
        Ok(_) => {
            set_detail(doc, "connection_check", json!(true));
            result.insert("connection_check".into(), json!(true));
        }
        Err(err) => {
            warn!(node = %ipaddr, "node unreachable: {}", err);
            let message = err.to_string();
            set_detail(doc, "connection_check", json!(false));
            set_detail(doc, "connection_check_err", json!(message));
            push_tag(doc, "unreachable");
            result.insert("connection_check".into(), json!(false));
            result.insert("connection_check_err".into(), json!(message));
        }
    }
    Value::Object(result)
}

fn check_field_consistency(doc: &mut Value) -> Value {
    let mut required = NODE_FIELDS.to_vec();
    required.push(DOC_KEY);
    let (absent, extra) = match doc.as_object() {
        Some(obj) => field_diff(obj, &required),
        None => (Vec::new(), Vec::new()),
    };

    let mut report = json!({ "fields_match": absent.is_empty() && extra.is_empty() });
    if !absent.is_empty() {
        report["fields_absent"] = json!(absent);
    }
    if !extra.is_empty() {
        report["fields_extra"] = json!(extra);
    }
    if !(absent.is_empty() && extra.is_empty()) {
        push_tag(doc, "no_fields_consistency");
    }
    set_detail(doc, "field_consistency", report.clone());
    json!({ "field_consistency": report })
}

/// Compare one recorded field with what the node reports. Mismatches keep
/// the observed value next to the flag.
fn compare(
    doc: &mut Value,
    matches: bool,
    detail_key: &str,
    match_key: &str,
    observed_key: &str,
    observed: Value,
    tag: &str,
) -> Value {
    let report = if matches {
        json!({ match_key: true })
    } else {
        push_tag(doc, tag);
        json!({ match_key: false, observed_key: observed })
    };
    set_detail(doc, detail_key, report.clone());
    report
}

/// Node documents have stored memory both as a number and as a string.
fn memory_matches(recorded: Option<&Value>, observed_kb: u64) -> bool {
    match recorded {
        Some(Value::Number(n)) => n.as_u64() == Some(observed_kb),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok() == Some(observed_kb),
        _ => false,
    }
}

async fn check_node_stats(
    services: &Services,
    ipaddr: &str,
    doc: &mut Value,
) -> Result<Value, TaskError> {
    let node = services
        .remote
        .connect(&services.login_for(ipaddr))
        .await
        .map_err(|e| {
            TaskError::from(e).context(format!(
                "The node {ipaddr} is unreachable, cannot perform node stats checks"
            ))
        })?;

    let mac = node.find_mac_address().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find mac address for node {ipaddr}"))
    })?;
    let memory = node.find_memory_total().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find total memory for node {ipaddr}"))
    })?;
    let os = node.find_os_version().await.map_err(|e| {
        TaskError::from(e).context(format!("Could not find os version for node {ipaddr}"))
    })?;

    let mac_match = doc.get("mac_address").and_then(Value::as_str) == Some(mac.as_str());
    let memory_match = memory_matches(doc.get("memory"), memory);
    let os_match = doc.get("os_version").and_then(Value::as_str) == Some(os.os_version.as_str());

    let mac_report = compare(
        doc,
        mac_match,
        "mac_address_node_check",
        "mac_address_node_match",
        "mac_address_in_node",
        json!(mac),
        "mac_address_node_mismatch",
    );
    let memory_report = compare(
        doc,
        memory_match,
        "memory_node_check",
        "memory_node_match",
        "memory_in_node",
        json!(memory),
        "memory_node_mismatch",
    );
    let os_report = compare(
        doc,
        os_match,
        "os_node_check",
        "os_node_match",
        "os_in_node",
        json!(os.os_version),
        "os_node_mismatch",
    );

    Ok(json!({
        "mac_address_node_match": mac_report,
        "memory_node_match": memory_report,
        "os_node_match": os_report,
    }))
}

/// The VM whose main address or any listed address is `ipaddr`.
async fn find_vm(services: &Services, ipaddr: &str) -> Result<Option<Value>, TaskError> {
    let fetch_err = |e: StoreError| {
        TaskError::from(e).context(format!("Cannot fetch vm {ipaddr} from host pool"))
    };
    let by_main = services
        .vms
        .query(&Query::eq("mainIpAddress", ipaddr))
        .await
        .map_err(fetch_err)?;
    if let Some(row) = by_main.into_iter().next() {
        return Ok(Some(row.body));
    }

    // Secondary addresses live in an object keyed by interface.
    let all = services.vms.query(&Query::All).await.map_err(fetch_err)?;
    Ok(all
        .into_iter()
        .map(|row| row.body)
        .find(|vm| {
            vm.get("addresses")
                .and_then(Value::as_object)
                .is_some_and(|addrs| addrs.values().any(|a| a.as_str() == Some(ipaddr)))
        }))
}

async fn check_host_pool(
    services: &Services,
    ipaddr: &str,
    doc: &mut Value,
) -> Result<Value, TaskError> {
    let Some(vm) = find_vm(services, ipaddr).await? else {
        set_detail(doc, "ip_in_host_pool", json!(false));
        push_tag(doc, "ip_not_in_host_pool");
        return Ok(json!({ "ip_in_host_pool": false }));
    };
    set_detail(doc, "ip_in_host_pool", json!(true));

    let vm_host = vm.get("host").cloned().unwrap_or(Value::Null);
    let vm_name = vm.get("name_label").cloned().unwrap_or(Value::Null);
    let vm_os = vm
        .get("os_version")
        .cloned()
        .unwrap_or_else(|| json!("unknown"));

    let origin_match = doc.get("origin").is_some_and(|o| *o == vm_host);
    let name_match = doc.get("vm_name").is_some_and(|n| *n == vm_name);
    let os_match = doc.get("os_version").is_some_and(|o| *o == vm_os);

    let origin = compare(
        doc,
        origin_match,
        "origin_host_pool",
        "origin_match",
        "origin_host_pool",
        vm_host,
        "origin_host_pool_mismatch",
    );
    let name = compare(
        doc,
        name_match,
        "vm_name_host_pool",
        "vm_name_match",
        "vm_name_host_pool",
        vm_name,
        "vm_name_host_pool_mismatch",
    );
    let os = compare(
        doc,
        os_match,
        "os_version_host_pool",
        "os_version_match",
        "os_version_host_pool",
        vm_os,
        "os_host_pool_mismatch",
    );

    Ok(json!({
        "ip_in_host_pool": true,
        "origin_host_pool": origin,
        "vm_name_host_pool": name,
        "os_version_host_pool": os,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_names_round_trip() {
        for check in NodeCheck::ALL {
            assert_eq!(NodeCheck::from_name(check.name()), Some(check));
        }
        assert_eq!(NodeCheck::from_name("ntp"), None);
    }

    #[test]
    fn test_memory_matches_number_or_string() {
        assert!(memory_matches(Some(&json!(4096)), 4096));
        assert!(memory_matches(Some(&json!("4096")), 4096));
        assert!(!memory_matches(Some(&json!("")), 4096));
        assert!(!memory_matches(None, 4096));
    }

    #[test]
    fn test_field_consistency_tags_mismatch() {
        let mut doc = json!({"ipaddr": "10.0.0.1", "doc_key": "10.0.0.1", "legacy": true});
        initialize_tags(&mut doc);
        let result = check_field_consistency(&mut doc);
        assert_eq!(result["field_consistency"]["fields_match"], json!(false));
        assert_eq!(result["field_consistency"]["fields_extra"], json!(["legacy"]));
        assert!(result["field_consistency"]["fields_absent"]
            .as_array()
            .unwrap()
            .contains(&json!("mac_address")));
        assert_eq!(doc["tags"]["list"], json!(["no_fields_consistency"]));
    }

    #[test]
    fn test_stats_require_connection_check() {
        let mut doc = json!({});
        initialize_tags(&mut doc);
        assert!(matches!(ensure_reachable(&doc, "10.0.0.1"), Err(TaskError::Check(_))));
        set_detail(&mut doc, "connection_check", json!(false));
        assert!(ensure_reachable(&doc, "10.0.0.1").is_err());
        set_detail(&mut doc, "connection_check", json!(true));
        assert!(ensure_reachable(&doc, "10.0.0.1").is_ok());
    }
}
