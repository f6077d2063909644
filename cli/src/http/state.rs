//! HTTP服务器状态管理

use chrono::{DateTime, Local};
use labkeeper_core::api::{Services, TaskManager, TaskRegistry, TasksConfig};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;

/// 应用状态（在所有handlers间共享）
#[derive(Clone)]
pub struct AppState {
    pub session_id: String,
    pub manager: TaskManager,
    pub registry: Arc<TaskRegistry>,
    pub services: Arc<Services>,
    pub tasks: Arc<TasksConfig>,
    /// `/result` 最长等待时间（秒）
    pub max_wait_secs: u64,
    pub stats: Arc<RwLock<ServerStats>>,
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    pub fn new(
        session_id: String,
        manager: TaskManager,
        registry: TaskRegistry,
        services: Services,
        tasks: TasksConfig,
        max_wait_secs: u64,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            session_id,
            manager,
            registry: Arc::new(registry),
            services: Arc::new(services),
            tasks: Arc::new(tasks),
            max_wait_secs: max_wait_secs.max(1),
            stats: Arc::new(RwLock::new(ServerStats::new())),
            shutdown_tx,
        }
    }

    pub fn record_request(&self, endpoint: &str) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .increment_request(endpoint);
    }

    pub fn record_error(&self) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .increment_error();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let stats = self.stats.read().unwrap_or_else(PoisonError::into_inner);
        StatsSnapshot {
            uptime_seconds: stats.uptime_seconds(),
            requests_total: stats.requests_total,
            errors_total: stats.errors_total,
            requests_by_endpoint: stats
                .requests_by_endpoint
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        }
    }
}

/// 统计快照（`/health` 使用）
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub uptime_seconds: f64,
    pub requests_total: u64,
    pub errors_total: u64,
    pub requests_by_endpoint: BTreeMap<String, u64>,
}

/// 服务器统计信息
pub struct ServerStats {
    pub requests_total: u64,
    pub requests_by_endpoint: HashMap<String, u64>,
    pub errors_total: u64,
    pub start_time: DateTime<Local>,
}

impl ServerStats {
    pub fn new() -> Self {
        Self {
            requests_total: 0,
            requests_by_endpoint: HashMap::new(),
            errors_total: 0,
            start_time: Local::now(),
        }
    }

    pub fn increment_request(&mut self, endpoint: &str) {
        self.requests_total += 1;
        *self
            .requests_by_endpoint
            .entry(endpoint.to_string())
            .or_insert(0) += 1;
    }

    pub fn increment_error(&mut self) {
        self.errors_total += 1;
    }

    pub fn uptime_seconds(&self) -> f64 {
        let now = Local::now();
        (now - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

impl Default for ServerStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_stats_new() {
        let stats = ServerStats::new();
        assert_eq!(stats.requests_total, 0);
        assert_eq!(stats.errors_total, 0);
        assert!(stats.uptime_seconds() < 1.0);
    }

    #[test]
    fn test_increment_request() {
        let mut stats = ServerStats::new();
        stats.increment_request("/api/v1/tasks/:name");
        stats.increment_request("/api/v1/tasks/:name");
        stats.increment_request("/health");

        assert_eq!(stats.requests_total, 3);
        assert_eq!(
            *stats.requests_by_endpoint.get("/api/v1/tasks/:name").unwrap(),
            2
        );
        assert_eq!(*stats.requests_by_endpoint.get("/health").unwrap(), 1);
    }
}
