use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;

use labkeeper_core::api::{
    AdminApi, AppConfig, DocumentStore, HostCredentials, PoolClient, RemoteConnector,
    RetryStrategy, StoreProvider,
};

use crate::admin::JenkinsClient;
use crate::remote::{SshConnector, SshSettings};
use crate::store::{HttpDocumentStore, LocalDocumentStore};
use crate::strategies::{ExponentialBackoff, LinearRetry};

pub async fn build_store(cfg: &AppConfig) -> Result<Arc<dyn DocumentStore>> {
    match &cfg.store.provider {
        StoreProvider::Local(local) => match &local.snapshot_path {
            Some(path) if !path.trim().is_empty() => {
                Ok(Arc::new(LocalDocumentStore::open(path).await?))
            }
            _ => Ok(Arc::new(LocalDocumentStore::in_memory())),
        },
        StoreProvider::Http(http) => Ok(Arc::new(HttpDocumentStore::new(
            http.base_url.clone(),
            http.api_key.clone(),
            http.timeout_ms,
        )?)),
    }
}

pub fn build_retry(cfg: &AppConfig) -> Arc<dyn RetryStrategy> {
    match cfg.retry.strategy.as_str() {
        "linear" => Arc::new(LinearRetry::new(cfg.retry.clone())),
        // Anything else keeps the default backoff.
        _ => Arc::new(ExponentialBackoff::new(cfg.retry.clone())),
    }
}

pub struct PoolClients {
    pub servers: PoolClient,
    pub hosts: PoolClient,
    pub vms: PoolClient,
    pub slaves: PoolClient,
    pub tasks: PoolClient,
}

/// One client per pool, all sharing `store` and the retry strategy.
pub fn build_pool_clients(cfg: &AppConfig, store: Arc<dyn DocumentStore>) -> PoolClients {
    let retry = build_retry(cfg);
    let names = &cfg.store.collections;
    let client = |collection: &str| {
        PoolClient::new(store.clone(), collection, retry.clone(), cfg.store.retries)
    };
    PoolClients {
        servers: client(&names.servers),
        hosts: client(&names.hosts),
        vms: client(&names.vms),
        slaves: client(&names.slaves),
        tasks: client(&names.tasks),
    }
}

pub fn build_remote(cfg: &AppConfig) -> Arc<dyn RemoteConnector> {
    Arc::new(SshConnector::new(SshSettings::from(&cfg.remote)))
}

pub fn build_default_login(cfg: &AppConfig) -> HostCredentials {
    HostCredentials::new(
        "",
        cfg.remote.default_username.clone(),
        cfg.remote.default_password.clone(),
    )
}

pub fn build_admins(cfg: &AppConfig) -> Result<BTreeMap<String, Arc<dyn AdminApi>>> {
    cfg.jenkins
        .iter()
        .map(|(name, instance)| {
            let client: Arc<dyn AdminApi> = Arc::new(JenkinsClient::new(name.clone(), instance)?);
            Ok((name.clone(), client))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use labkeeper_core::api::{JenkinsInstanceConfig, LocalStoreConfig, StoreConfig};

    #[tokio::test]
    async fn test_default_config_builds_in_memory_store() {
        let cfg = AppConfig::default();
        let store = build_store(&cfg).await.unwrap();
        assert_eq!(store.name(), "local");

        let pools = build_pool_clients(&cfg, store);
        assert_eq!(pools.servers.collection(), "servers");
        assert_eq!(pools.hosts.collection(), "hosts");
        assert_eq!(pools.vms.collection(), "vms");
        assert_eq!(pools.slaves.collection(), "slaves");
        assert_eq!(pools.tasks.collection(), "tasks");
        assert_eq!(pools.servers.default_retries(), 5);
    }

    #[tokio::test]
    async fn test_snapshot_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig {
            store: StoreConfig {
                provider: StoreProvider::Local(LocalStoreConfig {
                    snapshot_path: Some(dir.path().join("pools.json").display().to_string()),
                }),
                ..StoreConfig::default()
            },
            ..AppConfig::default()
        };
        let store = build_store(&cfg).await.unwrap();
        store
            .upsert("servers", "10.0.0.1", &serde_json::json!({"state": "available"}))
            .await
            .unwrap();
        assert!(dir.path().join("pools.json").exists());
    }

    #[test]
    fn test_retry_strategy_selection() {
        let mut cfg = AppConfig::default();
        assert_eq!(build_retry(&cfg).name(), "exponential-backoff");
        cfg.retry.strategy = "linear".into();
        assert_eq!(build_retry(&cfg).name(), "linear");
    }

    #[test]
    fn test_admins_keyed_by_instance() {
        let mut cfg = AppConfig::default();
        cfg.jenkins.insert(
            "qa_jenkins".into(),
            JenkinsInstanceConfig {
                url: "http://jenkins.local:8080/".into(),
                username: String::new(),
                api_token: String::new(),
                timeout_ms: 1_000,
            },
        );
        let admins = build_admins(&cfg).unwrap();
        assert_eq!(admins["qa_jenkins"].base_url(), "http://jenkins.local:8080");
    }
}
