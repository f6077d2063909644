//! ServicesFactory 实现：从配置构建文档存储、远程执行与 Jenkins 客户端，供 CLI 复用。
use async_trait::async_trait;
use labkeeper_core::api::{AppConfig, ServiceError, Services, ServicesFactory};

use crate::factory;

#[derive(Default)]
pub struct PluginServicesFactory;

#[async_trait]
impl ServicesFactory for PluginServicesFactory {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, ServiceError> {
        let store = factory::build_store(cfg)
            .await
            .map_err(ServiceError::Plugin)?;
        let store_name = store.name().to_string();
        let pools = factory::build_pool_clients(cfg, store);
        let admins = factory::build_admins(cfg).map_err(ServiceError::Plugin)?;
        tracing::info!(
            store = %store_name,
            jenkins_instances = admins.len(),
            "services built"
        );
        Ok(Services {
            servers: pools.servers,
            hosts: pools.hosts,
            vms: pools.vms,
            slaves: pools.slaves,
            tasks: pools.tasks,
            remote: factory::build_remote(cfg),
            admins,
            default_login: factory::build_default_login(cfg),
        })
    }
}
