use std::collections::BTreeMap;
use std::sync::Arc;

use crate::admin::{AdminApi, AdminError};
use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::remote::{HostCredentials, RemoteConnector};
use crate::store::PoolClient;

/// Collaborators handed to every task constructor.
#[derive(Clone)]
pub struct Services {
    pub servers: PoolClient,
    pub hosts: PoolClient,
    pub vms: PoolClient,
    pub slaves: PoolClient,
    /// Finished task reports, keyed by task id.
    pub tasks: PoolClient,
    pub remote: Arc<dyn RemoteConnector>,
    /// Keyed by instance name.
    pub admins: BTreeMap<String, Arc<dyn AdminApi>>,
    /// Login the health checks use, since pool documents carry none.
    pub default_login: HostCredentials,
}

impl Services {
    pub fn admin(&self, name: &str) -> Result<Arc<dyn AdminApi>, AdminError> {
        self.admins
            .get(name)
            .cloned()
            .ok_or_else(|| AdminError::UnknownInstance(name.to_string()))
    }

    /// Resolve an instance by name or by the URL it answers on, ignoring a
    /// trailing slash.
    pub fn admin_for(&self, name_or_url: &str) -> Result<Arc<dyn AdminApi>, AdminError> {
        if let Ok(admin) = self.admin(name_or_url) {
            return Ok(admin);
        }
        let wanted = name_or_url.trim_end_matches('/');
        self.admins
            .values()
            .find(|a| a.base_url().trim_end_matches('/') == wanted)
            .cloned()
            .ok_or_else(|| AdminError::UnknownInstance(name_or_url.to_string()))
    }

    /// Default login for `ipaddr`.
    pub fn login_for(&self, ipaddr: &str) -> HostCredentials {
        HostCredentials {
            ipaddr: ipaddr.to_string(),
            ..self.default_login.clone()
        }
    }
}

#[async_trait::async_trait]
pub trait ServicesFactory: Send + Sync {
    async fn build_services(&self, cfg: &AppConfig) -> Result<Services, ServiceError>;
}

#[derive(Clone)]
pub struct AppContext {
    cfg: AppConfig,
    services_factory: Option<Arc<dyn ServicesFactory>>,
}

impl AppContext {
    pub fn new(cfg: AppConfig, services_factory: Option<Arc<dyn ServicesFactory>>) -> Self {
        Self {
            cfg,
            services_factory,
        }
    }

    pub fn cfg(&self) -> &AppConfig {
        &self.cfg
    }

    pub async fn build_services(&self) -> Result<Services, ServiceError> {
        let Some(factory) = self.services_factory.as_ref() else {
            return Err(ServiceError::Config(
                "services_factory missing (cannot build plugins/services)".into(),
            ));
        };
        factory.build_services(&self.cfg).await
    }
}
