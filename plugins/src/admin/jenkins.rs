//! Jenkins controller client (basic auth with a user API token).

use async_trait::async_trait;

use labkeeper_core::api::{AdminApi, AdminError, AdminOperation, AdminResponse, JenkinsInstanceConfig};

use crate::http::{read_json_response, HttpError};

#[derive(Clone)]
pub struct JenkinsClient {
    name: String,
    base_url: String,
    username: String,
    api_token: String,
    http: reqwest::Client,
}

impl JenkinsClient {
    pub fn new(name: impl Into<String>, cfg: &JenkinsInstanceConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(cfg.timeout_ms))
            .build()?;
        Ok(Self {
            name: name.into(),
            base_url: cfg.url.trim_end_matches('/').to_string(),
            username: cfg.username.clone(),
            api_token: cfg.api_token.clone(),
            http,
        })
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            req
        } else {
            req.basic_auth(&self.username, Some(&self.api_token))
        }
    }

    fn request(&self, op: &AdminOperation) -> (reqwest::Method, String, Vec<(&'static str, String)>) {
        let computer = |name: &str, tail: &str| format!("{}/computer/{}/{}", self.base_url, name, tail);
        match op {
            AdminOperation::ListSlaves => (
                reqwest::Method::GET,
                format!("{}/computer/api/json", self.base_url),
                Vec::new(),
            ),
            AdminOperation::SlaveStatus { name } => {
                (reqwest::Method::GET, computer(name, "api/json"), Vec::new())
            }
            AdminOperation::ReconnectSlave { name } => {
                (reqwest::Method::POST, computer(name, "launchSlaveAgent"), Vec::new())
            }
            AdminOperation::DisconnectSlave { name, reason } => (
                reqwest::Method::POST,
                computer(name, "doDisconnect"),
                vec![("offlineMessage", reason.clone())],
            ),
            AdminOperation::DeleteSlave { name } => {
                (reqwest::Method::POST, computer(name, "doDelete"), Vec::new())
            }
        }
    }
}

#[async_trait]
impl AdminApi for JenkinsClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn call(&self, op: &AdminOperation) -> Result<AdminResponse, AdminError> {
        let (method, url, query) = self.request(op);
        tracing::debug!(instance = %self.name, op = op.label(), url = %url, "admin.jenkins.call");
        let req = self.http.request(method, &url).query(&query);
        let resp = self
            .auth(req)
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest(err, url.clone()))?;
        // Jenkins answers the POST actions with HTML or an empty body.
        let (status, payload) = read_json_response(resp, true).await?;
        tracing::info!(instance = %self.name, op = op.label(), status, "admin.jenkins.done");
        Ok(AdminResponse { status, payload })
    }
}
