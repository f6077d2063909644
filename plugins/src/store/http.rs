//! Document store served over HTTP:
//! `PUT|GET|DELETE {base}/pools/{collection}/docs/{key}` and
//! `POST {base}/pools/{collection}/query`.

use async_trait::async_trait;
use serde_json::Value;

use labkeeper_core::api::{Document, DocumentStore, Query, StoreError};

use crate::http::{ensure_success, read_json_response, HttpError};

#[derive(Clone)]
pub struct HttpDocumentStore {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
}

impl HttpDocumentStore {
    pub fn new(base_url: String, api_key: String, timeout_ms: u64) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()?;
        Ok(Self {
            api_key,
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn doc_url(&self, collection: &str, key: &str) -> String {
        format!("{}/pools/{}/docs/{}", self.base_url, collection, key)
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.trim().is_empty() {
            req
        } else {
            req.bearer_auth(&self.api_key)
        }
    }

    async fn send(
        &self,
        req: reqwest::RequestBuilder,
        url: &str,
    ) -> Result<reqwest::Response, StoreError> {
        self.auth(req)
            .send()
            .await
            .map_err(|err| HttpError::from_reqwest(err, url.to_string()).into())
    }
}

fn not_found(collection: &str, key: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        key: key.to_string(),
    }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
    fn name(&self) -> &str {
        "http"
    }

    async fn upsert(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError> {
        let url = self.doc_url(collection, key);
        tracing::debug!(url = %url, "store.http.upsert");
        let resp = self.send(self.http.put(&url).json(body), &url).await?;
        ensure_success(resp).await?;
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
        let url = self.doc_url(collection, key);
        let resp = self.send(self.http.get(&url), &url).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(not_found(collection, key));
        }
        let (_, body) = read_json_response(resp, false).await?;
        match body {
            Value::Object(_) => Ok(body),
            other => Err(StoreError::InvalidDocument(format!(
                "{collection}/{key} is not an object: {other}"
            ))),
        }
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let url = self.doc_url(collection, key);
        let resp = self.send(self.http.delete(&url), &url).await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(not_found(collection, key));
        }
        ensure_success(resp).await?;
        Ok(())
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let url = format!("{}/pools/{}/query", self.base_url, collection);
        tracing::debug!(url = %url, query = ?query, "store.http.query");
        let resp = self.send(self.http.post(&url).json(query), &url).await?;
        let (_, body) = read_json_response(resp, false).await?;
        if body.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value::<Vec<Document>>(body)
            .map_err(|e| StoreError::InvalidDocument(format!("query response: {e}")))
    }
}
