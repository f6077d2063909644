//! Document store contract and the retrying per-pool client tasks use.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::TaskError;
use crate::retry::RetryStrategy;

/// One row of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub body: Value,
}

/// Filter over top-level fields of a document body.
///
/// When the field holds an array, the query matches if any element does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Query {
    All,
    Eq { field: String, value: Value },
    AnyOf { field: String, values: Vec<Value> },
}

impl Query {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self::AnyOf {
            field: field.into(),
            values,
        }
    }

    pub fn matches(&self, body: &Value) -> bool {
        match self {
            Self::All => true,
            Self::Eq { field, value } => field_matches(body, field, |v| v == value),
            Self::AnyOf { field, values } => field_matches(body, field, |v| values.contains(v)),
        }
    }
}

fn field_matches(body: &Value, field: &str, accept: impl Fn(&Value) -> bool) -> bool {
    match body.get(field) {
        Some(Value::Array(items)) => items.iter().any(&accept),
        Some(v) => accept(v),
        None => false,
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document {key} not found in {collection}")]
    NotFound { collection: String, key: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store request timed out: {0}")]
    Timeout(String),

    #[error("store rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("store io error: {0}")]
    Io(String),
}

impl StoreError {
    /// Worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::Timeout(_) => true,
            Self::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<StoreError> for TaskError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) | StoreError::Timeout(_) => {
                TaskError::Connection(err.to_string())
            }
            other => TaskError::Store(other.to_string()),
        }
    }
}

/// 文档存储插件
#[async_trait]
pub trait DocumentStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert or replace the document stored under `key`.
    async fn upsert(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, key: &str) -> Result<Value, StoreError>;

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError>;

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError>;
}

/// A store bound to one collection, retrying transient failures.
///
/// `retries` counts total attempts and is clamped to at least one. The
/// strategy may end the loop early by returning no delay.
#[derive(Clone)]
pub struct PoolClient {
    store: Arc<dyn DocumentStore>,
    collection: String,
    retry: Arc<dyn RetryStrategy>,
    default_retries: u32,
}

impl PoolClient {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        collection: impl Into<String>,
        retry: Arc<dyn RetryStrategy>,
        default_retries: u32,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            retry,
            default_retries,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn default_retries(&self) -> u32 {
        self.default_retries
    }

    pub async fn upsert(&self, key: &str, body: &Value) -> Result<(), StoreError> {
        self.upsert_with_retries(key, body, self.default_retries)
            .await
    }

    pub async fn upsert_with_retries(
        &self,
        key: &str,
        body: &Value,
        retries: u32,
    ) -> Result<(), StoreError> {
        if !body.is_object() {
            return Err(StoreError::InvalidDocument(format!(
                "{key}: document body must be an object"
            )));
        }
        self.attempt("upsert", key, retries, || {
            self.store.upsert(&self.collection, key, body)
        })
        .await
    }

    pub async fn get(&self, key: &str) -> Result<Value, StoreError> {
        self.get_with_retries(key, self.default_retries).await
    }

    pub async fn get_with_retries(&self, key: &str, retries: u32) -> Result<Value, StoreError> {
        self.attempt("get", key, retries, || self.store.get(&self.collection, key))
            .await
    }

    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delete_with_retries(key, self.default_retries).await
    }

    pub async fn delete_with_retries(&self, key: &str, retries: u32) -> Result<(), StoreError> {
        self.attempt("delete", key, retries, || {
            self.store.delete(&self.collection, key)
        })
        .await
    }

    pub async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.query_with_retries(query, self.default_retries).await
    }

    pub async fn query_with_retries(
        &self,
        query: &Query,
        retries: u32,
    ) -> Result<Vec<Document>, StoreError> {
        self.attempt("query", "*", retries, || {
            self.store.query(&self.collection, query)
        })
        .await
    }

    async fn attempt<T, F, Fut>(
        &self,
        op: &str,
        key: &str,
        retries: u32,
        mut call: F,
    ) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = retries.max(1);
        let mut attempt = 0u32;
        loop {
            match call().await {
                Ok(value) => {
                    debug!(
                        store = %self.store.name(),
                        collection = %self.collection,
                        op,
                        key,
                        attempt,
                        "store call ok"
                    );
                    return Ok(value);
                }
                Err(err) => {
                    let last = attempt + 1 >= attempts;
                    if !err.is_transient() || last {
                        return Err(err);
                    }
                    let Some(delay) = self.retry.next_delay(attempt, &err.to_string()) else {
                        return Err(err);
                    };
                    warn!(
                        collection = %self.collection,
                        op,
                        key,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "store call failed, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::ImmediateRetry;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Fails the first `failures` calls with a transient error.
    #[derive(Default)]
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
        docs: Mutex<HashMap<String, Value>>,
    }

    impl FlakyStore {
        fn trip(&self) -> Result<(), StoreError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(StoreError::Unavailable(format!("flaky call {n}")))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn upsert(&self, _c: &str, key: &str, body: &Value) -> Result<(), StoreError> {
            self.trip()?;
            self.docs
                .lock()
                .unwrap()
                .insert(key.to_string(), body.clone());
            Ok(())
        }

        async fn get(&self, c: &str, key: &str) -> Result<Value, StoreError> {
            self.trip()?;
            self.docs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| StoreError::NotFound {
                    collection: c.to_string(),
                    key: key.to_string(),
                })
        }

        async fn delete(&self, _c: &str, key: &str) -> Result<(), StoreError> {
            self.trip()?;
            self.docs.lock().unwrap().remove(key);
            Ok(())
        }

        async fn query(&self, _c: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
            self.trip()?;
            Ok(self
                .docs
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, body)| query.matches(body))
                .map(|(key, body)| Document {
                    key: key.clone(),
                    body: body.clone(),
                })
                .collect())
        }
    }

    fn client(store: Arc<FlakyStore>, retries: u32) -> PoolClient {
        PoolClient::new(store, "servers", Arc::new(ImmediateRetry { max_attempts: 10 }), retries)
    }

    #[test]
    fn test_query_matches_arrays_and_scalars() {
        let doc = json!({"poolId": ["regression", "perf"], "state": "available"});
        assert!(Query::All.matches(&doc));
        assert!(Query::eq("poolId", "perf").matches(&doc));
        assert!(Query::eq("state", "available").matches(&doc));
        assert!(!Query::eq("state", "busy").matches(&doc));
        assert!(Query::any_of("poolId", vec![json!("x"), json!("regression")]).matches(&doc));
        assert!(!Query::eq("missing", "x").matches(&doc));
    }

    #[test]
    fn test_query_wire_form() {
        let q = Query::eq("host", "h1");
        assert_eq!(
            serde_json::to_value(&q).unwrap(),
            json!({"op": "eq", "field": "host", "value": "h1"})
        );
        let back: Query = serde_json::from_value(json!({"op": "all"})).unwrap();
        assert_eq!(back, Query::All);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            ..Default::default()
        });
        let pool = client(store.clone(), 3);
        pool.upsert("10.0.0.1", &json!({"state": "available"}))
            .await
            .unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let store = Arc::new(FlakyStore {
            failures: 5,
            ..Default::default()
        });
        let pool = client(store.clone(), 5);
        let err = pool
            .upsert_with_retries("k", &json!({}), 2)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_takes_caller_retries() {
        let store = Arc::new(FlakyStore {
            failures: 2,
            ..Default::default()
        });
        store
            .docs
            .lock()
            .unwrap()
            .insert("10.0.0.1".into(), json!({"state": "available"}));
        let pool = client(store.clone(), 1);
        assert!(pool.delete("10.0.0.1").await.unwrap_err().is_transient());

        pool.delete_with_retries("10.0.0.1", 3).await.unwrap();
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        assert!(store.docs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let store = Arc::new(FlakyStore::default());
        let pool = client(store.clone(), 5);
        let err = pool.get("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(TaskError::from(err).kind(), crate::error::ErrorKind::Store);
    }

    #[tokio::test]
    async fn test_non_object_body_is_rejected() {
        let pool = client(Arc::new(FlakyStore::default()), 1);
        assert!(matches!(
            pool.upsert("k", &json!([1, 2])).await,
            Err(StoreError::InvalidDocument(_))
        ));
    }
}
