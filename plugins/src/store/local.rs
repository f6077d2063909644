//! In-process document store, optionally persisted as a JSON snapshot.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use labkeeper_core::api::{Document, DocumentStore, Query, StoreError};

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

pub struct LocalDocumentStore {
    data: RwLock<Collections>,
    snapshot: Option<PathBuf>,
}

impl LocalDocumentStore {
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            snapshot: None,
        }
    }

    /// Load `path` if it exists; every later mutation rewrites it.
    pub async fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read store snapshot {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str::<Collections>(&raw)
                    .with_context(|| format!("Invalid store snapshot {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };
        tracing::info!(path = %path.display(), collections = data.len(), "local store opened");
        Ok(Self {
            data: RwLock::new(data),
            snapshot: Some(path),
        })
    }

    async fn persist(&self, data: &Collections) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let raw = serde_json::to_string_pretty(data)
            .map_err(|e| StoreError::Io(format!("cannot encode snapshot: {e}")))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::Io(format!("{}: {}", path.display(), e)))
    }
}

#[async_trait]
impl DocumentStore for LocalDocumentStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn upsert(&self, collection: &str, key: &str, body: &Value) -> Result<(), StoreError> {
        // Held across the snapshot write so files land in mutation order.
        let mut data = self.data.write().await;
        data.entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), body.clone());
        self.persist(&data).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Value, StoreError> {
        self.data
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            })
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let removed = data
            .get_mut(collection)
            .and_then(|docs| docs.remove(key))
            .is_some();
        if !removed {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                key: key.to_string(),
            });
        }
        self.persist(&data).await
    }

    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, body)| query.matches(body))
                    .map(|(key, body)| Document {
                        key: key.clone(),
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}
