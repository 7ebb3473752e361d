//! In-memory [`Storage`] backend for tests and in-process service
//! registries.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::{Error, Kind, Result};

use super::Storage;

const OP_GET: &str = "storage.get";

/// A [`Storage`] keeping every blob in a sorted in-memory map.
#[derive(Default)]
pub struct InMemoryStorage {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::new(OP_GET, Kind::NotExist).path(key))
    }

    async fn put(&self, key: &str, contents: &[u8]) -> Result<()> {
        self.data.write().await.insert(key.to_string(), contents.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn list_dir(&self, dir: &str) -> Result<Vec<String>> {
        self.list_prefix(dir, 1).await
    }

    async fn list_prefix(&self, prefix: &str, depth: usize) -> Result<Vec<String>> {
        let data = self.data.read().await;
        let keys = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| {
                let rest = &k[prefix.len()..];
                !rest.is_empty() && rest.split('/').count() <= depth
            })
            .map(|(k, _)| k.clone())
            .collect();
        Ok(keys)
    }
}
