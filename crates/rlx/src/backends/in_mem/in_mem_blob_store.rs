use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::backends::BlobStore;

/// 🪣 A bucket that is secretly a `HashMap`. Don't tell the cloud provider.
///
/// Clones share the same map, so a test can keep one handle and give the other away.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🔍 Every key currently stored. Sorted, because tests like determinism.
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        trace!(key, bytes = bytes.len(), "🪣 stashing blob in RAM");
        self.blobs
            .write()
            .await
            .insert(key.to_string(), bytes.to_vec());
        Ok(bytes.len() as u64)
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .with_context(|| format!("💀 blob '{key}' is not in the in-memory store. It was never written, or it was deleted, or it lived in a previous process."))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().await.remove(key);
        Ok(())
    }

    async fn is_accessible(&self) -> bool {
        // -- ✅ RAM is always home
        true
    }
}
