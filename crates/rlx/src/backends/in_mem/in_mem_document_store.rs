use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::DocumentStore;
use crate::common::RowRecord;

/// 🗄️ A document store that never forgets, as long as the process doesn't exit.
///
/// Keeps batch boundaries, so tests can assert "this job landed as one batch" and not
/// just "these rows exist somewhere".
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    batches: Arc<Mutex<Vec<Vec<RowRecord>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 📦 Every committed batch, in commit order.
    pub async fn batches(&self) -> Vec<Vec<RowRecord>> {
        self.batches.lock().await.clone()
    }

    /// 📄 Every committed record, flattened.
    pub async fn records(&self) -> Vec<RowRecord> {
        self.batches.lock().await.iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn batch_create(&self, records: &[RowRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        trace!(records = records.len(), "🗄️ committing batch to RAM");
        // -- 🔒 one push under one lock: the whole batch shows up at once, or not at all
        self.batches.lock().await.push(records.to_vec());
        Ok(())
    }
}
