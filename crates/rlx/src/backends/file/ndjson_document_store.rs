use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, trace, warn};

use crate::backends::DocumentStore;
use crate::common::RowRecord;

#[derive(Debug, Deserialize, Clone)]
pub struct NdjsonDocumentStoreConfig {
    /// 📄 Output file. Appended to, never truncated.
    pub file_name: String,
}

/// 🗄️ A document store that is one ever-growing NDJSON file.
///
/// One JSON object per line. A batch is serialized up front and written with a single
/// `write_all`, under a lock, so batches from concurrent consumers never interleave.
/// A write or flush that fails part-way is cut back off the file, so a failed batch
/// leaves nothing behind for the redelivery to duplicate.
#[derive(Debug)]
pub struct NdjsonDocumentStore {
    file: Mutex<File>,
    config: NdjsonDocumentStoreConfig,
}

impl NdjsonDocumentStore {
    pub async fn new(config: NdjsonDocumentStoreConfig) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(&config.file_name)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("💀 could not create the folder for '{}'", config.file_name)
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.file_name)
            .await
            .with_context(|| {
                format!(
                    "💀 Tried to open '{}' for appending. The filesystem said no. It didn't say why. It never does.",
                    config.file_name
                )
            })?;
        debug!(file = %config.file_name, "🗄️ NDJSON document store ready");
        Ok(Self {
            file: Mutex::new(file),
            config,
        })
    }
}

#[async_trait]
impl DocumentStore for NdjsonDocumentStore {
    async fn batch_create(&self, records: &[RowRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut payload = Vec::with_capacity(records.len() * 64);
        for record in records {
            serde_json::to_writer(&mut payload, record)?;
            payload.push(b'\n');
        }

        let mut file = self.file.lock().await;
        let previous_len = file
            .metadata()
            .await
            .with_context(|| format!("💀 failed to stat '{}' before appending", self.config.file_name))?
            .len();
        if let Err(err) = append_batch(&mut file, &payload).await {
            warn!(
                file = %self.config.file_name,
                error = %err,
                previous_len,
                "✂️ batch append failed, cutting the file back"
            );
            if let Err(rollback_err) = truncate_to(&mut file, previous_len).await {
                error!(
                    file = %self.config.file_name,
                    error = %rollback_err,
                    "💀 could not cut the torn batch off, the file now ends mid-batch"
                );
            }
            return Err(err).with_context(|| {
                format!("💀 failed to append batch to '{}'", self.config.file_name)
            });
        }
        trace!(records = records.len(), bytes = payload.len(), "🗄️ batch appended");
        Ok(())
    }
}

async fn append_batch(file: &mut File, payload: &[u8]) -> std::io::Result<()> {
    file.write_all(payload).await?;
    file.flush().await
}

// -- ✂️ append mode writes at the end regardless of position, so a shorter file is all it takes
async fn truncate_to(file: &mut File, len: u64) -> std::io::Result<()> {
    file.set_len(len).await?;
    file.sync_data().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_each_row_gets_its_own_line() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("docs.ndjson");
        let store = NdjsonDocumentStore::new(NdjsonDocumentStoreConfig {
            file_name: path.display().to_string(),
        })
        .await?;

        store
            .batch_create(&[
                RowRecord::from_iter([("jobId", "j1"), ("name", "Alice")]),
                RowRecord::from_iter([("jobId", "j1"), ("name", "Bob")]),
            ])
            .await?;
        store.batch_create(&[]).await?;
        store
            .batch_create(&[RowRecord::from_iter([("jobId", "j2"), ("name", "Carol")])])
            .await?;

        let content = tokio::fs::read_to_string(&path).await?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                r#"{"jobId":"j1","name":"Alice"}"#,
                r#"{"jobId":"j1","name":"Bob"}"#,
                r#"{"jobId":"j2","name":"Carol"}"#,
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_reopening_appends_instead_of_clobbering() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file_name = dir.path().join("docs.ndjson").display().to_string();
        let config = NdjsonDocumentStoreConfig { file_name: file_name.clone() };

        NdjsonDocumentStore::new(config.clone())
            .await?
            .batch_create(&[RowRecord::from_iter([("a", "1")])])
            .await?;
        NdjsonDocumentStore::new(config)
            .await?
            .batch_create(&[RowRecord::from_iter([("a", "2")])])
            .await?;

        let content = tokio::fs::read_to_string(&file_name).await?;
        assert_eq!(content.lines().count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_torn_batch_gets_cut_back_off() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("docs.ndjson");
        let store = NdjsonDocumentStore::new(NdjsonDocumentStoreConfig {
            file_name: path.display().to_string(),
        })
        .await?;
        store
            .batch_create(&[RowRecord::from_iter([("jobId", "j1"), ("name", "Alice")])])
            .await?;

        // -- 💥 half a batch made it to disk before the write gave up
        {
            let mut file = store.file.lock().await;
            let before = file.metadata().await?.len();
            append_batch(&mut file, b"{\"jobId\":\"j2\",\"name\":\"Bob\"}\n{\"jobId\":\"j2\",\"na").await?;
            truncate_to(&mut file, before).await?;
        }

        store
            .batch_create(&[RowRecord::from_iter([("jobId", "j2"), ("name", "Bob")])])
            .await?;

        let content = tokio::fs::read_to_string(&path).await?;
        assert_eq!(
            content,
            "{\"jobId\":\"j1\",\"name\":\"Alice\"}\n{\"jobId\":\"j2\",\"name\":\"Bob\"}\n"
        );
        Ok(())
    }
}
