//! 🚚 rlx: the library half of Rowlift.
//!
//! Files go in one end, rows come out the other, and a queue in the middle remembers
//! every job nobody acknowledged yet.
//!
//! ```text
//! upload ─▶ Producer ─▶ BlobStore.write ─▶ JobQueue.send
//!                                              │
//!           DocumentStore.batch_create ◀─ parse ◀─ BlobStore.read ◀─ Consumer ◀─ JobQueue.receive
//!                          │
//!                          └─▶ JobQueue.ack
//! ```
//!
//! [`Pipeline`] wires the configured backends together once, so the producer and the
//! consumer of one process share the same handles. 🦆

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

pub mod app_config;
pub mod backends;
pub mod common;
pub mod consumer;
pub mod metrics;
pub mod parser;
pub mod producer;
pub mod telemetry;

use crate::app_config::AppConfig;
use crate::backends::{BlobStoreBackend, DocumentStoreBackend, JobQueueBackend};
use crate::consumer::Consumer;
use crate::metrics::PipelineMetrics;
use crate::producer::Producer;

pub use crate::common::{JobId, RowRecord, SubmitReceipt, Upload};
pub use crate::consumer::MessageOutcome;
pub use crate::producer::SubmitError;

/// 🏗️ Every backend the config asked for, opened once and shared.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub blob_store: Arc<BlobStoreBackend>,
    pub job_queue: Arc<JobQueueBackend>,
    pub doc_store: Arc<DocumentStoreBackend>,
    pub metrics: Arc<PipelineMetrics>,
    config: AppConfig,
}

impl Pipeline {
    /// 🚀 Open the blob store, the job queue and the document store, in that order.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let blob_store = BlobStoreBackend::from_config(&config.blob_store)
            .await
            .context("💀 could not open the blob store")?;
        let job_queue = JobQueueBackend::from_config(&config.job_queue)
            .await
            .context("💀 could not open the job queue")?;
        let doc_store = DocumentStoreBackend::from_config(&config.doc_store)
            .await
            .context("💀 could not open the document store")?;
        info!("🏗️ pipeline backends ready");

        Ok(Self {
            blob_store: Arc::new(blob_store),
            job_queue: Arc::new(job_queue),
            doc_store: Arc::new(doc_store),
            metrics: Arc::new(PipelineMetrics::new()),
            config,
        })
    }

    pub fn producer(&self) -> Producer<BlobStoreBackend, JobQueueBackend> {
        Producer::new(
            Arc::clone(&self.blob_store),
            Arc::clone(&self.job_queue),
            Arc::clone(&self.metrics),
            self.config.producer.clone(),
        )
    }

    pub fn consumer(&self) -> Consumer<BlobStoreBackend, JobQueueBackend, DocumentStoreBackend> {
        Consumer::new(
            Arc::clone(&self.blob_store),
            Arc::clone(&self.job_queue),
            Arc::clone(&self.doc_store),
            Arc::clone(&self.metrics),
            self.config.consumer.clone(),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
