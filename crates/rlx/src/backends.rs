//! 🔌 Backends: where the real I/O happens.
//!
//! Three external systems, three capability traits, zero opinions about vendors:
//!
//! - 🪣 [`BlobStore`]: durable bytes by key. The raw upload lives here.
//! - ✉️ [`JobQueue`]: at-least-once delivery with explicit acknowledgment.
//! - 🗄️ [`DocumentStore`]: schemaless records, committed in batches.
//!
//! Each trait has concrete impls (in-memory for tests and local runs, file-backed for
//! single-box deployments, Elasticsearch for documents) and a backend enum that
//! dispatches to them, so the producer and consumer never need to know whether
//! they are talking to RAM, a disk, or a cluster having a rough morning.
//!
//! ⚠️ All handles are shared across the whole process (`&self`, `Send + Sync`). The
//! producer serves requests in parallel against the same handles.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;

use crate::common::{Delivery, JobMessage, RowRecord};

pub mod elasticsearch;
pub mod file;
pub mod in_mem;

// 🎯 Re-exports, so callers can say `backends::InMemoryJobQueue` and move on with their lives.
pub use elasticsearch::{ElasticsearchDocumentStore, ElasticsearchDocumentStoreConfig};
pub use file::{
    DirectoryBlobStore, DirectoryBlobStoreConfig, NdjsonDocumentStore, NdjsonDocumentStoreConfig,
    SpoolJobQueue, SpoolJobQueueConfig,
};
pub use in_mem::{
    InMemoryBlobStore, InMemoryDocumentStore, InMemoryJobQueue, InMemoryJobQueueConfig,
};

// ===== Blob Store =====

/// 🪣 Durable byte storage, addressed by key.
///
/// # Contract
/// - `write` stores the bytes under `key`, replacing anything already there, and returns
///   how many bytes were written.
/// - `read` returns the full content, or an error when the key is missing or unreadable.
/// - `delete` removes the key. Deleting a missing key is not an error.
/// - `is_accessible` is a liveness probe. It never errors, it just says no.
#[async_trait]
pub trait BlobStore: std::fmt::Debug + Send + Sync {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<u64>;
    async fn read(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn is_accessible(&self) -> bool;
}

// ===== Job Queue =====

/// ✉️ At-least-once message delivery with explicit acknowledgment.
///
/// # Contract
/// - `send` enqueues one message. When it returns `Ok`, the message is the queue's problem.
/// - `receive` waits for the next delivery. `Ok(None)` means the queue is closed and
///   drained; nothing more will ever arrive.
/// - `ack` removes the delivered message for good. A message that is never acked comes
///   back after the queue's visibility timeout, with `attempt` bumped.
/// - Acking a delivery that already timed out and went back to the queue is a no-op.
#[async_trait]
pub trait JobQueue: std::fmt::Debug + Send + Sync {
    async fn send(&self, message: JobMessage) -> Result<()>;
    async fn receive(&self) -> Result<Option<Delivery>>;
    async fn ack(&self, delivery: &Delivery) -> Result<()>;
}

// ===== Document Store =====

/// 🗄️ Schemaless record storage with batched insert.
///
/// # Contract
/// - `batch_create` commits every record or reports failure. Callers treat a failure as
///   "nothing from this batch is visible" and rely on the backend to make that true.
/// - An empty batch is a successful no-op.
#[async_trait]
pub trait DocumentStore: std::fmt::Debug + Send + Sync {
    async fn batch_create(&self, records: &[RowRecord]) -> Result<()>;
}

// ===== Configs =====

/// 🪣 Which blob store to open. Externally tagged, so TOML reads `[blob_store.Directory]`.
#[derive(Debug, Deserialize, Clone)]
pub enum BlobStoreConfig {
    InMemory,
    Directory(DirectoryBlobStoreConfig),
}

impl Default for BlobStoreConfig {
    // -- 📂 `./tmp/doc-files`: works on every laptop, scales to exactly one of them
    fn default() -> Self {
        BlobStoreConfig::Directory(DirectoryBlobStoreConfig::default())
    }
}

/// ✉️ Which job queue to open.
#[derive(Debug, Deserialize, Clone)]
pub enum JobQueueConfig {
    InMemory(InMemoryJobQueueConfig),
    Spool(SpoolJobQueueConfig),
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        JobQueueConfig::InMemory(InMemoryJobQueueConfig::default())
    }
}

/// 🗄️ Which document store to open.
#[derive(Debug, Deserialize, Clone, Default)]
pub enum DocumentStoreConfig {
    #[default]
    InMemory,
    Ndjson(NdjsonDocumentStoreConfig),
    Elasticsearch(ElasticsearchDocumentStoreConfig),
}

// ===== Backend enums =====

/// 🎭 The many faces of a blob store. Dispatches to the concrete impl.
#[derive(Debug)]
pub enum BlobStoreBackend {
    InMemory(InMemoryBlobStore),
    Directory(DirectoryBlobStore),
}

impl BlobStoreBackend {
    /// 🚀 Open whatever the config asks for.
    pub async fn from_config(config: &BlobStoreConfig) -> Result<Self> {
        Ok(match config {
            BlobStoreConfig::InMemory => BlobStoreBackend::InMemory(InMemoryBlobStore::new()),
            BlobStoreConfig::Directory(c) => {
                BlobStoreBackend::Directory(DirectoryBlobStore::new(c.clone()).await?)
            }
        })
    }
}

#[async_trait]
impl BlobStore for BlobStoreBackend {
    async fn write(&self, key: &str, bytes: &[u8]) -> Result<u64> {
        match self {
            BlobStoreBackend::InMemory(b) => b.write(key, bytes).await,
            BlobStoreBackend::Directory(b) => b.write(key, bytes).await,
        }
    }

    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        match self {
            BlobStoreBackend::InMemory(b) => b.read(key).await,
            BlobStoreBackend::Directory(b) => b.read(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            BlobStoreBackend::InMemory(b) => b.delete(key).await,
            BlobStoreBackend::Directory(b) => b.delete(key).await,
        }
    }

    async fn is_accessible(&self) -> bool {
        match self {
            BlobStoreBackend::InMemory(b) => b.is_accessible().await,
            BlobStoreBackend::Directory(b) => b.is_accessible().await,
        }
    }
}

/// 🎭 The many faces of a job queue.
#[derive(Debug)]
pub enum JobQueueBackend {
    InMemory(InMemoryJobQueue),
    Spool(SpoolJobQueue),
}

impl JobQueueBackend {
    pub async fn from_config(config: &JobQueueConfig) -> Result<Self> {
        Ok(match config {
            JobQueueConfig::InMemory(c) => JobQueueBackend::InMemory(InMemoryJobQueue::new(c)),
            JobQueueConfig::Spool(c) => JobQueueBackend::Spool(SpoolJobQueue::new(c.clone()).await?),
        })
    }
}

#[async_trait]
impl JobQueue for JobQueueBackend {
    async fn send(&self, message: JobMessage) -> Result<()> {
        match self {
            JobQueueBackend::InMemory(q) => q.send(message).await,
            JobQueueBackend::Spool(q) => q.send(message).await,
        }
    }

    async fn receive(&self) -> Result<Option<Delivery>> {
        match self {
            JobQueueBackend::InMemory(q) => q.receive().await,
            JobQueueBackend::Spool(q) => q.receive().await,
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        match self {
            JobQueueBackend::InMemory(q) => q.ack(delivery).await,
            JobQueueBackend::Spool(q) => q.ack(delivery).await,
        }
    }
}

/// 🎭 The many faces of a document store.
#[derive(Debug)]
pub enum DocumentStoreBackend {
    InMemory(InMemoryDocumentStore),
    Ndjson(NdjsonDocumentStore),
    Elasticsearch(ElasticsearchDocumentStore),
}

impl DocumentStoreBackend {
    pub async fn from_config(config: &DocumentStoreConfig) -> Result<Self> {
        Ok(match config {
            DocumentStoreConfig::InMemory => {
                DocumentStoreBackend::InMemory(InMemoryDocumentStore::new())
            }
            DocumentStoreConfig::Ndjson(c) => {
                DocumentStoreBackend::Ndjson(NdjsonDocumentStore::new(c.clone()).await?)
            }
            DocumentStoreConfig::Elasticsearch(c) => {
                DocumentStoreBackend::Elasticsearch(ElasticsearchDocumentStore::new(c.clone()).await?)
            }
        })
    }
}

#[async_trait]
impl DocumentStore for DocumentStoreBackend {
    async fn batch_create(&self, records: &[RowRecord]) -> Result<()> {
        match self {
            DocumentStoreBackend::InMemory(d) => d.batch_create(records).await,
            DocumentStoreBackend::Ndjson(d) => d.batch_create(records).await,
            DocumentStoreBackend::Elasticsearch(d) => d.batch_create(records).await,
        }
    }
}
