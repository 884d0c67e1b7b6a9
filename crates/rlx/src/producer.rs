//! 📤 The producer: the front desk of rowlift.
//!
//! 🎬 *[a file arrives. it has a header. probably. the producer squints at line one.]*
//!
//! One `submit` per upload, in this order:
//!
//! 1. 🚫 not a POST → 405. no file part → 400.
//! 2. 🔍 read only the header. No header → 400, and nothing is written anywhere.
//! 3. 🪣 write the *whole* upload, header included, to the blob store under a fresh job id.
//! 4. 📊 bump the upload counters.
//! 5. ✉️ enqueue one message: body = job id, metadata = event type + trace context.
//!    If that fails, the blob we just wrote is deleted again (best effort) so it does
//!    not sit there forever with nobody coming for it.
//! 6. 🧾 hand back `{jobId, totalRead, size}`.
//!
//! The producer holds no state of its own. Clones share the same store handles, and
//! any number of submits can run at once.
//!
//! 🦆 The duck was uploaded too. It has no header. It was rejected with a 400.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::backends::{BlobStore, JobQueue};
use crate::common::{DEFAULT_EVENT_TYPE, EVENT_TYPE_KEY, Job, JobId, JobMessage, SubmitReceipt, Upload};
use crate::metrics::PipelineMetrics;
use crate::parser::{ParseError, read_header};
use crate::telemetry;

/// 🔧 Producer knobs.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProducerConfig {
    /// 🏷️ Stamped on every job message as `eventType`.
    pub event_type: String,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
        }
    }
}

/// 💀 Why a submit did not produce a job.
///
/// Client errors (`MethodNotAllowed`, `MissingFile`, `UnreadableHeader`) happen before
/// anything is written. Infrastructure errors (`BlobWrite`, `Enqueue`) mean the job was
/// not submitted and no message exists for it.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("missing file")]
    MissingFile,

    #[error("failed to parse file: {0}")]
    UnreadableHeader(#[source] ParseError),

    #[error("failed to save file: {0:#}")]
    BlobWrite(#[source] anyhow::Error),

    #[error("failed to enqueue job: {0:#}")]
    Enqueue(#[source] anyhow::Error),
}

impl SubmitError {
    /// 🚦 The HTTP-style status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            SubmitError::MethodNotAllowed(_) => 405,
            SubmitError::MissingFile | SubmitError::UnreadableHeader(_) => 400,
            SubmitError::BlobWrite(_) | SubmitError::Enqueue(_) => 500,
        }
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// 🧾 `{"error": "<message>"}`, ready for a response body.
    pub fn error_body(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.to_string() })
    }
}

/// 📤 Turns uploads into durable blobs plus queued job messages.
#[derive(Debug)]
pub struct Producer<B: ?Sized, Q: ?Sized> {
    blob_store: Arc<B>,
    job_queue: Arc<Q>,
    metrics: Arc<PipelineMetrics>,
    config: ProducerConfig,
}

impl<B: ?Sized, Q: ?Sized> Clone for Producer<B, Q> {
    fn clone(&self) -> Self {
        Self {
            blob_store: Arc::clone(&self.blob_store),
            job_queue: Arc::clone(&self.job_queue),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
        }
    }
}

impl<B, Q> Producer<B, Q>
where
    B: BlobStore + ?Sized,
    Q: JobQueue + ?Sized,
{
    pub fn new(
        blob_store: Arc<B>,
        job_queue: Arc<Q>,
        metrics: Arc<PipelineMetrics>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            blob_store,
            job_queue,
            metrics,
            config,
        }
    }

    /// 📤 Accept one upload. See the module docs for the exact order of operations.
    pub async fn submit(&self, upload: Upload) -> Result<SubmitReceipt, SubmitError> {
        let result = self.try_submit(upload).await;
        if let Err(ref err) = result {
            self.metrics.record_submit_rejected();
            if err.is_client_error() {
                warn!(status = err.status_code(), error = %err, "🚫 upload rejected");
            } else {
                error!(status = err.status_code(), error = %err, "💀 upload failed");
            }
        }
        result
    }

    async fn try_submit(&self, upload: Upload) -> Result<SubmitReceipt, SubmitError> {
        if upload.method != "POST" {
            return Err(SubmitError::MethodNotAllowed(upload.method));
        }
        let Some(bytes) = upload.file else {
            return Err(SubmitError::MissingFile);
        };
        info!(
            file_name = upload.file_name.as_deref().unwrap_or("<unnamed>"),
            size = upload.declared_size.unwrap_or(bytes.len() as u64),
            "📨 file received"
        );

        // -- 🔍 header only. the bytes themselves are never consumed, so no rewind needed.
        let header = read_header(bytes.as_slice()).map_err(SubmitError::UnreadableHeader)?;
        debug!(columns = header.len(), "🔍 header looks sane");

        let job_id = JobId::new();
        let cx = telemetry::start_trace();
        let trace_id = telemetry::trace_id(&cx).unwrap_or_default();

        let total_read = self
            .blob_store
            .write(&job_id.to_string(), &bytes)
            .await
            .map_err(SubmitError::BlobWrite)?;
        let job = Job::new(job_id, total_read);
        self.metrics.record_upload(total_read);
        debug!(job_id = %job.id, blob_key = %job.blob_key, bytes = job.size, "🪣 upload stored");

        let mut metadata = HashMap::new();
        metadata.insert(EVENT_TYPE_KEY.to_string(), self.config.event_type.clone());
        telemetry::inject(&cx, &mut metadata);

        if let Err(err) = self
            .job_queue
            .send(JobMessage::new(job.id.to_string(), metadata))
            .await
        {
            // -- 🧹 no message will ever point at this blob. take it back.
            if let Err(cleanup) = self.blob_store.delete(&job.blob_key).await {
                warn!(
                    job_id = %job.id,
                    orphan_key = %job.blob_key,
                    error = %format!("{cleanup:#}"),
                    "🧟 could not delete blob after failed enqueue, it is an orphan now"
                );
            }
            return Err(SubmitError::Enqueue(err));
        }

        info!(
            job_id = %job.id,
            trace_id = %trace_id,
            bytes = job.size,
            submitted_at = %job.submitted_at,
            "✉️ job submitted"
        );
        Ok(SubmitReceipt {
            job_id: job.id,
            total_read,
            size: upload.declared_size.unwrap_or(total_read),
        })
    }

    /// 🩺 Healthy when the blob store answers its liveness probe.
    pub async fn check_health(&self) -> anyhow::Result<()> {
        if self.blob_store.is_accessible().await {
            Ok(())
        } else {
            error!("💀 blob store is not accessible");
            anyhow::bail!("💀 blob store is not accessible")
        }
    }
}
