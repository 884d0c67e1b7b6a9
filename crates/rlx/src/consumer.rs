//! 📥 The consumer: where queued job ids turn back into rows.
//!
//! 🎬 COLD OPEN: INT. WORKER PROCESS, SOME TIME LATER
//!
//! A message arrives. It contains a UUID and nothing else of substance. The consumer
//! fetches the blob it names, reads the header, labels every row, commits the lot as
//! one batch, and only then says "got it" to the queue. If anything goes wrong before
//! that last step, the consumer says nothing at all, and the queue will ask again later.
//!
//! Per message, the stages run in order:
//!
//! `Received → Downloading → Parsing → Committing → Acknowledged`
//!
//! and every message ends as one [`MessageOutcome`]:
//!
//! - ✅ `Acknowledged`: batch committed, message acked.
//! - 🔄 `Deferred`: the infrastructure let us down (blob read, commit, ack). Not acked;
//!   redelivery will probably fix it.
//! - 💀 `Failed`: the job itself is bad (unparsable id, no header, row policy says no).
//!   Not acked either. Redelivery will not fix it, but dead-lettering is the queue's call.
//!
//! [`Consumer::run`] is the outer driver: receive, process, log, repeat. It never stops
//! because one message went wrong.
//!
//! 🦆 The duck was acknowledged. Eventually.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::backends::{BlobStore, DocumentStore, JobQueue};
use crate::common::{Delivery, JobId, RowRecord};
use crate::metrics::PipelineMetrics;
use crate::parser::RowReader;
use crate::telemetry;

/// ⚖️ What to do with a job that contains bad rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// 🩹 Drop bad rows, count them, commit the rest.
    #[default]
    Skip,
    /// 🚫 One bad row fails the whole job. Nothing is committed.
    RejectJob,
}

/// 🔧 Consumer knobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub row_error_policy: RowErrorPolicy,
    /// 😴 Stop `run` after this long without a message. `None` waits forever.
    pub idle_shutdown_ms: Option<u64>,
    /// ⏸️ Pause after a failed `receive`, so a dead queue doesn't turn into a hot loop.
    pub receive_error_pause_ms: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            row_error_policy: RowErrorPolicy::default(),
            idle_shutdown_ms: None,
            receive_error_pause_ms: 1_000,
        }
    }
}

/// 🚦 Where a message is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Downloading,
    Parsing,
    Committing,
    Acknowledged,
    Failed,
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobStage::Received => "received",
            JobStage::Downloading => "downloading",
            JobStage::Parsing => "parsing",
            JobStage::Committing => "committing",
            JobStage::Acknowledged => "acknowledged",
            JobStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// 🏁 How one message ended. `stage` is the stage that went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Acknowledged {
        job_id: JobId,
        committed: usize,
        rejected: u64,
    },
    Deferred {
        job_id: Option<JobId>,
        stage: JobStage,
        reason: String,
    },
    Failed {
        job_id: Option<JobId>,
        stage: JobStage,
        reason: String,
    },
}

impl MessageOutcome {
    pub fn is_acknowledged(&self) -> bool {
        matches!(self, MessageOutcome::Acknowledged { .. })
    }

    pub fn job_id(&self) -> Option<JobId> {
        match self {
            MessageOutcome::Acknowledged { job_id, .. } => Some(*job_id),
            MessageOutcome::Deferred { job_id, .. } | MessageOutcome::Failed { job_id, .. } => *job_id,
        }
    }
}

/// 🛑 Why [`Consumer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    QueueClosed,
    Idle,
}

/// 📋 Tally of one [`Consumer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub acknowledged: u64,
    pub deferred: u64,
    pub failed: u64,
    pub receive_errors: u64,
    pub stopped_by: StopReason,
}

struct ParsedJob {
    records: Vec<RowRecord>,
    rejected: u64,
}

/// 📥 Pulls job messages, turns blobs into rows, commits them, acks.
#[derive(Debug)]
pub struct Consumer<B: ?Sized, Q: ?Sized, D: ?Sized> {
    blob_store: Arc<B>,
    job_queue: Arc<Q>,
    document_store: Arc<D>,
    metrics: Arc<PipelineMetrics>,
    config: ConsumerConfig,
}

impl<B: ?Sized, Q: ?Sized, D: ?Sized> Clone for Consumer<B, Q, D> {
    fn clone(&self) -> Self {
        Self {
            blob_store: Arc::clone(&self.blob_store),
            job_queue: Arc::clone(&self.job_queue),
            document_store: Arc::clone(&self.document_store),
            metrics: Arc::clone(&self.metrics),
            config: self.config.clone(),
        }
    }
}

impl<B, Q, D> Consumer<B, Q, D>
where
    B: BlobStore + ?Sized,
    Q: JobQueue + ?Sized,
    D: DocumentStore + ?Sized,
{
    pub fn new(
        blob_store: Arc<B>,
        job_queue: Arc<Q>,
        document_store: Arc<D>,
        metrics: Arc<PipelineMetrics>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            blob_store,
            job_queue,
            document_store,
            metrics,
            config,
        }
    }

    /// 🔁 Receive and process messages one at a time until `shutdown` resolves, the
    /// queue closes, or the idle timeout passes.
    ///
    /// Shutdown is only observed while waiting for the next message. A message that is
    /// already being processed always runs to its outcome.
    pub async fn run<F>(&self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let idle = self.config.idle_shutdown_ms.map(Duration::from_millis);
        let mut summary = RunSummary {
            acknowledged: 0,
            deferred: 0,
            failed: 0,
            receive_errors: 0,
            stopped_by: StopReason::QueueClosed,
        };
        info!(policy = ?self.config.row_error_policy, "🚀 consumer loop started");

        loop {
            let next = async {
                match idle {
                    Some(limit) => tokio::time::timeout(limit, self.job_queue.receive()).await.ok(),
                    None => Some(self.job_queue.receive().await),
                }
            };
            let received = tokio::select! {
                _ = &mut shutdown => {
                    summary.stopped_by = StopReason::Shutdown;
                    break;
                }
                received = next => received,
            };

            match received {
                None => {
                    summary.stopped_by = StopReason::Idle;
                    break;
                }
                Some(Ok(None)) => {
                    summary.stopped_by = StopReason::QueueClosed;
                    break;
                }
                Some(Err(err)) => {
                    summary.receive_errors += 1;
                    error!(error = %format!("{err:#}"), "💀 failed to receive message");
                    tokio::time::sleep(Duration::from_millis(self.config.receive_error_pause_ms)).await;
                }
                Some(Ok(Some(delivery))) => match self.process(&delivery).await {
                    MessageOutcome::Acknowledged { .. } => summary.acknowledged += 1,
                    MessageOutcome::Deferred { .. } => summary.deferred += 1,
                    MessageOutcome::Failed { .. } => summary.failed += 1,
                },
            }
        }

        info!(
            acknowledged = summary.acknowledged,
            deferred = summary.deferred,
            failed = summary.failed,
            stopped_by = ?summary.stopped_by,
            "🏁 consumer loop stopped"
        );
        summary
    }

    /// ⚙️ Run one delivery through every stage. Acks only after the batch commit succeeds.
    pub async fn process(&self, delivery: &Delivery) -> MessageOutcome {
        // -- 📥 Received
        let cx = telemetry::child_of(&telemetry::extract(&delivery.message.metadata));
        let trace_id = telemetry::trace_id(&cx).unwrap_or_default();
        info!(
            body = %delivery.message.body,
            event_type = delivery.message.event_type().unwrap_or("<none>"),
            attempt = delivery.attempt,
            trace_id = %trace_id,
            "📬 received message"
        );
        let job_id: JobId = match delivery.message.body.parse() {
            Ok(id) => id,
            Err(err) => {
                return self.failed(None, JobStage::Received, format!("message body is not a job id: {err}"));
            }
        };

        // -- 🪣 Downloading
        let bytes = match self.blob_store.read(&job_id.to_string()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                return self.deferred(job_id, JobStage::Downloading, format!("failed to read file: {err:#}"));
            }
        };
        debug!(job_id = %job_id, bytes = bytes.len(), "🪣 blob downloaded");

        // -- 📑 Parsing
        let parsed = match self.parse(&job_id, &bytes) {
            Ok(parsed) => parsed,
            Err(reason) => return self.failed(Some(job_id), JobStage::Parsing, reason),
        };
        self.metrics.record_file_processed();

        // -- 🗄️ Committing
        if let Err(err) = self.document_store.batch_create(&parsed.records).await {
            return self.deferred(job_id, JobStage::Committing, format!("failed to save records: {err:#}"));
        }
        debug!(job_id = %job_id, records = parsed.records.len(), "🗄️ batch committed");

        // -- ✅ Acknowledged
        if let Err(err) = self.job_queue.ack(delivery).await {
            return self.deferred(job_id, JobStage::Acknowledged, format!("failed to ack message: {err:#}"));
        }
        self.metrics.record_acknowledged();
        info!(
            job_id = %job_id,
            committed = parsed.records.len(),
            rejected = parsed.rejected,
            trace_id = %trace_id,
            "✅ job acknowledged"
        );
        MessageOutcome::Acknowledged {
            job_id,
            committed: parsed.records.len(),
            rejected: parsed.rejected,
        }
    }

    fn parse(&self, job_id: &JobId, bytes: &[u8]) -> Result<ParsedJob, String> {
        let mut reader = RowReader::new(bytes).map_err(|e| format!("failed to read header: {e}"))?;
        let mut records = Vec::new();

        for item in reader.by_ref() {
            match item {
                Ok(mut record) => {
                    record.tag_job(job_id);
                    records.push(record);
                }
                Err(row_error) => {
                    self.metrics.record_parse_errors(1);
                    match self.config.row_error_policy {
                        RowErrorPolicy::Skip => {
                            warn!(job_id = %job_id, error = %row_error, "⚠️ skipping bad row");
                        }
                        RowErrorPolicy::RejectJob => {
                            return Err(format!("bad row rejects the job: {row_error}"));
                        }
                    }
                }
            }
        }
        self.metrics.record_lines_processed(records.len() as u64);
        Ok(ParsedJob {
            records,
            rejected: reader.rows_rejected(),
        })
    }

    fn deferred(&self, job_id: JobId, stage: JobStage, reason: String) -> MessageOutcome {
        self.metrics.record_deferred();
        warn!(job_id = %job_id, stage = %stage, reason = %reason, "🔄 job deferred, message left for redelivery");
        MessageOutcome::Deferred {
            job_id: Some(job_id),
            stage,
            reason,
        }
    }

    fn failed(&self, job_id: Option<JobId>, stage: JobStage, reason: String) -> MessageOutcome {
        self.metrics.record_failed();
        error!(
            job_id = %job_id.map(|id| id.to_string()).unwrap_or_default(),
            stage = %stage,
            reason = %reason,
            "💀 job failed, message not acknowledged"
        );
        MessageOutcome::Failed { job_id, stage, reason }
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

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::{Result, bail};
    use async_trait::async_trait;

    use super::*;
    use crate::backends::{
        InMemoryBlobStore, InMemoryDocumentStore, InMemoryJobQueue, InMemoryJobQueueConfig,
    };
    use crate::common::{JOB_ID_FIELD, JobMessage};

    /// 🗄️ Fails the first `failures` commits, then behaves.
    #[derive(Debug)]
    struct FlakyDocumentStore {
        failures: AtomicU32,
        inner: InMemoryDocumentStore,
    }

    #[async_trait]
    impl DocumentStore for FlakyDocumentStore {
        async fn batch_create(&self, records: &[RowRecord]) -> Result<()> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                bail!("💀 cluster is red");
            }
            self.inner.batch_create(records).await
        }
    }

    struct Fixture {
        blobs: Arc<InMemoryBlobStore>,
        queue: Arc<InMemoryJobQueue>,
        docs: InMemoryDocumentStore,
        metrics: Arc<PipelineMetrics>,
        consumer: Consumer<InMemoryBlobStore, InMemoryJobQueue, FlakyDocumentStore>,
    }

    fn fixture(commit_failures: u32, config: ConsumerConfig) -> Fixture {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let queue = Arc::new(InMemoryJobQueue::new(&InMemoryJobQueueConfig {
            visibility_timeout_ms: 60_000,
            capacity: 16,
        }));
        let docs = InMemoryDocumentStore::new();
        let metrics = Arc::new(PipelineMetrics::new());
        let consumer = Consumer::new(
            Arc::clone(&blobs),
            Arc::clone(&queue),
            Arc::new(FlakyDocumentStore {
                failures: AtomicU32::new(commit_failures),
                inner: docs.clone(),
            }),
            Arc::clone(&metrics),
            config,
        );
        Fixture {
            blobs,
            queue,
            docs,
            metrics,
            consumer,
        }
    }

    async fn stage_job(f: &Fixture, content: &str) -> Result<(JobId, Delivery)> {
        let job_id = JobId::new();
        f.blobs.write(&job_id.to_string(), content.as_bytes()).await?;
        f.queue.send(JobMessage::new(job_id.to_string(), HashMap::new())).await?;
        let delivery = f.queue.receive().await?.expect("💀 message should be deliverable");
        Ok((job_id, delivery))
    }

    #[tokio::test]
    async fn the_one_where_alice_and_bob_make_it_to_the_document_store() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let (job_id, delivery) = stage_job(&f, "name,age\nAlice,30\nBob,notanumber\n").await?;

        let outcome = f.consumer.process(&delivery).await;

        assert_eq!(
            outcome,
            MessageOutcome::Acknowledged {
                job_id,
                committed: 2,
                rejected: 0
            }
        );
        let batches = f.docs.batches().await;
        assert_eq!(batches.len(), 1, "💀 one job, one batch");
        let records = &batches[0];
        assert_eq!(records[0].keys().collect::<Vec<_>>(), vec![JOB_ID_FIELD, "name", "age"]);
        assert_eq!(records[0].get(JOB_ID_FIELD), Some(job_id.to_string().as_str()));
        assert_eq!(records[0].get("name"), Some("Alice"));
        assert_eq!(records[1].get("age"), Some("notanumber"));
        assert_eq!(f.queue.in_flight(), 0);
        assert_eq!(f.metrics.snapshot().lines_processed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_commit_fails_and_nobody_acks() -> Result<()> {
        let f = fixture(1, ConsumerConfig::default());
        let (job_id, delivery) = stage_job(&f, "name\nAlice\n").await?;

        let outcome = f.consumer.process(&delivery).await;

        assert!(matches!(
            outcome,
            MessageOutcome::Deferred { job_id: Some(id), stage: JobStage::Committing, .. } if id == job_id
        ));
        assert_eq!(f.queue.in_flight(), 1, "💀 message must stay unacknowledged");
        assert!(f.docs.records().await.is_empty());

        // -- 🔄 same delivery again, cluster recovered
        let outcome = f.consumer.process(&delivery).await;
        assert!(outcome.is_acknowledged());
        assert_eq!(f.queue.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_blob_went_missing() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let job_id = JobId::new();
        f.queue.send(JobMessage::new(job_id.to_string(), HashMap::new())).await?;
        let delivery = f.queue.receive().await?.expect("💀 message should be deliverable");

        let outcome = f.consumer.process(&delivery).await;

        assert!(matches!(outcome, MessageOutcome::Deferred { stage: JobStage::Downloading, .. }));
        assert_eq!(outcome.job_id(), Some(job_id));
        assert_eq!(f.queue.in_flight(), 1);
        assert_eq!(f.metrics.snapshot().jobs_deferred, 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_header_alone_is_still_a_job_well_done() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let (job_id, delivery) = stage_job(&f, "name,age\n").await?;

        let outcome = f.consumer.process(&delivery).await;

        assert_eq!(
            outcome,
            MessageOutcome::Acknowledged {
                job_id,
                committed: 0,
                rejected: 0
            }
        );
        assert!(f.docs.records().await.is_empty());
        assert_eq!(f.queue.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_bad_rows_are_skipped_by_default() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let (_, delivery) = stage_job(&f, "a,b\n1,2\n3\n4,5,6\n7,8\n").await?;

        let outcome = f.consumer.process(&delivery).await;

        assert!(matches!(
            outcome,
            MessageOutcome::Acknowledged { committed: 2, rejected: 2, .. }
        ));
        let records = f.docs.records().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.len() == 3));
        assert_eq!(f.metrics.snapshot().parse_errors, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_one_bad_row_sinks_the_whole_job_when_asked_to() -> Result<()> {
        let f = fixture(
            0,
            ConsumerConfig {
                row_error_policy: RowErrorPolicy::RejectJob,
                ..ConsumerConfig::default()
            },
        );
        let (_, delivery) = stage_job(&f, "a,b\n1,2\n3\n").await?;

        let outcome = f.consumer.process(&delivery).await;

        assert!(matches!(outcome, MessageOutcome::Failed { stage: JobStage::Parsing, .. }));
        assert!(f.docs.records().await.is_empty());
        assert_eq!(f.queue.in_flight(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_empty_blob_and_a_garbage_body_both_fail() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let (_, delivery) = stage_job(&f, "").await?;
        let outcome = f.consumer.process(&delivery).await;
        assert!(matches!(outcome, MessageOutcome::Failed { stage: JobStage::Parsing, .. }));

        f.queue.send(JobMessage::new("not-a-uuid", HashMap::new())).await?;
        let garbage = f.queue.receive().await?.expect("💀 message should be deliverable");
        let outcome = f.consumer.process(&garbage).await;
        assert!(matches!(
            outcome,
            MessageOutcome::Failed { job_id: None, stage: JobStage::Received, .. }
        ));
        assert_eq!(f.metrics.snapshot().jobs_failed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_loop_shrugs_off_a_bad_message_and_keeps_going() -> Result<()> {
        let f = fixture(0, ConsumerConfig::default());
        let good = JobId::new();
        f.blobs.write(&good.to_string(), b"name\nAlice\n").await?;
        f.queue.send(JobMessage::new(JobId::new().to_string(), HashMap::new())).await?;
        f.queue.send(JobMessage::new(good.to_string(), HashMap::new())).await?;
        f.queue.close();

        let summary = f.consumer.run(std::future::pending()).await;

        assert_eq!(summary.acknowledged, 1);
        assert_eq!(summary.deferred, 1);
        assert_eq!(summary.stopped_by, StopReason::QueueClosed);
        assert_eq!(f.docs.records().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_the_loop_knows_when_to_stop() {
        let f = fixture(
            0,
            ConsumerConfig {
                idle_shutdown_ms: Some(50),
                ..ConsumerConfig::default()
            },
        );
        let summary = f.consumer.run(std::future::pending()).await;
        assert_eq!(summary.stopped_by, StopReason::Idle);

        let f = fixture(0, ConsumerConfig::default());
        let summary = f.consumer.run(async {}).await;
        assert_eq!(summary.stopped_by, StopReason::Shutdown);
        assert_eq!(summary.acknowledged, 0);
    }
}
