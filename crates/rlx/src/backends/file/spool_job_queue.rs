use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backends::JobQueue;
use crate::common::{Delivery, JobMessage};

const PENDING_DIR: &str = "pending";
const INFLIGHT_DIR: &str = "inflight";
const CLAIM_MARKER: &str = ".claim-";
const QUARANTINE_SUFFIX: &str = ".bad";

// -- 📬 SpoolJobQueueConfig: a mailbox made of folders. the postal service would be proud.
#[derive(Debug, Deserialize, Clone)]
pub struct SpoolJobQueueConfig {
    /// 📂 Spool root. `pending/` and `inflight/` are created underneath.
    pub directory: String,
    /// ⏱️ How long a claim holds before the message is handed out again.
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    /// 😴 How long `receive` naps between looks at an empty spool.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_visibility_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    500
}

#[derive(Debug, Serialize, Deserialize)]
struct SpoolEnvelope {
    message: JobMessage,
    #[serde(default)]
    attempt: u32,
}

/// ✉️ An at-least-once queue that lives in a directory.
///
/// - `send` writes `pending/<millis>-<uuid>.json` (temp file, then rename).
/// - `receive` claims the oldest pending file by renaming it into
///   `inflight/<base>.claim-<deadline>-<uuid>.json`. Whoever wins the rename owns the
///   delivery; everyone else gets `NotFound` and tries the next file.
/// - `ack` deletes the claimed file.
/// - A claimed file that isn't a job message is renamed to `inflight/<claim>.bad` and
///   skipped. Nothing reads `.bad` files again; they wait for a human.
/// - A claim whose deadline passed is renamed back into `pending/` by the next `receive`
///   from any process sharing the spool.
///
/// 🧠 The deadline lives in the file name, not the mtime. `rename` keeps the mtime of
/// the original send, which would make every old message look expired on claim.
#[derive(Debug)]
pub struct SpoolJobQueue {
    pending: PathBuf,
    inflight: PathBuf,
    visibility_timeout: Duration,
    poll_interval: Duration,
}

impl SpoolJobQueue {
    pub async fn new(config: SpoolJobQueueConfig) -> Result<Self> {
        let root = PathBuf::from(&config.directory);
        let pending = root.join(PENDING_DIR);
        let inflight = root.join(INFLIGHT_DIR);
        for dir in [&pending, &inflight] {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("💀 could not create spool directory '{}'", dir.display()))?;
        }
        debug!(root = %root.display(), "📬 spool queue ready");
        Ok(Self {
            pending,
            inflight,
            visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
        })
    }

    /// 📏 Messages waiting in `pending/`.
    pub async fn pending(&self) -> Result<usize> {
        Ok(spool_files(&self.pending).await?.len())
    }

    /// 📏 Messages claimed and not yet acknowledged.
    pub async fn in_flight(&self) -> Result<usize> {
        Ok(spool_files(&self.inflight).await?.len())
    }

    // -- ⏰ put every expired claim back in line. losing a rename race is fine, someone else did it.
    async fn requeue_expired(&self) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        for name in spool_files(&self.inflight).await? {
            let Some((base, deadline)) = parse_claim(&name) else {
                warn!(file = %name, "🤷 unrecognized file in the inflight spool, leaving it alone");
                continue;
            };
            if deadline > now {
                continue;
            }
            let from = self.inflight.join(&name);
            let to = self.pending.join(format!("{base}.json"));
            match fs::rename(&from, &to).await {
                Ok(()) => debug!(file = %name, "⏰ claim expired, message goes back in line"),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("💀 failed to requeue '{}'", from.display()));
                }
            }
        }
        Ok(())
    }

    async fn try_claim(&self) -> Result<Option<Delivery>> {
        for name in spool_files(&self.pending).await? {
            let Some(base) = name.strip_suffix(".json") else {
                continue;
            };
            let deadline = Utc::now().timestamp_millis() + self.visibility_timeout.as_millis() as i64;
            let delivery_id = format!("{base}{CLAIM_MARKER}{deadline:020}-{}.json", Uuid::new_v4());
            let claimed = self.inflight.join(&delivery_id);

            match fs::rename(self.pending.join(&name), &claimed).await {
                Ok(()) => {}
                // -- 🏃 another receiver got there first
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(err).with_context(|| format!("💀 failed to claim spool file '{name}'"));
                }
            }

            let raw = fs::read(&claimed)
                .await
                .with_context(|| format!("💀 failed to read claimed spool file '{delivery_id}'"))?;
            let mut envelope: SpoolEnvelope = match serde_json::from_slice(&raw) {
                Ok(envelope) => envelope,
                Err(err) => {
                    self.quarantine(&claimed, &err).await?;
                    continue;
                }
            };
            envelope.attempt += 1;
            // -- 🔄 persist the attempt count so the next redelivery knows
            write_atomically(&claimed, &serde_json::to_vec(&envelope)?).await?;

            trace!(delivery_id = %delivery_id, attempt = envelope.attempt, "📬 claimed spool message");
            return Ok(Some(Delivery {
                delivery_id,
                message: envelope.message,
                attempt: envelope.attempt,
            }));
        }
        Ok(None)
    }

    // -- ☣️ undecodable today means undecodable on every redelivery, so it leaves the rotation
    async fn quarantine(&self, claimed: &Path, err: &serde_json::Error) -> Result<()> {
        let mut bad = claimed.as_os_str().to_owned();
        bad.push(QUARANTINE_SUFFIX);
        let bad = PathBuf::from(bad);
        warn!(
            file = %claimed.display(),
            quarantined = %bad.display(),
            error = %err,
            "☣️ spool file is not a job message, moving it aside"
        );
        fs::rename(claimed, &bad)
            .await
            .with_context(|| format!("💀 failed to move '{}' aside", claimed.display()))
    }
}

#[async_trait]
impl JobQueue for SpoolJobQueue {
    async fn send(&self, message: JobMessage) -> Result<()> {
        let base = format!("{:020}-{}", Utc::now().timestamp_millis(), Uuid::new_v4());
        let envelope = SpoolEnvelope { message, attempt: 0 };
        let target = self.pending.join(format!("{base}.json"));
        write_atomically(&target, &serde_json::to_vec(&envelope)?).await?;
        trace!(file = %target.display(), "✉️ spooled message");
        Ok(())
    }

    /// 📬 Waits until a message can be claimed. A spool never closes, so this never
    /// returns `Ok(None)`; callers stop it with their own shutdown signal.
    async fn receive(&self) -> Result<Option<Delivery>> {
        loop {
            self.requeue_expired().await?;
            if let Some(delivery) = self.try_claim().await? {
                return Ok(Some(delivery));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let path = self.inflight.join(&delivery.delivery_id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(delivery_id = %delivery.delivery_id, "🐢 ack for a claim that already expired, ignoring");
                Ok(())
            }
            Err(err) => Err(err).with_context(|| format!("💀 failed to ack '{}'", path.display())),
        }
    }
}

// -- 📋 visible spool entries, oldest first. dotfiles are temp writes in progress.
async fn spool_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("💀 failed to list spool directory '{}'", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || !name.ends_with(".json") {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

fn parse_claim(name: &str) -> Option<(&str, i64)> {
    let (base, rest) = name.split_once(CLAIM_MARKER)?;
    let (deadline, _) = rest.split_once('-')?;
    Some((base, deadline.parse().ok()?))
}

async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let temp = dir.join(format!(".{}.tmp", Uuid::new_v4()));
    fs::write(&temp, bytes)
        .await
        .with_context(|| format!("💀 failed to write spool temp file '{}'", temp.display()))?;
    fs::rename(&temp, target)
        .await
        .with_context(|| format!("💀 failed to move spool file into place at '{}'", target.display()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    async fn spool_in(dir: &tempfile::TempDir, visibility_timeout_ms: u64) -> Result<SpoolJobQueue> {
        SpoolJobQueue::new(SpoolJobQueueConfig {
            directory: dir.path().display().to_string(),
            visibility_timeout_ms,
            poll_interval_ms: 10,
        })
        .await
    }

    async fn receive_soon(queue: &SpoolJobQueue) -> Delivery {
        tokio::time::timeout(Duration::from_secs(5), queue.receive())
            .await
            .expect("💀 receive should not hang")
            .expect("💀 receive should not fail")
            .expect("💀 a spool never reports closed")
    }

    #[tokio::test]
    async fn the_one_where_messages_come_out_in_the_order_they_went_in() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let queue = spool_in(&dir, 10_000).await?;

        queue.send(JobMessage::new("first", HashMap::new())).await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.send(JobMessage::new("second", HashMap::new())).await?;
        assert_eq!(queue.pending().await?, 2);

        let one = receive_soon(&queue).await;
        let two = receive_soon(&queue).await;
        assert_eq!(one.message.body, "first");
        assert_eq!(two.message.body, "second");
        assert_eq!(queue.in_flight().await?, 2);

        queue.ack(&one).await?;
        queue.ack(&two).await?;
        assert_eq!(queue.in_flight().await?, 0);
        assert_eq!(queue.pending().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_an_abandoned_claim_comes_back_with_a_higher_attempt() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let queue = spool_in(&dir, 100).await?;
        let mut metadata = HashMap::new();
        metadata.insert("eventType".to_string(), "file.upload".to_string());
        queue.send(JobMessage::new("job-7", metadata)).await?;

        let first = receive_soon(&queue).await;
        assert_eq!(first.attempt, 1);

        // -- 🤐 no ack, wait out the claim
        let second = receive_soon(&queue).await;
        assert_eq!(second.message, first.message);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.delivery_id, first.delivery_id);

        queue.ack(&first).await?;
        assert_eq!(queue.in_flight().await?, 1);
        queue.ack(&second).await?;
        assert_eq!(queue.in_flight().await?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_second_process_picks_up_where_the_first_left_off() -> Result<()> {
        let dir = tempfile::tempdir()?;
        {
            let producer_side = spool_in(&dir, 10_000).await?;
            producer_side.send(JobMessage::new("survivor", HashMap::new())).await?;
        }
        let consumer_side = spool_in(&dir, 10_000).await?;
        let delivery = receive_soon(&consumer_side).await;
        assert_eq!(delivery.message.body, "survivor");
        consumer_side.ack(&delivery).await?;
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_garbage_file_is_moved_aside_instead_of_jamming_the_spool() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let queue = spool_in(&dir, 100).await?;
        // -- 🗑️ sorts ahead of anything `send` writes, so it gets claimed first
        fs::write(
            dir.path().join(PENDING_DIR).join("00000000000000000000-garbage.json"),
            b"this is not json",
        )
        .await?;
        queue.send(JobMessage::new("real-job", HashMap::new())).await?;

        let delivery = receive_soon(&queue).await;
        assert_eq!(delivery.message.body, "real-job");
        assert_eq!(delivery.attempt, 1);
        queue.ack(&delivery).await?;

        // -- ⏰ well past the visibility timeout: the garbage must not come back
        tokio::time::sleep(Duration::from_millis(250)).await;
        queue.requeue_expired().await?;
        assert_eq!(queue.pending().await?, 0);
        assert_eq!(queue.in_flight().await?, 0);

        let mut quarantined = Vec::new();
        let mut entries = fs::read_dir(dir.path().join(INFLIGHT_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            quarantined.push(entry.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(quarantined.len(), 1);
        assert!(quarantined[0].starts_with("00000000000000000000-garbage.claim-"));
        assert!(quarantined[0].ends_with(".json.bad"));
        Ok(())
    }

    #[test]
    fn the_one_where_claim_names_give_up_their_secrets() {
        let name = "00000000001700000000-abc.claim-00000000001700000500-def.json";
        assert_eq!(
            parse_claim(name),
            Some(("00000000001700000000-abc", 1_700_000_500))
        );
        assert_eq!(parse_claim("00000000001700000000-abc.json"), None);
    }
}
