use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::backends::JobQueue;
use crate::common::{Delivery, JobMessage};

/// 🔧 Knobs for the in-memory queue.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InMemoryJobQueueConfig {
    /// ⏱️ How long a delivery may stay unacknowledged before the message goes back in line.
    pub visibility_timeout_ms: u64,
    /// 📦 Channel capacity. `send` waits when the line is this long.
    pub capacity: usize,
}

impl Default for InMemoryJobQueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            capacity: 1024,
        }
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    message: JobMessage,
    // -- 🔄 deliveries so far; 0 until the first receive
    attempt: u32,
}

#[derive(Debug)]
struct QueueState {
    tx: Sender<Envelope>,
    rx: Receiver<Envelope>,
    // -- 🔒 std mutex on purpose: never held across an await, so `receive` has no await
    // between taking a message off the channel and parking it here
    in_flight: Mutex<HashMap<String, Envelope>>,
    visibility_timeout: Duration,
}

impl QueueState {
    // -- 🧟 a panic elsewhere doesn't make the table wrong, just awkward
    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, Envelope>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// ✉️ An at-least-once queue made of one `async_channel` and one grudge.
///
/// Every received message is parked in an in-flight table. `ack` removes it. If nobody
/// acks before the visibility timeout, a background timer puts the message back on the
/// channel with its attempt counter bumped, and the next `receive` gets it again.
///
/// 🧠 Clones share state. Many consumers may `receive` concurrently; each message goes
/// to exactly one of them per delivery.
#[derive(Debug, Clone)]
pub struct InMemoryJobQueue {
    state: Arc<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new(config: &InMemoryJobQueueConfig) -> Self {
        let (tx, rx) = async_channel::bounded(config.capacity.max(1));
        Self {
            state: Arc::new(QueueState {
                tx,
                rx,
                in_flight: Mutex::new(HashMap::new()),
                visibility_timeout: Duration::from_millis(config.visibility_timeout_ms),
            }),
        }
    }

    /// 📏 Messages waiting to be received (not counting in-flight ones).
    pub fn pending(&self) -> usize {
        self.state.rx.len()
    }

    /// 📏 Messages delivered but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.state.in_flight().len()
    }

    /// 🚪 Stop accepting sends. Receivers drain what is left, then get `None`.
    ///
    /// ⚠️ A delivery that times out after close has nowhere to go and is dropped.
    pub fn close(&self) {
        self.state.tx.close();
    }

    fn schedule_redelivery(&self, delivery_id: String) {
        let state: Weak<QueueState> = Arc::downgrade(&self.state);
        let timeout = self.state.visibility_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // -- 🕳️ queue is gone, nobody left to redeliver to
            let Some(state) = state.upgrade() else {
                return;
            };
            let expired = state.in_flight().remove(&delivery_id);
            if let Some(envelope) = expired {
                debug!(
                    delivery_id = %delivery_id,
                    attempt = envelope.attempt,
                    "⏰ visibility timeout expired, message goes back in line"
                );
                if state.tx.send(envelope).await.is_err() {
                    warn!(delivery_id = %delivery_id, "💀 queue closed before redelivery, message dropped");
                }
            }
        });
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn send(&self, message: JobMessage) -> Result<()> {
        trace!(body = %message.body, "✉️ enqueueing message");
        self.state
            .tx
            .send(Envelope {
                message,
                attempt: 0,
            })
            .await
            .map_err(|_| anyhow!("💀 the in-memory queue is closed. The message knocked, nobody answered."))
    }

    /// 📬 Cancel-safe: dropping this future either leaves the message on the channel or
    /// finds it already parked in flight with a redelivery timer running.
    async fn receive(&self) -> Result<Option<Delivery>> {
        let mut envelope = match self.state.rx.recv().await {
            Ok(envelope) => envelope,
            // -- 🏁 closed and drained
            Err(_) => return Ok(None),
        };
        envelope.attempt += 1;
        let delivery_id = Uuid::new_v4().to_string();
        self.state
            .in_flight()
            .insert(delivery_id.clone(), envelope.clone());
        self.schedule_redelivery(delivery_id.clone());

        Ok(Some(Delivery {
            delivery_id,
            message: envelope.message,
            attempt: envelope.attempt,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let removed = self.state.in_flight().remove(&delivery.delivery_id);
        if removed.is_none() {
            // -- 🐢 too late, the timer already sent it back. someone else will get it.
            debug!(
                delivery_id = %delivery.delivery_id,
                "🐢 ack for a delivery that already expired, ignoring"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_queue(visibility_timeout_ms: u64) -> InMemoryJobQueue {
        InMemoryJobQueue::new(&InMemoryJobQueueConfig {
            visibility_timeout_ms,
            capacity: 16,
        })
    }

    async fn receive_soon(queue: &InMemoryJobQueue) -> Option<Delivery> {
        tokio::time::timeout(Duration::from_secs(2), queue.receive())
            .await
            .expect("💀 receive should not hang")
            .expect("💀 receive should not fail")
    }

    #[tokio::test]
    async fn the_one_where_an_acked_message_stays_gone() -> anyhow::Result<()> {
        let queue = quick_queue(50);
        queue.send(JobMessage::new("job-1", HashMap::new())).await?;

        let delivery = receive_soon(&queue).await.expect("💀 expected a delivery");
        assert_eq!(delivery.message.body, "job-1");
        assert_eq!(delivery.attempt, 1);
        assert_eq!(queue.in_flight(), 1);

        queue.ack(&delivery).await?;
        assert_eq!(queue.in_flight(), 0);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(queue.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_silence_means_try_again() -> anyhow::Result<()> {
        let queue = quick_queue(200);
        let mut metadata = HashMap::new();
        metadata.insert("eventType".to_string(), "file.upload".to_string());
        queue.send(JobMessage::new("job-2", metadata)).await?;

        let first = receive_soon(&queue).await.expect("💀 expected a delivery");
        // -- 🤐 no ack. the queue should notice.
        let second = receive_soon(&queue).await.expect("💀 expected a redelivery");

        assert_eq!(second.message, first.message);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.delivery_id, first.delivery_id);

        // -- 🐢 the stale ack is harmless, the fresh one counts
        queue.ack(&first).await?;
        assert_eq!(queue.in_flight(), 1);
        queue.ack(&second).await?;
        assert_eq!(queue.in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_closed_queue_drains_then_says_goodbye() -> anyhow::Result<()> {
        let queue = quick_queue(10_000);
        queue.send(JobMessage::new("last-call", HashMap::new())).await?;
        queue.close();

        assert!(queue.send(JobMessage::new("too-late", HashMap::new())).await.is_err());
        let delivery = receive_soon(&queue).await.expect("💀 the queued message should drain");
        assert_eq!(delivery.message.body, "last-call");
        assert!(receive_soon(&queue).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_impatient_receivers_never_lose_a_message() -> anyhow::Result<()> {
        const MESSAGES: usize = 200;
        let queue = quick_queue(60_000);

        let sender = queue.clone();
        let sending = tokio::spawn(async move {
            for i in 0..MESSAGES {
                sender.send(JobMessage::new(format!("job-{i}"), HashMap::new())).await?;
                tokio::task::yield_now().await;
            }
            anyhow::Ok(())
        });

        // -- ⏱️ most of these receives get dropped mid-wait, which must not eat anything
        let mut received = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while received.len() < MESSAGES && tokio::time::Instant::now() < deadline {
            if let Ok(delivery) = tokio::time::timeout(Duration::from_micros(50), queue.receive()).await {
                received.push(delivery?.expect("💀 the queue is still open"));
            }
        }
        sending.await??;

        assert_eq!(received.len(), MESSAGES);
        assert_eq!(queue.in_flight(), MESSAGES);
        assert_eq!(queue.pending(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_receive_given_up_on_still_leaves_the_message_for_the_next() -> anyhow::Result<()> {
        let queue = quick_queue(60_000);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), queue.receive())
                .await
                .is_err(),
            "💀 nothing was sent, the receive should have timed out"
        );

        queue.send(JobMessage::new("late-arrival", HashMap::new())).await?;
        let delivery = receive_soon(&queue).await.expect("💀 the message should still be there");
        assert_eq!(delivery.message.body, "late-arrival");
        assert_eq!(delivery.attempt, 1);
        assert_eq!(queue.in_flight(), 1);
        Ok(())
    }
}
