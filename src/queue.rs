use std::collections::VecDeque;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::error::DeliveryOutcome;
use crate::types::{DeliveryTracker, QueueStats, QueueStatus, SendJob, UserId};
use crate::worker::{metric_inc, process_job, MessageSender};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Jobs dispatched concurrently per batch. Zero is treated as one.
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
    /// Pacing delay every job sleeps after each attempt.
    pub inter_message_delay: Duration,
    /// Backoff unit; the n-th retry waits `retry_base * 2^n`.
    pub retry_base: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        // 25 per batch plus pacing stays under Telegram's 30 msg/s ceiling.
        Self {
            batch_size: 25,
            inter_batch_delay: Duration::from_millis(1_000),
            inter_message_delay: Duration::from_millis(50),
            retry_base: Duration::from_millis(1_000),
        }
    }
}

/// Single-consumer broadcast queue.
///
/// Producers only append through [`DispatchQueue::enqueue`]; exactly one
/// drain loop at a time takes bounded batches from the head, sends them
/// concurrently and waits for the whole batch to settle before the next.
/// Failed jobs back off exponentially and re-join at the tail.
///
/// Cloning is cheap and every clone drives the same queue.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    state: Mutex<QueueState>,
    sender: Arc<dyn MessageSender>,
    config: DispatchConfig,
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
    batches: AtomicU64,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<SendJob>,
    in_flight: usize,
    processing: bool,
}

impl DispatchQueue {
    pub fn new(config: DispatchConfig, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                sender,
                config,
                delivered: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                retries: AtomicU64::new(0),
                batches: AtomicU64::new(0),
            }),
        }
    }

    /// Append one job per recipient and make sure a drain loop is running.
    ///
    /// Returns the number of jobs added without waiting for delivery;
    /// progress is observable through [`status`](Self::status).
    pub async fn enqueue<I>(&self, recipients: I, message: &str, max_retries: u32) -> usize
    where
        I: IntoIterator<Item = UserId>,
    {
        self.enqueue_tracked(recipients, message, max_retries)
            .await
            .total() as usize
    }

    /// Like [`enqueue`](Self::enqueue), returning the tracker shared by the
    /// new jobs. It only counts outcomes of these jobs, whatever else is
    /// on the queue.
    pub async fn enqueue_tracked<I>(
        &self,
        recipients: I,
        message: &str,
        max_retries: u32,
    ) -> Arc<DeliveryTracker>
    where
        I: IntoIterator<Item = UserId>,
    {
        let recipients: Vec<UserId> = recipients.into_iter().collect();
        let tracker = Arc::new(DeliveryTracker::new(recipients.len()));
        if recipients.is_empty() {
            return tracker;
        }

        let payload: Arc<str> = Arc::from(message);
        let added = recipients.len();

        let mut state = self.inner.state.lock().await;
        state.pending.extend(recipients.into_iter().map(|recipient| {
            SendJob::tracked(recipient, payload.clone(), max_retries, tracker.clone())
        }));

        info!(added, queued = state.pending.len(), "added broadcast jobs to queue");
        metric_inc("broadcast.queue.enqueued");

        if !state.processing {
            state.processing = true;
            tokio::spawn(drain_loop(self.inner.clone()));
        }
        tracker
    }

    pub async fn status(&self) -> QueueStatus {
        let state = self.inner.state.lock().await;
        QueueStatus {
            queued: state.pending.len(),
            in_flight: state.in_flight,
            processing: state.processing,
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            delivered: self.inner.delivered.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            retries: self.inner.retries.load(Ordering::SeqCst),
            batches: self.inner.batches.load(Ordering::SeqCst),
        }
    }

    /// Drop every queued job. A batch already dispatched still completes.
    pub async fn clear(&self) -> usize {
        let mut state = self.inner.state.lock().await;
        let dropped = state.pending.len();
        for job in state.pending.drain(..) {
            job.tracker.record_cleared();
        }
        info!(dropped, "broadcast queue cleared");
        dropped
    }

    /// Poll until the queue is idle or `max_wait` elapses.
    ///
    /// Returns `false` on timeout; some jobs may still be pending then.
    pub async fn wait_until_idle(&self, poll_interval: Duration, max_wait: Duration) -> bool {
        let deadline = Instant::now() + max_wait;
        loop {
            if self.status().await.is_idle() {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(?max_wait, "timed out waiting for broadcast queue to drain");
                return false;
            }
            sleep(poll_interval.min(deadline - now)).await;
        }
    }
}

impl QueueInner {
    /// Take the next batch, or flip `processing` off when nothing is left.
    async fn next_batch(&self) -> Option<Vec<SendJob>> {
        let mut state = self.state.lock().await;
        if state.pending.is_empty() {
            state.processing = false;
            return None;
        }

        let take = self.config.batch_size.max(1).min(state.pending.len());
        let batch: Vec<SendJob> = state.pending.drain(..take).collect();
        state.in_flight = batch.len();
        Some(batch)
    }

    async fn has_queued(&self) -> bool {
        !self.state.lock().await.pending.is_empty()
    }

    async fn run_batch(self: &Arc<Self>, batch: Vec<SendJob>) {
        let mut tasks = JoinSet::new();
        for job in batch {
            let inner = self.clone();
            tasks.spawn(async move { inner.run_job(job).await });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "broadcast job task aborted");
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }

        self.state.lock().await.in_flight = 0;
    }

    async fn run_job(&self, job: SendJob) {
        let report = process_job(job, self.sender.as_ref()).await;

        match report.outcome {
            DeliveryOutcome::Delivered => {
                self.delivered.fetch_add(1, Ordering::SeqCst);
                report.job.tracker.record_delivered();
                self.settle(None).await;
            }
            DeliveryOutcome::Retry(_) => {
                self.retries.fetch_add(1, Ordering::SeqCst);
                sleep(retry_delay_for_attempt(self.config.retry_base, report.job.retries)).await;
                self.settle(Some(report.job)).await;
                metric_inc("broadcast.delivery.retry_scheduled");
            }
            DeliveryOutcome::Exhausted(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
                report.job.tracker.record_failed();
                self.settle(None).await;
                metric_inc("broadcast.delivery.failed");
            }
        }

        sleep(self.config.inter_message_delay).await;
    }

    /// Leave the in-flight set, re-joining the tail when `requeue` is given.
    async fn settle(&self, requeue: Option<SendJob>) {
        let mut state = self.state.lock().await;
        if let Some(job) = requeue {
            state.pending.push_back(job);
        }
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

async fn drain_loop(inner: Arc<QueueInner>) {
    info!("starting to process broadcast jobs");
    let mut batches = 0u64;

    while let Some(batch) = inner.next_batch().await {
        batches += 1;
        inner.batches.fetch_add(1, Ordering::SeqCst);
        inner.run_batch(batch).await;

        if inner.has_queued().await {
            sleep(inner.config.inter_batch_delay).await;
        }
    }

    info!(batches, "broadcast queue processing completed");
}

/// Backoff before the `attempt`-th retry: `base * 2^attempt`, saturating.
///
/// Strictly increasing in `attempt` for any non-zero `base` until it saturates.
pub fn retry_delay_for_attempt(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(Duration::MAX)
}
