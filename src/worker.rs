use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{DeliveryOutcome, SendError};
use crate::types::{SendJob, UserId};

#[cfg(feature = "metrics")]
pub(crate) fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn metric_inc(_name: &'static str) {}

/// Capability to deliver one text message to one recipient.
///
/// Supplied to the dispatch queue at construction. Implementations should
/// map every failure to a [`SendError`]; the queue decides whether to retry.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, recipient: UserId, text: &str) -> Result<(), SendError>;
}

#[async_trait]
impl<T: MessageSender + ?Sized> MessageSender for Arc<T> {
    async fn send(&self, recipient: UserId, text: &str) -> Result<(), SendError> {
        (**self).send(recipient, text).await
    }
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub job: SendJob,
    pub outcome: DeliveryOutcome,
}

/// Run one delivery attempt for `job`.
///
/// On a retryable failure the returned job already carries the incremented
/// retry count; scheduling the backoff and re-queueing is the caller's job.
pub async fn process_job(mut job: SendJob, sender: &dyn MessageSender) -> DeliveryReport {
    match sender.send(job.recipient, &job.payload).await {
        Ok(()) => {
            debug!(recipient = %job.recipient, "broadcast delivered");
            metric_inc("broadcast.delivery.success");
            DeliveryReport {
                job,
                outcome: DeliveryOutcome::Delivered,
            }
        }
        Err(err) => {
            warn!(recipient = %job.recipient, error = %err, "broadcast send failed");
            metric_inc("broadcast.delivery.failure");

            if !job.can_retry() {
                warn!(
                    recipient = %job.recipient,
                    max_retries = job.max_retries,
                    "max retries reached, dropping broadcast job"
                );
                return DeliveryReport {
                    job,
                    outcome: DeliveryOutcome::Exhausted(err),
                };
            }

            job.retries += 1;
            info!(
                recipient = %job.recipient,
                attempt = job.retries,
                max_retries = job.max_retries,
                "retrying broadcast"
            );
            DeliveryReport {
                job,
                outcome: DeliveryOutcome::Retry(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FailingSender {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageSender for FailingSender {
        async fn send(&self, _recipient: UserId, _text: &str) -> Result<(), SendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SendError::Network("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn failure_increments_retries_until_budget_is_spent() {
        let sender = FailingSender { calls: AtomicU32::new(0) };
        let job = SendJob::new(UserId(7), Arc::from("hello"), 1);

        let first = process_job(job, &sender).await;
        assert!(matches!(first.outcome, DeliveryOutcome::Retry(_)));
        assert_eq!(first.job.retries, 1);

        let second = process_job(first.job, &sender).await;
        assert!(matches!(second.outcome, DeliveryOutcome::Exhausted(_)));
        assert_eq!(second.job.retries, 1);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_budget_is_exhausted_on_first_failure() {
        let sender = FailingSender { calls: AtomicU32::new(0) };
        let job = SendJob::new(UserId(1), Arc::from("x"), 0);

        let report = process_job(job, &sender).await;
        assert!(report.outcome.is_terminal());
    }
}
