//! Admin broadcasts on top of the dispatch queue.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tracing::{info, warn};

use crate::error::StoreError;
use crate::queue::DispatchQueue;
use crate::store::UserStore;
use crate::types::{DeliveryTracker, Language, LocalizedText, UserId, UserRecord};

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Retry budget for plain broadcasts.
    pub max_retries: u32,
    /// Retry budget for localized notifications.
    pub localized_max_retries: u32,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            localized_max_retries: 2,
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(10 * 60),
        }
    }
}

/// What the admin is told after a broadcast. Counts cover only the jobs
/// this broadcast enqueued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastReport {
    pub total: usize,
    pub sent: u64,
    pub failed: u64,
    /// The wait ended before the queue drained; counts are partial.
    pub timed_out: bool,
}

pub struct Broadcaster {
    queue: DispatchQueue,
    store: Arc<dyn UserStore>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(queue: DispatchQueue, store: Arc<dyn UserStore>, config: BroadcastConfig) -> Self {
        Self { queue, store, config }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Send `message` to every known user and wait for the queue to drain.
    pub async fn broadcast(&self, message: &str) -> Result<BroadcastReport, StoreError> {
        let recipients = self.store.all_user_ids().await?;
        if recipients.is_empty() {
            info!("no users found to broadcast to");
            return Ok(BroadcastReport::default());
        }

        info!(total = recipients.len(), "starting broadcast");
        let jobs = vec![(recipients, message.to_string())];
        Ok(self.run(jobs, self.config.max_retries).await)
    }

    /// Send each user the text matching their language.
    pub async fn broadcast_localized(&self, text: &LocalizedText) -> Result<BroadcastReport, StoreError> {
        let users = self.store.all_users().await?;
        if users.is_empty() {
            info!("no users found to notify");
            return Ok(BroadcastReport::default());
        }

        let (tr, en): (Vec<_>, Vec<_>) = users
            .into_iter()
            .partition(|user| user.language == Language::Tr);

        let mut jobs = Vec::with_capacity(2);
        for (recipients, message) in [(user_ids(tr), &text.tr), (user_ids(en), &text.en)] {
            if !recipients.is_empty() {
                jobs.push((recipients, message.clone()));
            }
        }

        info!(groups = jobs.len(), "starting localized broadcast");
        Ok(self.run(jobs, self.config.localized_max_retries).await)
    }

    async fn run(&self, jobs: Vec<(Vec<UserId>, String)>, max_retries: u32) -> BroadcastReport {
        let mut trackers = Vec::with_capacity(jobs.len());
        for (recipients, message) in jobs {
            trackers.push(self.queue.enqueue_tracked(recipients, &message, max_retries).await);
        }

        let total: u64 = trackers.iter().map(|t| t.total()).sum();
        let drained = wait_for(&trackers, self.config.poll_interval, self.config.max_wait).await;
        if !drained {
            warn!(total, "broadcast timeout reached");
        }

        let report = BroadcastReport {
            total: total as usize,
            sent: trackers.iter().map(|t| t.delivered()).sum(),
            failed: trackers.iter().map(|t| t.failed()).sum(),
            timed_out: !drained,
        };
        info!(
            total = report.total,
            sent = report.sent,
            failed = report.failed,
            timed_out = report.timed_out,
            "broadcast finished"
        );
        report
    }
}

/// Poll until every tracker is done or `max_wait` elapses.
async fn wait_for(trackers: &[Arc<DeliveryTracker>], poll_interval: Duration, max_wait: Duration) -> bool {
    let deadline = Instant::now() + max_wait;
    loop {
        if trackers.iter().all(|t| t.is_done()) {
            return true;
        }

        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        sleep(poll_interval.min(deadline - now)).await;
    }
}

fn user_ids(users: Vec<UserRecord>) -> Vec<UserId> {
    users.into_iter().map(|u| u.user_id).collect()
}
