//! Per-user request limiter for chat interactions.
//!
//! Fixed one-minute windows: the first hit opens a window, hits are
//! allowed while the window's count is below the limit, and the window
//! resets once the clock passes its end.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::types::UserId;
use crate::worker::metric_inc;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_window: u32,
    pub window: chrono::Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_window: 10,
            window: chrono::Duration::minutes(1),
        }
    }
}

impl RateLimitConfig {
    pub fn per_minute(limit: u32) -> Self {
        Self {
            per_window: limit,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterStats {
    pub tracked_users: usize,
    pub limited_users: usize,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<UserId, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Count one hit for `user_id`; `false` means the user is over the limit.
    pub async fn check(&self, user_id: UserId) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;

        match entries.get_mut(&user_id) {
            Some(entry) if now <= entry.reset_at => {
                if entry.count >= self.config.per_window {
                    debug!(%user_id, "rate limit exceeded");
                    metric_inc("bot.rate_limited");
                    return false;
                }
                entry.count += 1;
                true
            }
            _ => {
                entries.insert(
                    user_id,
                    WindowEntry {
                        count: 1,
                        reset_at: now + self.config.window,
                    },
                );
                true
            }
        }
    }

    /// Forget windows that have already ended.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| now <= entry.reset_at);
        before - entries.len()
    }

    pub async fn snapshot(&self) -> RateLimiterStats {
        let entries = self.entries.lock().await;
        RateLimiterStats {
            tracked_users: entries.len(),
            limited_users: entries
                .values()
                .filter(|e| e.count >= self.config.per_window)
                .count(),
        }
    }

    /// Run [`purge_expired`](Self::purge_expired) every `every` until the handle is aborted.
    pub fn spawn_purge_task(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let limiter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = limiter.purge_expired().await;
                if purged > 0 {
                    info!(purged, "purged expired rate limit windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn limiter(limit: u32) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(RateLimitConfig::per_minute(limit), clock.clone());
        (clock, limiter)
    }

    #[tokio::test]
    async fn allows_up_to_limit_per_window() {
        let (_clock, limiter) = limiter(3);
        for _ in 0..3 {
            assert!(limiter.check(UserId(1)).await);
        }
        assert!(!limiter.check(UserId(1)).await);
        assert!(limiter.check(UserId(2)).await);
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let (clock, limiter) = limiter(1);
        assert!(limiter.check(UserId(1)).await);
        assert!(!limiter.check(UserId(1)).await);

        clock.advance(chrono::Duration::seconds(60));
        assert!(!limiter.check(UserId(1)).await, "window end is inclusive");

        clock.advance(chrono::Duration::seconds(1));
        assert!(limiter.check(UserId(1)).await);
    }

    #[tokio::test]
    async fn purge_drops_only_expired_windows() {
        let (clock, limiter) = limiter(2);
        limiter.check(UserId(1)).await;
        clock.advance(chrono::Duration::seconds(30));
        limiter.check(UserId(2)).await;

        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(limiter.purge_expired().await, 1);

        let stats = limiter.snapshot().await;
        assert_eq!(stats.tracked_users, 1);
        assert_eq!(stats.limited_users, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_task_runs_periodically() {
        let (clock, limiter) = limiter(1);
        let limiter = Arc::new(limiter);
        limiter.check(UserId(1)).await;
        clock.advance(chrono::Duration::minutes(2));

        let handle = limiter.spawn_purge_task(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(limiter.snapshot().await.tracked_users, 0);
        handle.abort();
    }
}
