#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use promobot_core::{MessageSender, SendError, UserId};
use tokio::time::Instant;

/// One call seen by [`ScriptedSender`].
#[derive(Debug, Clone)]
pub struct SendCall {
    pub recipient: UserId,
    pub text: String,
    pub at: Instant,
}

/// Sender that records every call and fails on demand.
#[derive(Default)]
pub struct ScriptedSender {
    calls: Mutex<Vec<SendCall>>,
    failures: Mutex<HashMap<UserId, u32>>,
    always_fail: Mutex<Vec<UserId>>,
    latency: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every send takes `latency` of (paused) tokio time.
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Default::default()
        })
    }

    /// Fail the next `times` sends to `recipient`.
    pub fn fail_times(&self, recipient: UserId, times: u32) {
        self.failures.lock().unwrap().insert(recipient, times);
    }

    pub fn fail_always(&self, recipient: UserId) {
        self.always_fail.lock().unwrap().push(recipient);
    }

    pub fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, recipient: UserId) -> Vec<SendCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.recipient == recipient)
            .collect()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSender for ScriptedSender {
    async fn send(&self, recipient: UserId, text: &str) -> Result<(), SendError> {
        let now_running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);

        self.calls.lock().unwrap().push(SendCall {
            recipient,
            text: text.to_string(),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.current.fetch_sub(1, Ordering::SeqCst);

        if self.always_fail.lock().unwrap().contains(&recipient) {
            return Err(SendError::Rejected("bot was blocked by the user".into()));
        }

        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(&recipient) {
            if *left > 0 {
                *left -= 1;
                return Err(SendError::Network("connection reset".into()));
            }
        }
        Ok(())
    }
}

pub fn users(ids: std::ops::Range<i64>) -> Vec<UserId> {
    ids.map(UserId).collect()
}
