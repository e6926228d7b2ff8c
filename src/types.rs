use std::fmt;
use std::str::FromStr;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a chat user, also used as a message destination.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of user IDs with counters or other integers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        UserId(id)
    }
}

/// Interface language picked by a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Tr,
    #[default]
    En,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Tr => "tr",
            Language::En => "en",
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tr" => Ok(Language::Tr),
            "en" => Ok(Language::En),
            other => Err(format!("unknown language: {other}")),
        }
    }
}

/// Review status of a user's most recent bonus request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BonusStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl BonusStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BonusStatus::Pending => "pending",
            BonusStatus::Approved => "approved",
            BonusStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for BonusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BonusStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BonusStatus::Pending),
            "approved" => Ok(BonusStatus::Approved),
            "rejected" => Ok(BonusStatus::Rejected),
            other => Err(format!("unknown bonus status: {other}")),
        }
    }
}

/// Profile fields refreshed every time a user talks to the bot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl UserProfile {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_first_name(mut self, first_name: impl Into<String>) -> Self {
        self.first_name = Some(first_name.into());
        self
    }
}

/// Persisted user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub language: Language,
    pub is_verified: bool,

    /// Proof supplied with the latest bonus request. Erased on clear.
    pub phone_number: Option<String>,

    pub bonus_requested: bool,
    pub bonus_status: BonusStatus,
    pub bonus_request_count: u32,
    pub last_bonus_request_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl UserRecord {
    /// Fresh record for a user seen for the first time.
    pub fn new(profile: &UserProfile, now: DateTime<Utc>) -> Self {
        Self {
            user_id: profile.user_id,
            username: profile.username.clone(),
            first_name: profile.first_name.clone(),
            last_name: profile.last_name.clone(),
            language: Language::default(),
            is_verified: false,
            phone_number: None,
            bonus_requested: false,
            bonus_status: BonusStatus::Pending,
            bonus_request_count: 0,
            last_bonus_request_at: None,
            created_at: now,
            last_active: now,
        }
    }

    /// A request is pending while it was submitted and nobody resolved it yet.
    pub fn has_pending_request(&self) -> bool {
        self.bonus_requested && self.bonus_status == BonusStatus::Pending
    }

    pub fn bonus_state(&self) -> UserBonusState {
        UserBonusState {
            has_pending_request: self.has_pending_request(),
            last_request_at: self.last_bonus_request_at,
            request_count: self.bonus_request_count,
        }
    }

    /// Best human-readable label for admin reports.
    pub fn display_name(&self) -> &str {
        self.first_name
            .as_deref()
            .or(self.username.as_deref())
            .unwrap_or("Unknown")
    }
}

/// The part of a user record admission decisions are made from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserBonusState {
    pub has_pending_request: bool,
    pub last_request_at: Option<DateTime<Utc>>,
    pub request_count: u32,
}

/// Text of one notification per language. Users without a Turkish
/// preference get the English text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub tr: String,
    pub en: String,
}

impl LocalizedText {
    pub fn new(tr: impl Into<String>, en: impl Into<String>) -> Self {
        Self {
            tr: tr.into(),
            en: en.into(),
        }
    }

    pub fn for_language(&self, language: Language) -> &str {
        match language {
            Language::Tr => &self.tr,
            Language::En => &self.en,
        }
    }
}

/// Aggregate counters shown on the admin dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    pub total: u64,
    /// Users whose record was created on the requested (UTC) day.
    pub new_today: u64,
    pub verified: u64,
    pub phone_shared: u64,
    pub pending_requests: u64,
}

/// Progress of the jobs added by one `enqueue` call.
///
/// Every job of the call carries the same tracker, so a caller can follow
/// its own jobs on a queue that is shared with other producers.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    total: u64,
    delivered: AtomicU64,
    failed: AtomicU64,
    cleared: AtomicU64,
}

impl DeliveryTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total: total as u64,
            ..Default::default()
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    /// Jobs dropped by `clear()` before they were attempted to the end.
    pub fn cleared(&self) -> u64 {
        self.cleared.load(Ordering::SeqCst)
    }

    /// Every job reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.delivered() + self.failed() + self.cleared() >= self.total
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn record_cleared(&self) {
        self.cleared.fetch_add(1, Ordering::SeqCst);
    }
}

/// A unit of work consumed by the drain loop.
#[derive(Debug, Clone)]
pub struct SendJob {
    pub recipient: UserId,

    /// Shared between every job of one `enqueue` call.
    pub payload: Arc<str>,

    /// Shared between every job of one `enqueue` call.
    pub tracker: Arc<DeliveryTracker>,

    /// Failed attempts that were scheduled for retry so far.
    pub retries: u32,

    /// Retry budget after the initial attempt.
    pub max_retries: u32,
}

impl SendJob {
    /// Standalone job with a tracker of its own.
    pub fn new(recipient: UserId, payload: Arc<str>, max_retries: u32) -> Self {
        Self::tracked(recipient, payload, max_retries, Arc::new(DeliveryTracker::new(1)))
    }

    pub fn tracked(
        recipient: UserId,
        payload: Arc<str>,
        max_retries: u32,
        tracker: Arc<DeliveryTracker>,
    ) -> Self {
        Self {
            recipient,
            payload,
            tracker,
            retries: 0,
            max_retries,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retries < self.max_retries
    }
}

/// Point-in-time view of the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Jobs waiting in the FIFO for a future batch.
    pub queued: usize,

    /// Jobs of the current batch that have neither settled nor been re-queued.
    pub in_flight: usize,

    pub processing: bool,
}

impl QueueStatus {
    /// Jobs that have not reached a terminal state yet.
    pub fn pending_count(&self) -> usize {
        self.queued + self.in_flight
    }

    pub fn is_idle(&self) -> bool {
        !self.processing && self.pending_count() == 0
    }
}

/// Cumulative delivery counters since the queue was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub delivered: u64,
    pub failed: u64,
    pub retries: u64,
    pub batches: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_is_done_once_every_job_settles() {
        let tracker = DeliveryTracker::new(3);
        tracker.record_delivered();
        tracker.record_failed();
        assert!(!tracker.is_done());

        tracker.record_cleared();
        assert!(tracker.is_done());
        assert_eq!((tracker.delivered(), tracker.failed(), tracker.cleared()), (1, 1, 1));
    }

    #[test]
    fn localized_text_defaults_to_english() {
        let text = LocalizedText::new("merhaba", "hello");
        assert_eq!(text.for_language(Language::Tr), "merhaba");
        assert_eq!(text.for_language(Language::default()), "hello");
    }
}
