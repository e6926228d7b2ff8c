use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{BonusStatus, Language, UserBonusState, UserId, UserProfile, UserRecord, UserStats};

/// Persisted user records.
///
/// Point updates return `Ok(false)` when the user does not exist, mirroring
/// an `UPDATE` that matched no row.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user or refresh the profile fields and `last_active` of an existing one.
    async fn upsert_user(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<UserRecord, StoreError>;

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError>;

    async fn bonus_state(&self, user_id: UserId) -> Result<Option<UserBonusState>, StoreError> {
        Ok(self.find_user(user_id).await?.map(|user| user.bonus_state()))
    }

    async fn set_language(&self, user_id: UserId, language: Language) -> Result<bool, StoreError>;

    async fn mark_verified(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Open a new pending request: stores the phone number, sets the pending
    /// flag and status, bumps the counter and stamps the request time.
    async fn record_bonus_request(
        &self,
        user_id: UserId,
        phone_number: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Set the verdict on a pending request. Matches only while the request
    /// is still pending, so of two concurrent verdicts exactly one lands.
    async fn resolve_pending_request(&self, user_id: UserId, status: BonusStatus) -> Result<bool, StoreError>;

    /// Drop the pending flag and phone number. The request counter and
    /// last request time are kept.
    async fn clear_bonus_request(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Clear every pending request, returning how many were cleared.
    async fn clear_all_pending(&self) -> Result<u64, StoreError>;

    /// Users with a pending request, most recent request first.
    async fn pending_requests(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError>;

    async fn all_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(self.all_users().await?.into_iter().map(|u| u.user_id).collect())
    }

    /// Dashboard counters; `new_today` counts records created on `today` (UTC).
    async fn stats(&self, today: NaiveDate) -> Result<UserStats, StoreError>;
}

/// In-memory store for tests and lightweight deployments.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a fully formed record, replacing any existing one.
    pub async fn insert(&self, user: UserRecord) {
        self.users.write().await.insert(user.user_id, user);
    }

    async fn update<F>(&self, user_id: UserId, apply: F) -> bool
    where
        F: FnOnce(&mut UserRecord) + Send,
    {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(user) => {
                apply(user);
                true
            }
            None => false,
        }
    }
}

fn reset_request(user: &mut UserRecord) {
    user.bonus_requested = false;
    user.bonus_status = BonusStatus::Pending;
    user.phone_number = None;
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn upsert_user(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .entry(profile.user_id)
            .and_modify(|user| {
                user.username = profile.username.clone();
                user.first_name = profile.first_name.clone();
                user.last_name = profile.last_name.clone();
                user.last_active = now;
            })
            .or_insert_with(|| UserRecord::new(profile, now));
        Ok(user.clone())
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn set_language(&self, user_id: UserId, language: Language) -> Result<bool, StoreError> {
        Ok(self.update(user_id, |user| user.language = language).await)
    }

    async fn mark_verified(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.update(user_id, |user| user.is_verified = true).await)
    }

    async fn record_bonus_request(
        &self,
        user_id: UserId,
        phone_number: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self
            .update(user_id, |user| {
                user.phone_number = Some(phone_number.to_string());
                user.bonus_requested = true;
                user.bonus_status = BonusStatus::Pending;
                user.bonus_request_count = user.bonus_request_count.saturating_add(1);
                user.last_bonus_request_at = Some(at);
            })
            .await)
    }

    async fn resolve_pending_request(&self, user_id: UserId, status: BonusStatus) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&user_id) {
            Some(user) if user.has_pending_request() => {
                user.bonus_status = status;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn clear_bonus_request(&self, user_id: UserId) -> Result<bool, StoreError> {
        Ok(self.update(user_id, reset_request).await)
    }

    async fn clear_all_pending(&self) -> Result<u64, StoreError> {
        let mut users = self.users.write().await;
        let mut cleared = 0;
        for user in users.values_mut().filter(|u| u.has_pending_request()) {
            reset_request(user);
            cleared += 1;
        }
        Ok(cleared)
    }

    async fn pending_requests(&self) -> Result<Vec<UserRecord>, StoreError> {
        let users = self.users.read().await;
        let mut pending: Vec<UserRecord> = users
            .values()
            .filter(|u| u.has_pending_request())
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.last_bonus_request_at.cmp(&a.last_bonus_request_at));
        Ok(pending)
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        let users = self.users.read().await;
        let mut all: Vec<UserRecord> = users.values().cloned().collect();
        all.sort_by_key(|u| u.user_id);
        Ok(all)
    }

    async fn stats(&self, today: NaiveDate) -> Result<UserStats, StoreError> {
        let users = self.users.read().await;
        let mut stats = UserStats {
            total: users.len() as u64,
            ..Default::default()
        };
        for user in users.values() {
            stats.new_today += u64::from(user.created_at.date_naive() == today);
            stats.verified += u64::from(user.is_verified);
            stats.phone_shared += u64::from(user.phone_number.is_some());
            stats.pending_requests += u64::from(user.has_pending_request());
        }
        Ok(stats)
    }
}
