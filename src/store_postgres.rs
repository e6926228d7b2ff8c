use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio_postgres::{Client, Row};

use crate::error::StoreError;
use crate::store::UserStore;
use crate::types::{BonusStatus, Language, UserBonusState, UserId, UserProfile, UserRecord, UserStats};

const USER_COLUMNS: &str = "user_id, username, first_name, last_name, language, is_verified, \
     phone_number, bonus_requested, bonus_status, bonus_request_count, \
     last_bonus_request_at, created_at, last_active";

const PENDING: &str = "bonus_requested = TRUE AND bonus_status = 'pending'";

/// `tokio-postgres` backed user store.
pub struct PostgresUserStore {
    client: Client,
}

impl PostgresUserStore {
    /// Wrap a connected client, creating the `users` table if it is missing.
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS users (
                    user_id BIGINT PRIMARY KEY,
                    username TEXT,
                    first_name TEXT,
                    last_name TEXT,
                    language TEXT NOT NULL DEFAULT 'en',
                    is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                    phone_number TEXT,
                    bonus_requested BOOLEAN NOT NULL DEFAULT FALSE,
                    bonus_status TEXT NOT NULL DEFAULT 'pending',
                    bonus_request_count INTEGER NOT NULL DEFAULT 0,
                    last_bonus_request_at TIMESTAMPTZ,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    last_active TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
                )",
                &[],
            )
            .await?;

        Ok(Self { client })
    }

    async fn query_users(&self, filter: &str) -> Result<Vec<UserRecord>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users {filter}");
        let rows = self.client.query(sql.as_str(), &[]).await?;
        rows.iter().map(row_to_user).collect()
    }
}

fn row_to_user(row: &Row) -> Result<UserRecord, StoreError> {
    let user_id = UserId(row.try_get("user_id")?);
    let corrupt = |reason: String| StoreError::Corrupt { user_id, reason };

    let language: String = row.try_get("language")?;
    let status: String = row.try_get("bonus_status")?;

    Ok(UserRecord {
        user_id,
        username: row.try_get("username")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        language: language.parse::<Language>().map_err(corrupt)?,
        is_verified: row.try_get("is_verified")?,
        phone_number: row.try_get("phone_number")?,
        bonus_requested: row.try_get("bonus_requested")?,
        bonus_status: status.parse::<BonusStatus>().map_err(corrupt)?,
        bonus_request_count: request_count(row, user_id)?,
        last_bonus_request_at: row.try_get("last_bonus_request_at")?,
        created_at: row.try_get("created_at")?,
        last_active: row.try_get("last_active")?,
    })
}

fn request_count(row: &Row, user_id: UserId) -> Result<u32, StoreError> {
    checked_count(row.try_get("bonus_request_count")?, user_id)
}

fn checked_count(count: i32, user_id: UserId) -> Result<u32, StoreError> {
    u32::try_from(count).map_err(|e| StoreError::Corrupt {
        user_id,
        reason: format!("bonus_request_count {count}: {e}"),
    })
}

#[async_trait]
impl UserStore for PostgresUserStore {
    async fn upsert_user(&self, profile: &UserProfile, now: DateTime<Utc>) -> Result<UserRecord, StoreError> {
        let sql = format!(
            "INSERT INTO users (user_id, username, first_name, last_name, created_at, last_active)
             VALUES ($1, $2, $3, $4, $5, $5)
             ON CONFLICT (user_id) DO UPDATE SET
                username = EXCLUDED.username,
                first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name,
                last_active = EXCLUDED.last_active
             RETURNING {USER_COLUMNS}"
        );
        let row = self
            .client
            .query_one(
                sql.as_str(),
                &[
                    &profile.user_id.0,
                    &profile.username,
                    &profile.first_name,
                    &profile.last_name,
                    &now,
                ],
            )
            .await?;
        row_to_user(&row)
    }

    async fn find_user(&self, user_id: UserId) -> Result<Option<UserRecord>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1");
        let row = self.client.query_opt(sql.as_str(), &[&user_id.0]).await?;
        row.as_ref().map(row_to_user).transpose()
    }

    async fn bonus_state(&self, user_id: UserId) -> Result<Option<UserBonusState>, StoreError> {
        let sql = format!(
            "SELECT ({PENDING}) AS pending, last_bonus_request_at, bonus_request_count
             FROM users WHERE user_id = $1"
        );
        let row = self.client.query_opt(sql.as_str(), &[&user_id.0]).await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(UserBonusState {
            has_pending_request: row.try_get("pending")?,
            last_request_at: row.try_get("last_bonus_request_at")?,
            request_count: request_count(&row, user_id)?,
        }))
    }

    async fn set_language(&self, user_id: UserId, language: Language) -> Result<bool, StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE users SET language = $1 WHERE user_id = $2",
                &[&language.as_str(), &user_id.0],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn mark_verified(&self, user_id: UserId) -> Result<bool, StoreError> {
        let updated = self
            .client
            .execute("UPDATE users SET is_verified = TRUE WHERE user_id = $1", &[&user_id.0])
            .await?;
        Ok(updated > 0)
    }

    async fn record_bonus_request(
        &self,
        user_id: UserId,
        phone_number: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE users
                 SET phone_number = $1,
                     bonus_requested = TRUE,
                     bonus_status = 'pending',
                     bonus_request_count = bonus_request_count + 1,
                     last_bonus_request_at = $2
                 WHERE user_id = $3",
                &[&phone_number, &at, &user_id.0],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn resolve_pending_request(&self, user_id: UserId, status: BonusStatus) -> Result<bool, StoreError> {
        let sql = format!("UPDATE users SET bonus_status = $1 WHERE user_id = $2 AND {PENDING}");
        let updated = self
            .client
            .execute(sql.as_str(), &[&status.as_str(), &user_id.0])
            .await?;
        Ok(updated > 0)
    }

    async fn clear_bonus_request(&self, user_id: UserId) -> Result<bool, StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE users
                 SET bonus_requested = FALSE, bonus_status = 'pending', phone_number = NULL
                 WHERE user_id = $1",
                &[&user_id.0],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn clear_all_pending(&self) -> Result<u64, StoreError> {
        let sql = format!(
            "UPDATE users
             SET bonus_requested = FALSE, bonus_status = 'pending', phone_number = NULL
             WHERE {PENDING}"
        );
        Ok(self.client.execute(sql.as_str(), &[]).await?)
    }

    async fn pending_requests(&self) -> Result<Vec<UserRecord>, StoreError> {
        let filter = format!("WHERE {PENDING} ORDER BY last_bonus_request_at DESC NULLS LAST");
        self.query_users(&filter).await
    }

    async fn all_users(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.query_users("ORDER BY user_id").await
    }

    async fn all_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        let rows = self
            .client
            .query("SELECT user_id FROM users ORDER BY user_id", &[])
            .await?;
        rows.iter()
            .map(|row| Ok(UserId(row.try_get(0)?)))
            .collect()
    }

    async fn stats(&self, today: NaiveDate) -> Result<UserStats, StoreError> {
        let sql = format!(
            "SELECT COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE (created_at AT TIME ZONE 'UTC')::date = $1) AS new_today,
                    COUNT(*) FILTER (WHERE is_verified) AS verified,
                    COUNT(*) FILTER (WHERE phone_number IS NOT NULL) AS phone_shared,
                    COUNT(*) FILTER (WHERE {PENDING}) AS pending_requests
             FROM users"
        );
        let row = self.client.query_one(sql.as_str(), &[&today]).await?;

        let count = |name: &str| -> Result<u64, StoreError> {
            let value: i64 = row.try_get(name)?;
            Ok(value.max(0) as u64)
        };
        Ok(UserStats {
            total: count("total")?,
            new_today: count("new_today")?,
            verified: count("verified")?,
            phone_shared: count("phone_shared")?,
            pending_requests: count("pending_requests")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_request_count_is_corrupt() {
        assert_eq!(checked_count(3, UserId(1)).unwrap(), 3);

        let err = checked_count(-1, UserId(7)).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { user_id: UserId(7), .. }));
    }
}
