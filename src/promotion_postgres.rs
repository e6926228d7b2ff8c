use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::{Client, Row};

use crate::error::StoreError;
use crate::promotion::{NewPromotion, Promotion, PromotionId, PromotionStore, PromotionUpdate};
use crate::types::Language;

const PROMOTION_COLUMNS: &str =
    "id, language, title, description, details, is_active, display_order, created_at, updated_at";

/// `tokio-postgres` backed promotion store.
pub struct PostgresPromotionStore {
    client: Client,
}

impl PostgresPromotionStore {
    /// Wrap a connected client, creating the `promotions` table and its
    /// language index if they are missing.
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS promotions (
                    id BIGSERIAL PRIMARY KEY,
                    language TEXT NOT NULL,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    details TEXT NOT NULL DEFAULT '',
                    is_active BOOLEAN NOT NULL DEFAULT TRUE,
                    display_order INTEGER NOT NULL DEFAULT 0,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
                );
                CREATE INDEX IF NOT EXISTS idx_promotions_language
                    ON promotions(language, is_active);",
            )
            .await?;

        Ok(Self { client })
    }
}

fn row_to_promotion(row: &Row) -> Result<Promotion, StoreError> {
    let id = PromotionId(row.try_get("id")?);
    let language: String = row.try_get("language")?;

    Ok(Promotion {
        id,
        language: language
            .parse::<Language>()
            .map_err(|reason| StoreError::CorruptPromotion { id, reason })?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        details: row.try_get("details")?,
        is_active: row.try_get("is_active")?,
        display_order: row.try_get("display_order")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl PromotionStore for PostgresPromotionStore {
    async fn list(&self, language: Language, active_only: bool) -> Result<Vec<Promotion>, StoreError> {
        let sql = format!(
            "SELECT {PROMOTION_COLUMNS} FROM promotions
             WHERE language = $1 AND (is_active OR NOT $2)
             ORDER BY display_order, id"
        );
        let rows = self
            .client
            .query(sql.as_str(), &[&language.as_str(), &active_only])
            .await?;
        rows.iter().map(row_to_promotion).collect()
    }

    async fn create(&self, promotion: &NewPromotion, now: DateTime<Utc>) -> Result<Promotion, StoreError> {
        let sql = format!(
            "INSERT INTO promotions (language, title, description, details, display_order, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $6)
             RETURNING {PROMOTION_COLUMNS}"
        );
        let row = self
            .client
            .query_one(
                sql.as_str(),
                &[
                    &promotion.language.as_str(),
                    &promotion.title,
                    &promotion.description,
                    &promotion.details,
                    &promotion.display_order,
                    &now,
                ],
            )
            .await?;
        row_to_promotion(&row)
    }

    async fn update(
        &self,
        id: PromotionId,
        update: &PromotionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Promotion, StoreError> {
        let sql = format!(
            "UPDATE promotions
             SET title = COALESCE($1, title),
                 description = COALESCE($2, description),
                 details = COALESCE($3, details),
                 display_order = COALESCE($4, display_order),
                 updated_at = $5
             WHERE id = $6
             RETURNING {PROMOTION_COLUMNS}"
        );
        let row = self
            .client
            .query_opt(
                sql.as_str(),
                &[
                    &update.title,
                    &update.description,
                    &update.details,
                    &update.display_order,
                    &now,
                    &id.0,
                ],
            )
            .await?;

        match row {
            Some(row) => row_to_promotion(&row),
            None => Err(StoreError::PromotionNotFound(id)),
        }
    }

    async fn delete(&self, id: PromotionId) -> Result<bool, StoreError> {
        let deleted = self
            .client
            .execute("DELETE FROM promotions WHERE id = $1", &[&id.0])
            .await?;
        Ok(deleted > 0)
    }

    async fn set_active(&self, id: PromotionId, active: bool, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE promotions SET is_active = $1, updated_at = $2 WHERE id = $3",
                &[&active, &now, &id.0],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn clear_all(&self, language: Language) -> Result<u64, StoreError> {
        Ok(self
            .client
            .execute("DELETE FROM promotions WHERE language = $1", &[&language.as_str()])
            .await?)
    }
}
