//! Promotions shown to users, managed by admins per language.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::types::Language;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromotionId(pub i64);

impl fmt::Display for PromotionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub id: PromotionId,
    pub language: Language,
    pub title: String,
    pub description: String,
    pub details: String,
    pub is_active: bool,
    /// Lower values are listed first; ties fall back to the id.
    pub display_order: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields of a promotion an admin creates. New promotions start active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPromotion {
    pub language: Language,
    pub title: String,
    pub description: String,
    pub details: String,
    pub display_order: i32,
}

impl NewPromotion {
    /// Surrounding whitespace of the admin's input is dropped.
    pub fn new(
        language: Language,
        title: impl AsRef<str>,
        description: impl AsRef<str>,
        details: impl AsRef<str>,
    ) -> Self {
        Self {
            language,
            title: title.as_ref().trim().to_string(),
            description: description.as_ref().trim().to_string(),
            details: details.as_ref().trim().to_string(),
            display_order: 0,
        }
    }

    pub fn with_display_order(mut self, display_order: i32) -> Self {
        self.display_order = display_order;
        self
    }
}

/// Partial edit; `None` leaves the field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub details: Option<String>,
    pub display_order: Option<i32>,
}

/// What a user sees of a promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionContent {
    pub title: String,
    pub description: String,
    pub details: String,
}

impl From<Promotion> for PromotionContent {
    fn from(promotion: Promotion) -> Self {
        Self {
            title: promotion.title,
            description: promotion.description,
            details: promotion.details,
        }
    }
}

#[async_trait]
pub trait PromotionStore: Send + Sync {
    /// Promotions of one language ordered by `display_order`, then id.
    async fn list(&self, language: Language, active_only: bool) -> Result<Vec<Promotion>, StoreError>;

    async fn create(&self, promotion: &NewPromotion, now: DateTime<Utc>) -> Result<Promotion, StoreError>;

    /// Fails with [`StoreError::PromotionNotFound`] for an unknown id.
    async fn update(
        &self,
        id: PromotionId,
        update: &PromotionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Promotion, StoreError>;

    async fn delete(&self, id: PromotionId) -> Result<bool, StoreError>;

    async fn set_active(&self, id: PromotionId, active: bool, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete every promotion of `language`, returning how many were removed.
    async fn clear_all(&self, language: Language) -> Result<u64, StoreError>;
}

#[derive(Default)]
struct PromotionTable {
    next_id: i64,
    rows: BTreeMap<PromotionId, Promotion>,
}

#[derive(Default)]
pub struct InMemoryPromotionStore {
    table: RwLock<PromotionTable>,
}

impl InMemoryPromotionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PromotionStore for InMemoryPromotionStore {
    async fn list(&self, language: Language, active_only: bool) -> Result<Vec<Promotion>, StoreError> {
        let table = self.table.read().await;
        let mut promotions: Vec<Promotion> = table
            .rows
            .values()
            .filter(|p| p.language == language && (p.is_active || !active_only))
            .cloned()
            .collect();
        promotions.sort_by_key(|p| (p.display_order, p.id));
        Ok(promotions)
    }

    async fn create(&self, promotion: &NewPromotion, now: DateTime<Utc>) -> Result<Promotion, StoreError> {
        let mut table = self.table.write().await;
        table.next_id += 1;
        let created = Promotion {
            id: PromotionId(table.next_id),
            language: promotion.language,
            title: promotion.title.clone(),
            description: promotion.description.clone(),
            details: promotion.details.clone(),
            is_active: true,
            display_order: promotion.display_order,
            created_at: now,
            updated_at: now,
        };
        table.rows.insert(created.id, created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        id: PromotionId,
        update: &PromotionUpdate,
        now: DateTime<Utc>,
    ) -> Result<Promotion, StoreError> {
        let mut table = self.table.write().await;
        let promotion = table
            .rows
            .get_mut(&id)
            .ok_or(StoreError::PromotionNotFound(id))?;

        if let Some(title) = &update.title {
            promotion.title = title.clone();
        }
        if let Some(description) = &update.description {
            promotion.description = description.clone();
        }
        if let Some(details) = &update.details {
            promotion.details = details.clone();
        }
        if let Some(order) = update.display_order {
            promotion.display_order = order;
        }
        promotion.updated_at = now;
        Ok(promotion.clone())
    }

    async fn delete(&self, id: PromotionId) -> Result<bool, StoreError> {
        Ok(self.table.write().await.rows.remove(&id).is_some())
    }

    async fn set_active(&self, id: PromotionId, active: bool, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(promotion) => {
                promotion.is_active = active;
                promotion.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn clear_all(&self, language: Language) -> Result<u64, StoreError> {
        let mut table = self.table.write().await;
        let before = table.rows.len();
        table.rows.retain(|_, p| p.language != language);
        let removed = (before - table.rows.len()) as u64;
        info!(language = language.as_str(), removed, "cleared promotions");
        Ok(removed)
    }
}

/// Built-in promotions used while the store has none for a language.
pub fn fallback_promotions(language: Language) -> Vec<PromotionContent> {
    match language {
        Language::Tr => vec![
            PromotionContent {
                title: "Hoş Geldin Bonusu".to_string(),
                description: "Yeni üyelere özel %100 hoş geldin bonusu!".to_string(),
                details: "İlk yatırımınızda %100 bonus kazanın. Minimum yatırım: 100 TL".to_string(),
            },
            PromotionContent {
                title: "Haftalık Cashback".to_string(),
                description: "Her hafta %10 cashback kazanın!".to_string(),
                details: "Haftalık kayıplarınızın %10'unu geri kazanın. Maksimum cashback: 500 TL"
                    .to_string(),
            },
        ],
        Language::En => Vec::new(),
    }
}

/// Active promotions for `language`, or the built-in list when the store
/// has none or cannot be read.
pub async fn promotions_for(store: &dyn PromotionStore, language: Language) -> Vec<PromotionContent> {
    match store.list(language, true).await {
        Ok(promotions) if !promotions.is_empty() => {
            promotions.into_iter().map(PromotionContent::from).collect()
        }
        Ok(_) => fallback_promotions(language),
        Err(err) => {
            warn!(error = %err, "failed to load promotions, using fallback");
            fallback_promotions(language)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn lists_by_display_order_then_id() {
        let store = InMemoryPromotionStore::new();
        let late = store
            .create(&NewPromotion::new(Language::Tr, "b", "", "").with_display_order(5), t0())
            .await
            .unwrap();
        let first = store.create(&NewPromotion::new(Language::Tr, "a", "", ""), t0()).await.unwrap();
        let second = store.create(&NewPromotion::new(Language::Tr, "c", "", ""), t0()).await.unwrap();
        store.create(&NewPromotion::new(Language::En, "en", "", ""), t0()).await.unwrap();

        let ids: Vec<PromotionId> = store
            .list(Language::Tr, false)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id, late.id]);
    }

    #[tokio::test]
    async fn active_filter_hides_deactivated() {
        let store = InMemoryPromotionStore::new();
        let kept = store.create(&NewPromotion::new(Language::En, "kept", "", ""), t0()).await.unwrap();
        let hidden = store.create(&NewPromotion::new(Language::En, "hidden", "", ""), t0()).await.unwrap();

        assert!(store.set_active(hidden.id, false, t0()).await.unwrap());
        assert!(!store.set_active(PromotionId(99), false, t0()).await.unwrap());

        let active = store.list(Language::En, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, kept.id);
        assert_eq!(store.list(Language::En, false).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_is_partial_and_rejects_unknown_id() {
        let store = InMemoryPromotionStore::new();
        let promo = store
            .create(&NewPromotion::new(Language::Tr, "  Title ", "desc", "details"), t0())
            .await
            .unwrap();
        assert_eq!(promo.title, "Title");

        let later = t0() + chrono::Duration::hours(1);
        let update = PromotionUpdate {
            description: Some("new desc".to_string()),
            ..Default::default()
        };
        let updated = store.update(promo.id, &update, later).await.unwrap();
        assert_eq!(updated.title, "Title");
        assert_eq!(updated.description, "new desc");
        assert_eq!(updated.updated_at, later);
        assert_eq!(updated.created_at, t0());

        let err = store.update(PromotionId(42), &update, later).await.unwrap_err();
        assert!(matches!(err, StoreError::PromotionNotFound(PromotionId(42))));
    }

    #[tokio::test]
    async fn clear_all_only_touches_one_language() {
        let store = InMemoryPromotionStore::new();
        for title in ["a", "b"] {
            store.create(&NewPromotion::new(Language::Tr, title, "", ""), t0()).await.unwrap();
        }
        let en = store.create(&NewPromotion::new(Language::En, "en", "", ""), t0()).await.unwrap();

        assert_eq!(store.clear_all(Language::Tr).await.unwrap(), 2);
        assert!(store.list(Language::Tr, false).await.unwrap().is_empty());
        assert!(store.delete(en.id).await.unwrap());
        assert!(!store.delete(en.id).await.unwrap());
    }

    #[tokio::test]
    async fn catalog_falls_back_when_store_is_empty() {
        let store = InMemoryPromotionStore::new();
        assert_eq!(promotions_for(&store, Language::Tr).await.len(), 2);

        store
            .create(&NewPromotion::new(Language::Tr, "Only", "one", "here"), t0())
            .await
            .unwrap();
        let shown = promotions_for(&store, Language::Tr).await;
        assert_eq!(shown.len(), 1);
        assert_eq!(shown[0].title, "Only");
    }
}
