//! Core of a promotional Telegram bot: paced broadcast delivery and
//! bonus-request admission.
//!
//! This crate provides a **single-process, in-memory, best-effort**
//! broadcast queue plus the bookkeeping that decides whether a user may
//! submit another bonus request.
//!
//! ## Guarantees
//! - Bounded concurrency: at most one batch in flight, at most
//!   `batch_size` sends at once
//! - Paced delivery with exponential backoff on failure
//! - Every enqueued job ends delivered, exhausted, or cleared
//! - At most one pending bonus request per user
//!
//! ## Non-Guarantees
//! - Durability of queued broadcasts across restarts
//! - Exactly-once delivery
//! - Atomic check-then-record for bonus requests (see [`admission`])
//!
//! Transports and storage are pluggable through [`MessageSender`],
//! [`UserStore`] and [`PromotionStore`]; a Bot API sender and Postgres
//! stores ship behind the `http` and `postgres` features.

pub mod admission;
mod broadcast;
mod clock;
mod error;
mod promotion;
mod queue;
mod rate_limit;
mod settings;
mod store;
mod types;
mod worker;

#[cfg(feature = "postgres")]
mod store_postgres;

#[cfg(feature = "postgres")]
mod promotion_postgres;

#[cfg(feature = "http")]
mod telegram;

pub use admission::{
    AdmissionController,
    AdmissionDecision,
    ClearOutcome,
    RejectReason,
    Resolution,
    ResolutionNotice,
    ResolveOutcome,
};
pub use broadcast::{BroadcastConfig, BroadcastReport, Broadcaster};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DeliveryOutcome, SendError, StoreError};
pub use promotion::{
    fallback_promotions,
    promotions_for,
    InMemoryPromotionStore,
    NewPromotion,
    Promotion,
    PromotionContent,
    PromotionId,
    PromotionStore,
    PromotionUpdate,
};
pub use queue::{retry_delay_for_attempt, DispatchConfig, DispatchQueue};
pub use rate_limit::{RateLimitConfig, RateLimiter, RateLimiterStats};
pub use settings::{DatabaseSettings, Settings};
pub use store::{InMemoryUserStore, UserStore};
pub use types::{
    BonusStatus,
    DeliveryTracker,
    Language,
    LocalizedText,
    QueueStats,
    QueueStatus,
    SendJob,
    UserBonusState,
    UserId,
    UserProfile,
    UserRecord,
    UserStats,
};
pub use worker::{process_job, DeliveryReport, MessageSender};

#[cfg(feature = "postgres")]
pub use store_postgres::PostgresUserStore;

#[cfg(feature = "postgres")]
pub use promotion_postgres::PostgresPromotionStore;

#[cfg(feature = "http")]
pub use telegram::TelegramSender;
