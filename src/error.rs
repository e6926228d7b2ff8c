use thiserror::Error;

use crate::promotion::PromotionId;
use crate::types::UserId;

/// Reasons why a single send attempt failed.
///
/// Every variant is treated as transient by the dispatch queue:
/// the job is retried until its budget runs out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The destination throttled us.
    #[error("rate limited by destination")]
    RateLimited { retry_after_secs: Option<u64> },

    /// The destination refused the message (blocked bot, unknown chat, ...).
    #[error("message rejected: {0}")]
    Rejected(String),

    #[error("network error: {0}")]
    Network(String),
}

/// Errors raised by a user store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user not found: {0}")]
    UserNotFound(UserId),

    #[error("promotion not found: {0}")]
    PromotionNotFound(PromotionId),

    #[error("corrupt user record {user_id}: {reason}")]
    Corrupt { user_id: UserId, reason: String },

    #[error("corrupt promotion {id}: {reason}")]
    CorruptPromotion { id: PromotionId, reason: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Outcome of one attempt to deliver a send job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,

    /// Attempt failed and the job goes back to the queue.
    Retry(SendError),

    /// Attempt failed and the retry budget is spent.
    Exhausted(SendError),
}

impl DeliveryOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryOutcome::Retry(_))
    }
}
