//! Bonus-request gating.
//!
//! A user may hold at most one pending request. Once it is resolved or
//! cleared, a cooldown measured from the last accepted request still has to
//! pass before the next one is admitted.
//!
//! The check ([`AdmissionController::can_request`]) and the act
//! ([`AdmissionController::record_request`]) are separate store calls. Two
//! near-simultaneous requests from the same user can both pass the check
//! before either is recorded; the second write then simply overwrites the
//! phone number and bumps the counter twice. Stores that need a hard
//! guarantee must make `record_bonus_request` conditional themselves.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::UserStore;
use crate::types::{BonusStatus, LocalizedText, UserBonusState, UserId, UserRecord};
use crate::worker::MessageSender;

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RejectReason {
    Pending,
    Cooldown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Pending => write!(f, "pending"),
            RejectReason::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Result of an admission check. Rejection is an expected outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdmissionDecision {
    Admitted,

    /// An earlier request is still waiting for an admin.
    Pending,

    /// The last request is too recent.
    Cooldown { wait_minutes: u32 },
}

impl AdmissionDecision {
    pub fn can_request(&self) -> bool {
        matches!(self, AdmissionDecision::Admitted)
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            AdmissionDecision::Admitted => None,
            AdmissionDecision::Pending => Some(RejectReason::Pending),
            AdmissionDecision::Cooldown { .. } => Some(RejectReason::Cooldown),
        }
    }

    pub fn wait_minutes(&self) -> Option<u32> {
        match self {
            AdmissionDecision::Cooldown { wait_minutes } => Some(*wait_minutes),
            _ => None,
        }
    }
}

/// Admin verdict on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Approved,
    Rejected,
}

impl From<Resolution> for BonusStatus {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Approved => BonusStatus::Approved,
            Resolution::Rejected => BonusStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    Resolved { status: BonusStatus },

    /// Status was no longer `pending`; nothing changed.
    AlreadyResolved { status: BonusStatus },

    /// The user never requested a bonus, or the request was cleared.
    NoRequest,

    NotFound,
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveOutcome::Resolved { status } => write!(f, "bonus request {status}"),
            ResolveOutcome::AlreadyResolved { status } => {
                write!(f, "bonus status is already: {status}")
            }
            ResolveOutcome::NoRequest => write!(f, "no bonus request to resolve"),
            ResolveOutcome::NotFound => write!(f, "user not found"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    Cleared,
    NothingToClear,
    NotFound,
}

/// Messages sent to a user once an admin rules on their request.
#[derive(Debug, Clone)]
pub struct ResolutionNotice {
    pub approved: LocalizedText,
    pub rejected: LocalizedText,
}

impl Default for ResolutionNotice {
    fn default() -> Self {
        Self {
            approved: LocalizedText::new(
                "✅ Bonus talebiniz onaylandı! Hesabınızı kontrol edin.",
                "✅ Your bonus request has been approved! Please check your account.",
            ),
            rejected: LocalizedText::new(
                "❌ Bonus talebiniz reddedildi. Daha fazla bilgi için destek ekibimizle iletişime geçin.",
                "❌ Your bonus request has been rejected. Please contact our support team for more information.",
            ),
        }
    }
}

impl ResolutionNotice {
    pub fn text(&self, status: BonusStatus) -> Option<&LocalizedText> {
        match status {
            BonusStatus::Approved => Some(&self.approved),
            BonusStatus::Rejected => Some(&self.rejected),
            BonusStatus::Pending => None,
        }
    }
}

/// Decide admission from a user's bonus state.
///
/// Elapsed time is floored to whole minutes before comparing, and the
/// comparison is strict: exactly `cooldown_minutes` after the last request
/// the user is admitted again. A last-request time in the future counts as
/// zero elapsed minutes.
pub fn evaluate(
    state: Option<&UserBonusState>,
    cooldown_minutes: u32,
    now: DateTime<Utc>,
) -> AdmissionDecision {
    let Some(state) = state else {
        return AdmissionDecision::Admitted;
    };

    if state.has_pending_request {
        return AdmissionDecision::Pending;
    }

    if let Some(last) = state.last_request_at {
        let elapsed = (now - last).num_minutes().max(0);
        let cooldown = i64::from(cooldown_minutes);
        if elapsed < cooldown {
            let wait_minutes = u32::try_from(cooldown - elapsed).unwrap_or(cooldown_minutes);
            return AdmissionDecision::Cooldown { wait_minutes };
        }
    }

    AdmissionDecision::Admitted
}

pub struct AdmissionController {
    store: Arc<dyn UserStore>,
    clock: Arc<dyn Clock>,
    notifier: Option<Arc<dyn MessageSender>>,
    notices: ResolutionNotice,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn UserStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            notifier: None,
            notices: ResolutionNotice::default(),
        }
    }

    /// Tell users about verdicts through `sender`. Delivery is best effort:
    /// a failed notice is logged and the verdict stands.
    pub fn with_notifier(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.notifier = Some(sender);
        self
    }

    pub fn with_notices(mut self, notices: ResolutionNotice) -> Self {
        self.notices = notices;
        self
    }

    pub async fn can_request(
        &self,
        user_id: UserId,
        cooldown_minutes: u32,
    ) -> Result<AdmissionDecision, StoreError> {
        let state = self.store.bonus_state(user_id).await?;
        let decision = evaluate(state.as_ref(), cooldown_minutes, self.clock.now());

        match decision {
            AdmissionDecision::Admitted => {}
            AdmissionDecision::Pending => {
                info!(%user_id, "bonus request blocked: already has pending request");
            }
            AdmissionDecision::Cooldown { wait_minutes } => {
                info!(%user_id, wait_minutes, "bonus request blocked: cooldown active");
            }
        }
        Ok(decision)
    }

    /// Record an admitted request together with the phone number proving it.
    pub async fn record_request(&self, user_id: UserId, phone_number: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        if !self.store.record_bonus_request(user_id, phone_number, now).await? {
            return Err(StoreError::UserNotFound(user_id));
        }
        info!(%user_id, "bonus request recorded");
        Ok(())
    }

    /// Check admission and, when admitted, record the request.
    ///
    /// See the module docs for the race between the two steps.
    pub async fn submit(
        &self,
        user_id: UserId,
        phone_number: &str,
        cooldown_minutes: u32,
    ) -> Result<AdmissionDecision, StoreError> {
        let decision = self.can_request(user_id, cooldown_minutes).await?;
        if decision.can_request() {
            self.record_request(user_id, phone_number).await?;
        }
        Ok(decision)
    }

    pub async fn resolve(
        &self,
        user_id: UserId,
        resolution: Resolution,
    ) -> Result<ResolveOutcome, StoreError> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(ResolveOutcome::NotFound);
        };

        if !user.bonus_requested {
            return Ok(ResolveOutcome::NoRequest);
        }

        if user.bonus_status != BonusStatus::Pending {
            return Ok(ResolveOutcome::AlreadyResolved {
                status: user.bonus_status,
            });
        }

        let status = BonusStatus::from(resolution);
        if !self.store.resolve_pending_request(user_id, status).await? {
            // Someone else ruled between the read and the write.
            return Ok(match self.store.find_user(user_id).await? {
                None => ResolveOutcome::NotFound,
                Some(user) if !user.bonus_requested => ResolveOutcome::NoRequest,
                Some(user) => ResolveOutcome::AlreadyResolved {
                    status: user.bonus_status,
                },
            });
        }

        info!(%user_id, %status, "bonus request resolved");
        self.notify(&user, status).await;
        Ok(ResolveOutcome::Resolved { status })
    }

    async fn notify(&self, user: &UserRecord, status: BonusStatus) {
        let (Some(sender), Some(text)) = (&self.notifier, self.notices.text(status)) else {
            return;
        };

        let message = text.for_language(user.language);
        if let Err(err) = sender.send(user.user_id, message).await {
            warn!(user_id = %user.user_id, error = %err, "could not notify user about bonus status");
        }
    }

    /// Reset the user's request and erase the phone number. The request
    /// counter and last request time survive, so the cooldown still applies.
    pub async fn clear(&self, user_id: UserId) -> Result<ClearOutcome, StoreError> {
        let Some(user) = self.store.find_user(user_id).await? else {
            return Ok(ClearOutcome::NotFound);
        };

        self.store.clear_bonus_request(user_id).await?;

        if user.bonus_requested {
            info!(%user_id, "bonus request cleared");
            Ok(ClearOutcome::Cleared)
        } else {
            Ok(ClearOutcome::NothingToClear)
        }
    }

    pub async fn clear_all_pending(&self) -> Result<u64, StoreError> {
        let cleared = self.store.clear_all_pending().await?;
        info!(cleared, "cleared all pending bonus requests");
        Ok(cleared)
    }

    pub async fn pending_requests(&self) -> Result<Vec<UserRecord>, StoreError> {
        self.store.pending_requests().await
    }
}
