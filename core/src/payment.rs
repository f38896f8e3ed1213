//! Payment state machine.
//!
//! ```text
//! INITIATED --approved (immediate)--> COMMITTED
//! INITIATED --approved (deferred)---> AUTHORIZED --capture--> CAPTURED
//! INITIATED --declined / rejected---> FAILED
//! INITIATED --buyer aborted---------> ABORTED
//! INITIATED | AUTHORIZED --void-----> VOIDED
//! COMMITTED | CAPTURED --refund-----> REFUNDED (once fully refunded)
//! FAILED | ABORTED | VOIDED --reinitiate--> INITIATED
//! ```
//!
//! A settled payment (`AUTHORIZED`, `CAPTURED`, `COMMITTED`) never returns to an
//! earlier state. Repeating an action whose target is the current status is a
//! no-op, which makes duplicate gateway callbacks harmless.

use crate::catalog::UnknownVariant;
use crate::environment::Clock;
use crate::error::TransitionError;
use crate::money::Money;
use crate::reducer::{Effects, Reducer};
use crate::reservation::CancelReason;
use crate::types::{PaymentId, PurchaseGroupId, ReservationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Payment lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created at the gateway, waiting for the buyer.
    Initiated,
    /// Approved, funds held until capture.
    Authorized,
    /// Authorized funds captured.
    Captured,
    /// Approved and captured in one step.
    Committed,
    /// Canceled before capture.
    Voided,
    /// Declined by the gateway or rejected locally.
    Failed,
    /// Buyer abandoned the gateway form.
    Aborted,
    /// Fully refunded.
    Refunded,
}

impl PaymentStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Authorized => "AUTHORIZED",
            Self::Captured => "CAPTURED",
            Self::Committed => "COMMITTED",
            Self::Voided => "VOIDED",
            Self::Failed => "FAILED",
            Self::Aborted => "ABORTED",
            Self::Refunded => "REFUNDED",
        }
    }

    /// The gateway approved the charge.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Authorized | Self::Captured | Self::Committed)
    }

    /// Funds can be refunded from this status.
    #[must_use]
    pub const fn is_refundable(self) -> bool {
        matches!(self, Self::Captured | Self::Committed)
    }

    /// A failed attempt that a new `create` may overwrite.
    #[must_use]
    pub const fn is_reusable(self) -> bool {
        matches!(self, Self::Initiated | Self::Failed | Self::Aborted | Self::Voided)
    }

    /// No gateway callback can change this status any more.
    #[must_use]
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::Initiated)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INITIATED" => Ok(Self::Initiated),
            "AUTHORIZED" => Ok(Self::Authorized),
            "CAPTURED" => Ok(Self::Captured),
            "COMMITTED" => Ok(Self::Committed),
            "VOIDED" => Ok(Self::Voided),
            "FAILED" => Ok(Self::Failed),
            "ABORTED" => Ok(Self::Aborted),
            "REFUNDED" => Ok(Self::Refunded),
            other => Err(UnknownVariant::new("PaymentStatus", other)),
        }
    }
}

/// The single payment row of a purchase group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment ID
    pub id: PaymentId,
    /// Lead reservation of the group
    pub reservation_id: ReservationId,
    /// Purchase group being paid
    pub purchase_group_id: PurchaseGroupId,
    /// Sum of the group's amounts
    pub amount: Money,
    /// Current status
    pub status: PaymentStatus,
    /// Gateway transaction token
    pub token: Option<String>,
    /// Order reference sent to the gateway; regenerated on every attempt
    pub buy_order: String,
    /// Gateway session reference
    pub session_id: String,
    /// Total refunded so far
    pub refunded: Money,
    /// Gateway authorization code
    pub authorization_code: Option<String>,
    /// Gateway response code
    pub response_code: Option<i32>,
    /// Last four card digits
    pub card_last4: Option<String>,
    /// Why the payment failed
    pub failure_reason: Option<String>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last modified at
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// `amount - refunded`
    #[must_use]
    pub const fn refundable(&self) -> Money {
        self.amount.saturating_sub(self.refunded)
    }

    /// Resolves a refund request against the remaining balance.
    ///
    /// `None` means "everything left".
    ///
    /// # Errors
    ///
    /// Fails if the payment is not refundable, the amount is zero, or the
    /// amount exceeds the remaining balance.
    pub fn validate_refund(&self, requested: Option<Money>) -> Result<Money, TransitionError> {
        if !self.status.is_refundable() {
            return Err(TransitionError::invalid("payment", self.status.as_str(), "refund"));
        }
        let refundable = self.refundable();
        let amount = requested.unwrap_or(refundable);
        if amount.is_zero() {
            return Err(TransitionError::NonPositiveRefund);
        }
        if amount > refundable {
            return Err(TransitionError::RefundExceedsBalance {
                requested: amount,
                refundable,
            });
        }
        Ok(amount)
    }
}

/// Order reference for a payment attempt.
///
/// The first eight hex digits of the lead reservation plus the attempt time in
/// milliseconds, which keeps it unique per attempt and within the gateway's
/// 26 character limit.
#[must_use]
pub fn buy_order_for(reservation_id: ReservationId, at: DateTime<Utc>) -> String {
    let simple = reservation_id.as_uuid().simple().to_string();
    format!("O-{}-{}", &simple[..8], at.timestamp_millis())
}

/// Session reference for a payment attempt.
#[must_use]
pub fn session_id_for(purchase_group_id: PurchaseGroupId, at: DateTime<Utc>) -> String {
    let simple = purchase_group_id.as_uuid().simple().to_string();
    format!("S-{}-{}", &simple[..8], at.timestamp_millis())
}

/// Why a payment was failed locally without asking the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The buyer is the organizer of the event
    OwnEvent,
    /// The hold expired before the commit arrived
    HoldExpired,
}

impl Rejection {
    /// Stored as the payment's failure reason
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OwnEvent => "buyer is the event organizer",
            Self::HoldExpired => "reservation expired before payment",
        }
    }

    const fn cancel_reason(self) -> CancelReason {
        match self {
            Self::OwnEvent => CancelReason::OwnEvent,
            Self::HoldExpired => CancelReason::PaymentFailed,
        }
    }
}

/// What the gateway reported for an approved commit.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Approval {
    /// Gateway authorization code
    pub authorization_code: Option<String>,
    /// Gateway response code
    pub response_code: Option<i32>,
    /// Last four card digits
    pub card_last4: Option<String>,
}

/// Inputs to the payment state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentAction {
    /// Start a fresh attempt, overwriting a failed one.
    Reinitiate {
        /// Amount to charge
        amount: Money,
        /// New order reference
        buy_order: String,
        /// New session reference
        session_id: String,
    },
    /// Gateway approved the commit.
    GatewayApproved {
        /// Hold funds for a later capture instead of capturing now
        deferred_capture: bool,
        /// Gateway details
        approval: Approval,
    },
    /// Gateway declined the commit.
    GatewayDeclined {
        /// Gateway response code
        response_code: Option<i32>,
    },
    /// Rejected locally without asking the gateway.
    Reject {
        /// Why
        reason: Rejection,
    },
    /// Buyer abandoned the gateway form.
    Abort,
    /// Capture previously authorized funds.
    Capture,
    /// Cancel before capture.
    Void,
    /// Gateway confirmed a refund of `amount`.
    Refunded {
        /// Amount refunded by this call
        amount: Money,
    },
}

/// Writes the caller must perform after a payment transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PaymentEffect {
    /// Settle every reservation in the group
    SettleGroup(PurchaseGroupId),
    /// Cancel the still-pending reservations of the group
    ReleaseGroup {
        /// Group to release
        purchase_group_id: PurchaseGroupId,
        /// Recorded on each reservation
        reason: CancelReason,
    },
    /// Reverse a settlement whose funds were never captured
    RevokeGroup(PurchaseGroupId),
}

/// Environment for [`PaymentReducer`]
#[derive(Clone)]
pub struct PaymentEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl PaymentEnvironment {
    /// Creates the environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Transition rules for [`Payment`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PaymentReducer;

impl PaymentReducer {
    fn refuse(from: PaymentStatus, action: &'static str) -> TransitionError {
        TransitionError::invalid("payment", from.as_str(), action)
    }
}

impl Reducer for PaymentReducer {
    type State = Payment;
    type Action = PaymentAction;
    type Effect = PaymentEffect;
    type Error = TransitionError;
    type Environment = PaymentEnvironment;

    #[allow(clippy::too_many_lines)]
    fn reduce(
        &self,
        state: &mut Payment,
        action: PaymentAction,
        env: &PaymentEnvironment,
    ) -> Result<Effects<PaymentEffect>, TransitionError> {
        use PaymentStatus as S;

        let now = env.clock.now();
        let from = state.status;
        let group = state.purchase_group_id;

        match action {
            PaymentAction::Reinitiate {
                amount,
                buy_order,
                session_id,
            } => {
                if !from.is_reusable() {
                    return Err(Self::refuse(from, "reinitiate"));
                }
                state.status = S::Initiated;
                state.amount = amount;
                state.buy_order = buy_order;
                state.session_id = session_id;
                state.token = None;
                state.refunded = Money::ZERO;
                state.authorization_code = None;
                state.response_code = None;
                state.card_last4 = None;
                state.failure_reason = None;
                state.updated_at = now;
                Ok(Effects::new())
            }

            PaymentAction::GatewayApproved {
                deferred_capture,
                approval,
            } => match from {
                S::Initiated => {
                    state.status = if deferred_capture { S::Authorized } else { S::Committed };
                    state.authorization_code = approval.authorization_code;
                    state.response_code = approval.response_code;
                    state.card_last4 = approval.card_last4;
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::SettleGroup(group)])
                }
                S::Authorized | S::Captured | S::Committed => Ok(Effects::new()),
                S::Voided | S::Failed | S::Aborted | S::Refunded => Err(Self::refuse(from, "approve")),
            },

            PaymentAction::GatewayDeclined { response_code } => match from {
                S::Initiated => {
                    state.status = S::Failed;
                    state.response_code = response_code;
                    state.failure_reason = Some("declined by gateway".to_string());
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::ReleaseGroup {
                        purchase_group_id: group,
                        reason: CancelReason::PaymentFailed,
                    }])
                }
                S::Failed => Ok(Effects::new()),
                _ => Err(Self::refuse(from, "decline")),
            },

            PaymentAction::Reject { reason } => match from {
                S::Initiated => {
                    state.status = S::Failed;
                    state.failure_reason = Some(reason.as_str().to_string());
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::ReleaseGroup {
                        purchase_group_id: group,
                        reason: reason.cancel_reason(),
                    }])
                }
                S::Failed => Ok(Effects::new()),
                _ => Err(Self::refuse(from, "reject")),
            },

            PaymentAction::Abort => match from {
                S::Initiated => {
                    state.status = S::Aborted;
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::ReleaseGroup {
                        purchase_group_id: group,
                        reason: CancelReason::PaymentFailed,
                    }])
                }
                S::Aborted => Ok(Effects::new()),
                _ => Err(Self::refuse(from, "abort")),
            },

            PaymentAction::Capture => match from {
                S::Authorized => {
                    state.status = S::Captured;
                    state.updated_at = now;
                    Ok(Effects::new())
                }
                S::Captured => Ok(Effects::new()),
                _ => Err(Self::refuse(from, "capture")),
            },

            PaymentAction::Void => match from {
                S::Initiated => {
                    state.status = S::Voided;
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::ReleaseGroup {
                        purchase_group_id: group,
                        reason: CancelReason::Admin,
                    }])
                }
                S::Authorized => {
                    state.status = S::Voided;
                    state.updated_at = now;
                    Ok(smallvec![PaymentEffect::RevokeGroup(group)])
                }
                S::Voided => Ok(Effects::new()),
                _ => Err(Self::refuse(from, "void")),
            },

            PaymentAction::Refunded { amount } => {
                let amount = state.validate_refund(Some(amount))?;
                state.refunded = state
                    .refunded
                    .checked_add(amount)
                    .unwrap_or(state.amount);
                if state.refundable().is_zero() {
                    state.status = S::Refunded;
                }
                state.updated_at = now;
                Ok(Effects::new())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn only_initiated_payments_await_the_gateway() {
        assert!(!PaymentStatus::Initiated.is_final());
        assert!(PaymentStatus::Committed.is_final());
        assert!(PaymentStatus::Failed.is_final());
        assert!(PaymentStatus::Aborted.is_final());
    }

    #[test]
    fn buy_order_fits_gateway_limit_and_changes_per_attempt() {
        let id = ReservationId::new();
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let t2 = t1 + chrono::Duration::milliseconds(1);
        let a = buy_order_for(id, t1);
        let b = buy_order_for(id, t2);
        assert!(a.len() <= 26, "{a}");
        assert_ne!(a, b);
        assert!(a.starts_with("O-"));
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            PaymentStatus::Initiated,
            PaymentStatus::Authorized,
            PaymentStatus::Captured,
            PaymentStatus::Committed,
            PaymentStatus::Voided,
            PaymentStatus::Failed,
            PaymentStatus::Aborted,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<PaymentStatus>().unwrap(), status);
        }
    }
}
