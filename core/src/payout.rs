//! Payout state machine.
//!
//! ```text
//! PENDING | FAILED --dispatch ok-----> PENDING | SCHEDULED | IN_TRANSIT | PAID
//! PENDING | FAILED --dispatch failed-> FAILED (retries + 1)
//! any non-terminal --reconciled------> provider status
//! ```
//!
//! `retries` only moves on a failed dispatch. The idempotency key is assigned
//! once and never changes afterwards.

use crate::catalog::UnknownVariant;
use crate::environment::Clock;
use crate::error::TransitionError;
use crate::money::Money;
use crate::reducer::{Effects, Reducer};
use crate::types::{AccountId, PayoutId, PurchaseGroupId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Longest failure message stored on a payout.
pub const MAX_FAILURE_MESSAGE_CHARS: usize = 500;

/// Payout lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    /// Waiting for its first (or next) dispatch.
    Pending,
    /// Accepted by the provider, not yet sent to the bank.
    Scheduled,
    /// Sent to the bank.
    InTransit,
    /// Funds delivered.
    Paid,
    /// Last dispatch failed; eligible for retry below the ceiling.
    Failed,
    /// Abandoned.
    Canceled,
}

impl PayoutStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Scheduled => "SCHEDULED",
            Self::InTransit => "IN_TRANSIT",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// Lenient parse of a provider-reported status.
    ///
    /// Providers disagree on casing and on the name of the in-flight states.
    #[must_use]
    pub fn from_provider(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PENDING" => Some(Self::Pending),
            "SCHEDULED" | "ACCEPTED" | "PROCESSING" => Some(Self::Scheduled),
            "IN_TRANSIT" | "SENT" => Some(Self::InTransit),
            "PAID" | "SUCCEEDED" | "COMPLETED" => Some(Self::Paid),
            "FAILED" | "REJECTED" | "RETURNED" => Some(Self::Failed),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Eligible for the retry scheduler.
    #[must_use]
    pub const fn is_dispatchable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Accepted by the provider and awaiting reconciliation.
    #[must_use]
    pub const fn is_in_flight(self) -> bool {
        matches!(self, Self::Scheduled | Self::InTransit)
    }

    /// No further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Canceled)
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayoutStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SCHEDULED" => Ok(Self::Scheduled),
            "IN_TRANSIT" => Ok(Self::InTransit),
            "PAID" => Ok(Self::Paid),
            "FAILED" => Ok(Self::Failed),
            "CANCELED" => Ok(Self::Canceled),
            other => Err(UnknownVariant::new("PayoutStatus", other)),
        }
    }
}

/// One disbursement to a seller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    /// Payout ID
    pub id: PayoutId,
    /// Destination account
    pub account_id: AccountId,
    /// Seller being paid
    pub seller_id: UserId,
    /// Purchase that produced the earnings
    pub purchase_group_id: Option<PurchaseGroupId>,
    /// Amount to disburse
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Current status
    pub status: PayoutStatus,
    /// Failed dispatch attempts
    pub retries: u32,
    /// Sent with every dispatch
    pub idempotency_key: Option<String>,
    /// Provider's payout id
    pub external_id: Option<String>,
    /// Raw status last reported by the provider
    pub external_status: Option<String>,
    /// Provider failure code
    pub failure_code: Option<String>,
    /// Human-readable failure, capped at [`MAX_FAILURE_MESSAGE_CHARS`]
    pub failure_message: Option<String>,
    /// Funds delivered at
    pub paid_at: Option<DateTime<Utc>>,
    /// Compare-and-swap counter, bumped on every write
    pub version: i64,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last modified at
    pub updated_at: DateTime<Utc>,
}

/// Truncates to [`MAX_FAILURE_MESSAGE_CHARS`] on a character boundary.
#[must_use]
pub fn cap_failure_message(message: &str) -> String {
    message.chars().take(MAX_FAILURE_MESSAGE_CHARS).collect()
}

/// Inputs to the payout state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayoutAction {
    /// Set the idempotency key if none is set yet.
    AssignIdempotencyKey(String),
    /// Provider accepted the dispatch.
    DispatchSucceeded {
        /// Status reported by the provider
        status: PayoutStatus,
        /// Provider's payout id
        external_id: Option<String>,
        /// Delivery time, when already paid
        paid_at: Option<DateTime<Utc>>,
    },
    /// Dispatch failed, or the account was not ready.
    DispatchFailed {
        /// Provider or local failure code
        code: Option<String>,
        /// Human-readable message
        message: String,
    },
    /// Authoritative status learned from polling or a webhook.
    Reconciled {
        /// Normalized status
        status: PayoutStatus,
        /// Raw provider status
        external_status: Option<String>,
        /// Provider failure code
        failure_code: Option<String>,
        /// Provider failure message
        failure_message: Option<String>,
        /// Delivery time
        paid_at: Option<DateTime<Utc>>,
    },
}

/// Follow-ups the caller must perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PayoutEffect {
    /// The retry ceiling was reached; raise an operational alert.
    RetriesExhausted {
        /// Affected payout
        payout_id: PayoutId,
        /// Attempts made
        retries: u32,
    },
}

/// Environment for [`PayoutReducer`]
#[derive(Clone)]
pub struct PayoutEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Retry ceiling
    pub max_retries: u32,
}

impl PayoutEnvironment {
    /// Creates the environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, max_retries: u32) -> Self {
        Self { clock, max_retries }
    }
}

/// Transition rules for [`Payout`].
#[derive(Clone, Copy, Debug, Default)]
pub struct PayoutReducer;

impl Reducer for PayoutReducer {
    type State = Payout;
    type Action = PayoutAction;
    type Effect = PayoutEffect;
    type Error = TransitionError;
    type Environment = PayoutEnvironment;

    fn reduce(
        &self,
        state: &mut Payout,
        action: PayoutAction,
        env: &PayoutEnvironment,
    ) -> Result<Effects<PayoutEffect>, TransitionError> {
        let now = env.clock.now();
        let from = state.status;

        match action {
            PayoutAction::AssignIdempotencyKey(key) => {
                if from.is_terminal() {
                    return Err(TransitionError::invalid("payout", from.as_str(), "assign key"));
                }
                if state.idempotency_key.is_none() {
                    state.idempotency_key = Some(key);
                    state.updated_at = now;
                }
                Ok(Effects::new())
            }

            PayoutAction::DispatchSucceeded {
                status,
                external_id,
                paid_at,
            } => {
                if !from.is_dispatchable() || matches!(status, PayoutStatus::Failed | PayoutStatus::Canceled) {
                    return Err(TransitionError::invalid("payout", from.as_str(), "record dispatch"));
                }
                state.status = status;
                if external_id.is_some() {
                    state.external_id = external_id;
                }
                if status == PayoutStatus::Paid {
                    state.paid_at = paid_at.or(Some(now));
                }
                state.failure_code = None;
                state.failure_message = None;
                state.updated_at = now;
                Ok(Effects::new())
            }

            PayoutAction::DispatchFailed { code, message } => {
                if !from.is_dispatchable() {
                    return Err(TransitionError::invalid("payout", from.as_str(), "record failure"));
                }
                state.status = PayoutStatus::Failed;
                state.retries = state.retries.saturating_add(1);
                state.failure_code = code;
                state.failure_message = Some(cap_failure_message(&message));
                state.updated_at = now;

                if state.retries >= env.max_retries {
                    Ok(smallvec![PayoutEffect::RetriesExhausted {
                        payout_id: state.id,
                        retries: state.retries,
                    }])
                } else {
                    Ok(Effects::new())
                }
            }

            PayoutAction::Reconciled {
                status,
                external_status,
                failure_code,
                failure_message,
                paid_at,
            } => {
                if from.is_terminal() {
                    return if status == from {
                        Ok(Effects::new())
                    } else {
                        Err(TransitionError::invalid("payout", from.as_str(), "reconcile"))
                    };
                }
                state.status = status;
                if external_status.is_some() {
                    state.external_status = external_status;
                }
                if failure_code.is_some() {
                    state.failure_code = failure_code;
                }
                if let Some(message) = failure_message {
                    state.failure_message = Some(cap_failure_message(&message));
                }
                if status == PayoutStatus::Paid {
                    state.paid_at = paid_at.or(state.paid_at).or(Some(now));
                }
                state.updated_at = now;
                Ok(Effects::new())
            }
        }
    }
}
