//! Reservation state machine.
//!
//! A reservation is the unit of hold and purchase:
//!
//! ```text
//! PENDING_PAYMENT --settle--> PAID
//! PENDING_PAYMENT --expire--> EXPIRED   (only once expires_at has passed)
//! PENDING_PAYMENT --cancel--> CANCELED
//! PAID            --revoke--> CANCELED  (authorization voided before capture)
//! ```
//!
//! `EXPIRED` and `CANCELED` are terminal. Releasing or selling a linked
//! resale ticket is returned as an effect so the caller writes it in the same
//! unit of work.

use crate::catalog::UnknownVariant;
use crate::environment::Clock;
use crate::error::TransitionError;
use crate::money::Money;
use crate::reducer::{Effects, Reducer};
use crate::types::{EventId, PurchaseGroupId, ReservationId, SeatLabel, SectionId, TicketId, UserId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Reservation lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    /// Holding inventory until `expires_at`.
    PendingPayment,
    /// Settled.
    Paid,
    /// Released by a buyer, organizer, admin or failed payment.
    Canceled,
    /// Hold deadline passed without settlement.
    Expired,
}

impl ReservationStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "PENDING_PAYMENT",
            Self::Paid => "PAID",
            Self::Canceled => "CANCELED",
            Self::Expired => "EXPIRED",
        }
    }

    /// No further transitions are possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::PendingPayment)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PAYMENT" => Ok(Self::PendingPayment),
            "PAID" => Ok(Self::Paid),
            "CANCELED" => Ok(Self::Canceled),
            "EXPIRED" => Ok(Self::Expired),
            other => Err(UnknownVariant::new("ReservationStatus", other)),
        }
    }
}

/// Who asked for a cancellation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelReason {
    /// The buyer released the hold
    Buyer,
    /// The event organizer released it
    Organizer,
    /// An administrator released it
    Admin,
    /// The gateway declined or the buyer aborted
    PaymentFailed,
    /// Buyer turned out to be the organizer at commit time
    OwnEvent,
    /// Authorization voided before capture
    Voided,
}

impl CancelReason {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buyer => "BUYER",
            Self::Organizer => "ORGANIZER",
            Self::Admin => "ADMIN",
            Self::PaymentFailed => "PAYMENT_FAILED",
            Self::OwnEvent => "OWN_EVENT",
            Self::Voided => "VOIDED",
        }
    }
}

impl FromStr for CancelReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUYER" => Ok(Self::Buyer),
            "ORGANIZER" => Ok(Self::Organizer),
            "ADMIN" => Ok(Self::Admin),
            "PAYMENT_FAILED" => Ok(Self::PaymentFailed),
            "OWN_EVENT" => Ok(Self::OwnEvent),
            "VOIDED" => Ok(Self::Voided),
            other => Err(UnknownVariant::new("CancelReason", other)),
        }
    }
}

/// One hold / purchase row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation ID
    pub id: ReservationId,
    /// Event being purchased
    pub event_id: EventId,
    /// Section, for sectioned OWN events
    pub section_id: Option<SectionId>,
    /// Buyer
    pub buyer_id: UserId,
    /// Units held
    pub quantity: u32,
    /// Price × quantity
    pub subtotal: Money,
    /// Platform fee on the subtotal
    pub fee: Money,
    /// Subtotal + fee, quoted to the gateway
    pub amount: Money,
    /// Current status
    pub status: ReservationStatus,
    /// Hold deadline; only set while `PENDING_PAYMENT`
    pub expires_at: Option<DateTime<Utc>>,
    /// Named seats, for seated sections
    pub seat_assignment: Vec<SeatLabel>,
    /// Rows created by the same hold request share this id
    pub purchase_group_id: PurchaseGroupId,
    /// Linked resale ticket
    pub ticket_id: Option<TicketId>,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Deadline for the seller to upload the ticket artifact
    pub upload_deadline: Option<DateTime<Utc>>,
    /// Why it was canceled
    pub cancel_reason: Option<CancelReason>,
    /// Created at
    pub created_at: DateTime<Utc>,
    /// Last modified at
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    /// Whether this row holds inventory at `now`:
    /// `PAID`, or `PENDING_PAYMENT` with a deadline still in the future.
    #[must_use]
    pub fn counts_against_capacity(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            ReservationStatus::Paid => true,
            ReservationStatus::PendingPayment => self.expires_at.is_some_and(|at| at > now),
            ReservationStatus::Canceled | ReservationStatus::Expired => false,
        }
    }

    /// `PENDING_PAYMENT` whose deadline has passed (not yet swept).
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.status == ReservationStatus::PendingPayment
            && self.expires_at.is_none_or(|at| at <= now)
    }
}

/// Inputs to the reservation state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationAction {
    /// Push the hold deadline forward.
    Extend {
        /// New deadline
        until: DateTime<Utc>,
    },
    /// Payment confirmed.
    Settle {
        /// Hours the seller has to upload the ticket artifact
        upload_deadline_hours: u32,
    },
    /// Hold deadline passed.
    Expire,
    /// Explicit release.
    Cancel {
        /// Who asked
        reason: CancelReason,
    },
    /// Undo a settlement whose authorized funds were voided before capture.
    Revoke,
}

/// Writes the caller must perform after a reservation transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReservationEffect {
    /// Unlink the ticket so it is available again
    ReleaseTicket(TicketId),
    /// Mark the ticket sold
    MarkTicketSold(TicketId),
    /// Reservation became PAID; publish for ticket issuance
    Settled {
        /// The settled reservation
        reservation_id: ReservationId,
        /// Settlement time
        paid_at: DateTime<Utc>,
    },
}

/// Environment for [`ReservationReducer`]
#[derive(Clone)]
pub struct ReservationEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl ReservationEnvironment {
    /// Creates the environment
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

/// Transition rules for [`Reservation`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ReservationReducer;

impl Reducer for ReservationReducer {
    type State = Reservation;
    type Action = ReservationAction;
    type Effect = ReservationEffect;
    type Error = TransitionError;
    type Environment = ReservationEnvironment;

    fn reduce(
        &self,
        state: &mut Reservation,
        action: ReservationAction,
        env: &ReservationEnvironment,
    ) -> Result<Effects<ReservationEffect>, TransitionError> {
        let now = env.clock.now();
        let from = state.status;

        match action {
            ReservationAction::Extend { until } => {
                if from != ReservationStatus::PendingPayment {
                    return Err(TransitionError::invalid("reservation", from.as_str(), "extend"));
                }
                if let Some(expired_at) = state.expires_at.filter(|at| *at <= now) {
                    return Err(TransitionError::HoldExpired { expired_at });
                }
                if state.expires_at.is_none_or(|at| until > at) {
                    state.expires_at = Some(until);
                    state.updated_at = now;
                }
                Ok(Effects::new())
            }

            ReservationAction::Settle {
                upload_deadline_hours,
            } => match from {
                ReservationStatus::Paid => Ok(Effects::new()),
                ReservationStatus::PendingPayment => {
                    state.status = ReservationStatus::Paid;
                    state.paid_at = Some(now);
                    state.upload_deadline = Some(now + Duration::hours(i64::from(upload_deadline_hours)));
                    state.expires_at = None;
                    state.updated_at = now;

                    let mut effects = Effects::new();
                    if let Some(ticket_id) = state.ticket_id {
                        effects.push(ReservationEffect::MarkTicketSold(ticket_id));
                    }
                    effects.push(ReservationEffect::Settled {
                        reservation_id: state.id,
                        paid_at: now,
                    });
                    Ok(effects)
                }
                ReservationStatus::Canceled | ReservationStatus::Expired => {
                    Err(TransitionError::invalid("reservation", from.as_str(), "settle"))
                }
            },

            ReservationAction::Expire => match from {
                ReservationStatus::Expired => Ok(Effects::new()),
                ReservationStatus::PendingPayment => {
                    if let Some(expires_at) = state.expires_at.filter(|at| *at > now) {
                        return Err(TransitionError::HoldActive { expires_at });
                    }
                    state.status = ReservationStatus::Expired;
                    state.expires_at = None;
                    state.updated_at = now;
                    Ok(release(state.ticket_id))
                }
                ReservationStatus::Paid | ReservationStatus::Canceled => {
                    Err(TransitionError::invalid("reservation", from.as_str(), "expire"))
                }
            },

            ReservationAction::Cancel { reason } => match from {
                ReservationStatus::Canceled => Ok(Effects::new()),
                ReservationStatus::PendingPayment => {
                    state.status = ReservationStatus::Canceled;
                    state.cancel_reason = Some(reason);
                    state.expires_at = None;
                    state.updated_at = now;
                    Ok(release(state.ticket_id))
                }
                ReservationStatus::Paid | ReservationStatus::Expired => {
                    Err(TransitionError::invalid("reservation", from.as_str(), "cancel"))
                }
            },

            ReservationAction::Revoke => match from {
                ReservationStatus::Canceled => Ok(Effects::new()),
                ReservationStatus::Paid | ReservationStatus::PendingPayment => {
                    state.status = ReservationStatus::Canceled;
                    state.cancel_reason = Some(CancelReason::Voided);
                    state.expires_at = None;
                    state.upload_deadline = None;
                    state.updated_at = now;
                    Ok(release(state.ticket_id))
                }
                ReservationStatus::Expired => {
                    Err(TransitionError::invalid("reservation", from.as_str(), "revoke"))
                }
            },
        }
    }
}

fn release(ticket_id: Option<TicketId>) -> Effects<ReservationEffect> {
    match ticket_id {
        Some(ticket_id) => smallvec![ReservationEffect::ReleaseTicket(ticket_id)],
        None => Effects::new(),
    }
}
