//! HTTP API handlers, organized by domain:
//! - Holds: creating, extending and canceling holds
//! - Payments: gateway session, commit, abort, refund and admin capture/void
//! - Payouts: manual retry and provider webhooks
//!
//! Core rows serialize in storage shape; the `*View` types here are the
//! camelCase wire shape.

pub mod holds;
pub mod payments;
pub mod payouts;

use crate::error::MarketError;
use axum::extract::{FromRequest, FromRequestParts};

use boxoffice_core::money::Money;
use boxoffice_core::payment::{Payment, PaymentStatus};
use boxoffice_core::payout::{Payout, PayoutStatus};
use boxoffice_core::reservation::{Reservation, ReservationStatus};
use boxoffice_core::types::{
    EventId, PaymentId, PayoutId, PurchaseGroupId, ReservationId, SeatLabel, SectionId, TicketId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use holds::{cancel_reservation, create_hold, refresh_hold};
pub use payments::{
    abort_payment, capture_payment, commit_payment, create_payment, gateway_status, refund_payment, void_payment,
};
pub use payouts::{payout_webhook, retry_payout};

/// `Json` whose rejections render as `INVALID_INPUT`.
#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(MarketError))]
pub struct ApiJson<T>(pub T);

/// `Path` whose rejections render as `INVALID_INPUT`.
#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(MarketError))]
pub struct ApiPath<T>(pub T);

/// A reservation as returned to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    /// Reservation ID
    pub id: ReservationId,
    /// Event
    pub event_id: EventId,
    /// Section, if any
    pub section_id: Option<SectionId>,
    /// Units held
    pub quantity: u32,
    /// Price before fee
    pub subtotal: Money,
    /// Platform fee
    pub fee: Money,
    /// Amount charged
    pub amount: Money,
    /// Status
    pub status: ReservationStatus,
    /// Hold deadline
    pub expires_at: Option<DateTime<Utc>>,
    /// Assigned seats
    pub seats: Vec<SeatLabel>,
    /// Purchase group
    pub purchase_group_id: PurchaseGroupId,
    /// Resale ticket
    pub ticket_id: Option<TicketId>,
    /// Settled at
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            event_id: r.event_id,
            section_id: r.section_id,
            quantity: r.quantity,
            subtotal: r.subtotal,
            fee: r.fee,
            amount: r.amount,
            status: r.status,
            expires_at: r.expires_at,
            seats: r.seat_assignment.clone(),
            purchase_group_id: r.purchase_group_id,
            ticket_id: r.ticket_id,
            paid_at: r.paid_at,
        }
    }
}

/// A payment as returned to clients. Card and gateway details stay private.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    /// Payment ID
    pub id: PaymentId,
    /// Purchase group
    pub purchase_group_id: PurchaseGroupId,
    /// Amount charged
    pub amount: Money,
    /// Amount refunded so far
    pub refunded: Money,
    /// Status
    pub status: PaymentStatus,
    /// Order reference
    pub buy_order: String,
    /// Last four card digits
    pub card_last4: Option<String>,
    /// Last modified at
    pub updated_at: DateTime<Utc>,
}

impl From<&Payment> for PaymentView {
    fn from(p: &Payment) -> Self {
        Self {
            id: p.id,
            purchase_group_id: p.purchase_group_id,
            amount: p.amount,
            refunded: p.refunded,
            status: p.status,
            buy_order: p.buy_order.clone(),
            card_last4: p.card_last4.clone(),
            updated_at: p.updated_at,
        }
    }
}

/// A payout as returned to operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutView {
    /// Payout ID
    pub id: PayoutId,
    /// Amount
    pub amount: Money,
    /// Currency
    pub currency: String,
    /// Status
    pub status: PayoutStatus,
    /// Failed attempts
    pub retries: u32,
    /// Provider's payout id
    pub external_id: Option<String>,
    /// Last failure code
    pub failure_code: Option<String>,
    /// Last failure, capped in length
    pub failure_message: Option<String>,
    /// Delivered at
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&Payout> for PayoutView {
    fn from(p: &Payout) -> Self {
        Self {
            id: p.id,
            amount: p.amount,
            currency: p.currency.clone(),
            status: p.status,
            retries: p.retries,
            external_id: p.external_id.clone(),
            failure_code: p.failure_code.clone(),
            failure_message: p.failure_message.clone(),
            paid_at: p.paid_at,
        }
    }
}
