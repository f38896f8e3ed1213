//! "Reservation settled" facts for downstream ticket issuance.

use async_trait::async_trait;
use boxoffice_core::reservation::Reservation;
use boxoffice_core::types::{EventId, PurchaseGroupId, ReservationId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Mutex, PoisonError};

/// A reservation became `PAID`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationSettled {
    /// The reservation
    pub reservation_id: ReservationId,
    /// Its purchase group
    pub purchase_group_id: PurchaseGroupId,
    /// Event
    pub event_id: EventId,
    /// Buyer
    pub buyer_id: UserId,
    /// Units bought
    pub quantity: u32,
    /// Resale ticket, if any
    pub ticket_id: Option<TicketId>,
    /// Settlement time
    pub paid_at: DateTime<Utc>,
    /// Deadline for the seller to upload the ticket artifact
    pub upload_deadline: Option<DateTime<Utc>>,
}

impl ReservationSettled {
    /// Builds the fact from a settled row.
    #[must_use]
    pub fn from_reservation(reservation: &Reservation, paid_at: DateTime<Utc>) -> Self {
        Self {
            reservation_id: reservation.id,
            purchase_group_id: reservation.purchase_group_id,
            event_id: reservation.event_id,
            buyer_id: reservation.buyer_id,
            quantity: reservation.quantity,
            ticket_id: reservation.ticket_id,
            paid_at,
            upload_deadline: reservation.upload_deadline,
        }
    }
}

/// Receives settlement facts after the settling unit of work committed.
#[async_trait]
pub trait SettlementPublisher: Send + Sync {
    /// Deliver one fact. Delivery problems are the publisher's to log.
    async fn publish(&self, fact: ReservationSettled);
}

/// Writes each fact to the structured log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSettlementPublisher;

#[async_trait]
impl SettlementPublisher for LogSettlementPublisher {
    async fn publish(&self, fact: ReservationSettled) {
        tracing::info!(
            reservation_id = %fact.reservation_id,
            purchase_group_id = %fact.purchase_group_id,
            event_id = %fact.event_id,
            quantity = fact.quantity,
            paid_at = %fact.paid_at,
            "Reservation settled"
        );
    }
}

/// Keeps every fact in memory.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    facts: Mutex<Vec<ReservationSettled>>,
}

impl RecordingPublisher {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Facts received so far
    #[must_use]
    pub fn facts(&self) -> Vec<ReservationSettled> {
        self.facts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl SettlementPublisher for RecordingPublisher {
    async fn publish(&self, fact: ReservationSettled) {
        self.facts.lock().unwrap_or_else(PoisonError::into_inner).push(fact);
    }
}
