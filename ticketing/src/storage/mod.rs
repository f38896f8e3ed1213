//! Persistence seam.
//!
//! [`Storage::begin`] opens a serializable unit of work ([`StorageTx`]) that
//! exposes every read and write the inventory ledger, hold manager, payment
//! service and expiry sweep need. Dropping a transaction without calling
//! [`StorageTx::commit`] rolls it back.
//!
//! Payouts are written outside units of work, through a compare-and-swap on
//! their `version` column ([`Storage::update_payout`]), so the retry
//! scheduler, the reconciliation scheduler and the webhook endpoint never
//! overwrite each other's changes.

use async_trait::async_trait;
use boxoffice_core::catalog::{ConnectedAccount, Event, Section, Ticket};
use boxoffice_core::payment::Payment;
use boxoffice_core::payout::Payout;
use boxoffice_core::reservation::Reservation;
use boxoffice_core::types::{
    AccountId, EventId, PaymentId, PayoutId, PurchaseGroupId, ReservationId, SectionId, TicketId, UserId,
};
use crate::limits::LimitsSource;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStorage;
pub use postgres::PgStorage;

/// Storage failure.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Another unit of work committed a conflicting change first.
    #[error("serialization conflict")]
    SerializationConflict,
    /// A row the write expected is missing.
    #[error("{entity} {id} not found")]
    Missing {
        /// Row kind
        entity: &'static str,
        /// Row id
        id: String,
    },
    /// A stored value could not be decoded.
    #[error("corrupt row: {0}")]
    Corrupt(String),
    /// Driver-level failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StorageError {
    /// Whether retrying the unit of work may succeed
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::SerializationConflict)
    }
}

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A serializable unit of work.
#[async_trait]
pub trait StorageTx: Send {
    /// Load an event.
    async fn event(&mut self, id: EventId) -> StorageResult<Option<Event>>;

    /// Load a section.
    async fn section(&mut self, id: SectionId) -> StorageResult<Option<Section>>;

    /// Load a resale ticket.
    async fn ticket(&mut self, id: TicketId) -> StorageResult<Option<Ticket>>;

    /// All resale tickets of an event.
    async fn event_tickets(&mut self, event_id: EventId) -> StorageResult<Vec<Ticket>>;

    /// `PENDING_PAYMENT` and `PAID` reservations of an event.
    async fn event_reservations(&mut self, event_id: EventId) -> StorageResult<Vec<Reservation>>;

    /// `PENDING_PAYMENT` and `PAID` reservations of a section.
    async fn section_reservations(&mut self, section_id: SectionId) -> StorageResult<Vec<Reservation>>;

    /// Load a reservation.
    async fn reservation(&mut self, id: ReservationId) -> StorageResult<Option<Reservation>>;

    /// Every reservation of a purchase group, oldest first.
    async fn group_reservations(&mut self, group: PurchaseGroupId) -> StorageResult<Vec<Reservation>>;

    /// Unexpired `PENDING_PAYMENT` reservations of a buyer for an event, oldest first.
    async fn open_holds(
        &mut self,
        buyer_id: UserId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Reservation>>;

    /// `PENDING_PAYMENT` reservations whose deadline passed, oldest deadline first.
    async fn stale_reservations(&mut self, now: DateTime<Utc>, limit: usize) -> StorageResult<Vec<Reservation>>;

    /// Insert a reservation.
    async fn insert_reservation(&mut self, reservation: &Reservation) -> StorageResult<()>;

    /// Overwrite a reservation.
    async fn update_reservation(&mut self, reservation: &Reservation) -> StorageResult<()>;

    /// Overwrite a resale ticket's `sold` / `reservation_id`.
    async fn update_ticket(&mut self, ticket: &Ticket) -> StorageResult<()>;

    /// Load a payment.
    async fn payment(&mut self, id: PaymentId) -> StorageResult<Option<Payment>>;

    /// The payment of a purchase group.
    async fn payment_for_group(&mut self, group: PurchaseGroupId) -> StorageResult<Option<Payment>>;

    /// Payment by gateway token.
    async fn payment_by_token(&mut self, token: &str) -> StorageResult<Option<Payment>>;

    /// Payment by order reference.
    async fn payment_by_buy_order(&mut self, buy_order: &str) -> StorageResult<Option<Payment>>;

    /// Insert a payment.
    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()>;

    /// Overwrite a payment.
    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()>;

    /// Settled payments whose group has no `PAID` reservation and a
    /// positive balance: money taken for a hold that never settled.
    async fn orphaned_payments(&mut self, limit: usize) -> StorageResult<Vec<Payment>>;

    /// A seller's connected account.
    async fn account_for_user(&mut self, user_id: UserId) -> StorageResult<Option<ConnectedAccount>>;

    /// Insert a payout.
    async fn insert_payout(&mut self, payout: &Payout) -> StorageResult<()>;

    /// Make every write visible atomically.
    ///
    /// # Errors
    ///
    /// [`StorageError::SerializationConflict`] when a concurrent unit of work
    /// touched the same rows first; nothing is written in that case.
    async fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// Persistence backend.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Open a unit of work.
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>>;

    /// Load a connected account.
    async fn account(&self, id: AccountId) -> StorageResult<Option<ConnectedAccount>>;

    /// Load a payout.
    async fn payout(&self, id: PayoutId) -> StorageResult<Option<Payout>>;

    /// Payout by provider id.
    async fn payout_by_external_id(&self, external_id: &str) -> StorageResult<Option<Payout>>;

    /// `PENDING` / `FAILED` payouts below the retry ceiling, least recently updated first.
    async fn dispatchable_payouts(&self, max_retries: u32, limit: usize) -> StorageResult<Vec<Payout>>;

    /// `SCHEDULED` / `IN_TRANSIT` payouts with a provider id, least recently updated first.
    async fn in_flight_payouts(&self, limit: usize) -> StorageResult<Vec<Payout>>;

    /// Write `payout` if the stored version still equals `expected_version`.
    ///
    /// The stored version becomes `expected_version + 1`. Returns `false`
    /// when another writer got there first.
    async fn update_payout(&self, payout: &Payout, expected_version: i64) -> StorageResult<bool>;

    /// Stored business-limit overrides.
    async fn business_settings(&self) -> StorageResult<HashMap<String, String>>;
}

/// [`LimitsSource`] reading the `business_settings` table.
pub struct StoredLimits(pub std::sync::Arc<dyn Storage>);

#[async_trait]
impl LimitsSource for StoredLimits {
    async fn limit_overrides(&self) -> Result<HashMap<String, String>, anyhow::Error> {
        Ok(self.0.business_settings().await?)
    }
}
