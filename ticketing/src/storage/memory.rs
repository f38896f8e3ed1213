//! In-memory storage.
//!
//! Each unit of work runs against a private copy of the state taken at
//! `begin` and records which events and purchase groups it read or wrote.
//! `commit` refuses with [`StorageError::SerializationConflict`] when any of
//! those was changed by a unit of work that committed after this one began,
//! which gives the same first-committer-wins outcome as `SERIALIZABLE` in
//! `PostgreSQL` for the access patterns of this crate. Like a row update in
//! `PostgreSQL`, updating a ticket that another unit of work changed since
//! `begin` fails at the statement rather than at `commit`.

use super::{Storage, StorageError, StorageResult, StorageTx};
use async_trait::async_trait;
use boxoffice_core::catalog::{ConnectedAccount, Event, Section, Ticket};
use boxoffice_core::payment::Payment;
use boxoffice_core::payout::Payout;
use boxoffice_core::reservation::{Reservation, ReservationStatus};
use boxoffice_core::types::{
    AccountId, EventId, PaymentId, PayoutId, PurchaseGroupId, ReservationId, SectionId, TicketId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Default)]
struct State {
    events: HashMap<EventId, Event>,
    sections: HashMap<SectionId, Section>,
    tickets: HashMap<TicketId, Ticket>,
    reservations: HashMap<ReservationId, Reservation>,
    payments: HashMap<PaymentId, Payment>,
    accounts: HashMap<AccountId, ConnectedAccount>,
    payouts: HashMap<PayoutId, Payout>,
    settings: HashMap<String, String>,
}

/// Granularity of conflict detection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum ConflictKey {
    Event(EventId),
    Group(PurchaseGroupId),
    Ticket(TicketId),
}

#[derive(Default)]
struct Shared {
    state: State,
    version: u64,
    last_write: HashMap<ConflictKey, u64>,
}

enum Write {
    Reservation(Reservation),
    Ticket(Ticket),
    Payment(Payment),
    Payout(Payout),
}

/// Process-local [`Storage`].
#[derive(Clone, Default)]
pub struct MemoryStorage {
    shared: Arc<Mutex<Shared>>,
}

impl MemoryStorage {
    /// Empty storage
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an event.
    pub fn put_event(&self, event: Event) {
        self.lock().state.events.insert(event.id, event);
    }

    /// Add or replace a section.
    pub fn put_section(&self, section: Section) {
        self.lock().state.sections.insert(section.id, section);
    }

    /// Add or replace a resale ticket.
    pub fn put_ticket(&self, ticket: Ticket) {
        self.lock().state.tickets.insert(ticket.id, ticket);
    }

    /// Add or replace a connected account.
    pub fn put_account(&self, account: ConnectedAccount) {
        self.lock().state.accounts.insert(account.id, account);
    }

    /// Add or replace a payout.
    pub fn put_payout(&self, payout: Payout) {
        self.lock().state.payouts.insert(payout.id, payout);
    }

    /// Store a business-limit override.
    pub fn set_setting(&self, key: &str, value: &str) {
        self.lock().state.settings.insert(key.to_string(), value.to_string());
    }

    /// Committed reservation.
    #[must_use]
    pub fn reservation(&self, id: ReservationId) -> Option<Reservation> {
        self.lock().state.reservations.get(&id).cloned()
    }

    /// Every committed reservation of an event.
    #[must_use]
    pub fn reservations_for_event(&self, event_id: EventId) -> Vec<Reservation> {
        let mut rows: Vec<Reservation> = self
            .lock()
            .state
            .reservations
            .values()
            .filter(|r| r.event_id == event_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    /// Committed resale ticket.
    #[must_use]
    pub fn ticket(&self, id: TicketId) -> Option<Ticket> {
        self.lock().state.tickets.get(&id).cloned()
    }

    /// Every committed payment.
    #[must_use]
    pub fn payments(&self) -> Vec<Payment> {
        self.lock().state.payments.values().cloned().collect()
    }

    /// Every committed payout.
    #[must_use]
    pub fn payouts(&self) -> Vec<Payout> {
        self.lock().state.payouts.values().cloned().collect()
    }
}

struct MemoryTx {
    shared: Arc<Mutex<Shared>>,
    snapshot: State,
    base_version: u64,
    read: HashSet<ConflictKey>,
    written: HashSet<ConflictKey>,
    writes: Vec<Write>,
}

impl MemoryTx {
    fn touch_reservation(&mut self, r: &Reservation) {
        self.read.insert(ConflictKey::Event(r.event_id));
        self.read.insert(ConflictKey::Group(r.purchase_group_id));
    }

    fn active_reservations(&self, keep: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let mut rows: Vec<Reservation> = self
            .snapshot
            .reservations
            .values()
            .filter(|r| matches!(r.status, ReservationStatus::PendingPayment | ReservationStatus::Paid))
            .filter(|r| keep(r))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        rows
    }

    fn find_payment(&mut self, matches: impl Fn(&Payment) -> bool) -> Option<Payment> {
        let found = self.snapshot.payments.values().find(|p| matches(p)).cloned();
        if let Some(payment) = &found {
            self.read.insert(ConflictKey::Group(payment.purchase_group_id));
        }
        found
    }

    fn write_reservation(&mut self, reservation: &Reservation) {
        self.written.insert(ConflictKey::Event(reservation.event_id));
        self.written.insert(ConflictKey::Group(reservation.purchase_group_id));
        self.snapshot.reservations.insert(reservation.id, reservation.clone());
        self.writes.push(Write::Reservation(reservation.clone()));
    }

    fn write_payment(&mut self, payment: &Payment) {
        self.written.insert(ConflictKey::Group(payment.purchase_group_id));
        self.snapshot.payments.insert(payment.id, payment.clone());
        self.writes.push(Write::Payment(payment.clone()));
    }
}

#[async_trait]
impl StorageTx for MemoryTx {
    async fn event(&mut self, id: EventId) -> StorageResult<Option<Event>> {
        self.read.insert(ConflictKey::Event(id));
        Ok(self.snapshot.events.get(&id).cloned())
    }

    async fn section(&mut self, id: SectionId) -> StorageResult<Option<Section>> {
        let section = self.snapshot.sections.get(&id).cloned();
        if let Some(section) = &section {
            self.read.insert(ConflictKey::Event(section.event_id));
        }
        Ok(section)
    }

    async fn ticket(&mut self, id: TicketId) -> StorageResult<Option<Ticket>> {
        let ticket = self.snapshot.tickets.get(&id).cloned();
        if let Some(ticket) = &ticket {
            self.read.insert(ConflictKey::Event(ticket.event_id));
        }
        Ok(ticket)
    }

    async fn event_tickets(&mut self, event_id: EventId) -> StorageResult<Vec<Ticket>> {
        self.read.insert(ConflictKey::Event(event_id));
        Ok(self
            .snapshot
            .tickets
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn event_reservations(&mut self, event_id: EventId) -> StorageResult<Vec<Reservation>> {
        self.read.insert(ConflictKey::Event(event_id));
        Ok(self.active_reservations(|r| r.event_id == event_id))
    }

    async fn section_reservations(&mut self, section_id: SectionId) -> StorageResult<Vec<Reservation>> {
        if let Some(section) = self.snapshot.sections.get(&section_id) {
            self.read.insert(ConflictKey::Event(section.event_id));
        }
        Ok(self.active_reservations(|r| r.section_id == Some(section_id)))
    }

    async fn reservation(&mut self, id: ReservationId) -> StorageResult<Option<Reservation>> {
        let reservation = self.snapshot.reservations.get(&id).cloned();
        if let Some(r) = &reservation {
            self.touch_reservation(r);
        }
        Ok(reservation)
    }

    async fn group_reservations(&mut self, group: PurchaseGroupId) -> StorageResult<Vec<Reservation>> {
        self.read.insert(ConflictKey::Group(group));
        let mut rows: Vec<Reservation> = self
            .snapshot
            .reservations
            .values()
            .filter(|r| r.purchase_group_id == group)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        for r in &rows {
            self.read.insert(ConflictKey::Event(r.event_id));
        }
        Ok(rows)
    }

    async fn open_holds(
        &mut self,
        buyer_id: UserId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Reservation>> {
        self.read.insert(ConflictKey::Event(event_id));
        Ok(self.active_reservations(|r| {
            r.buyer_id == buyer_id
                && r.event_id == event_id
                && r.status == ReservationStatus::PendingPayment
                && r.expires_at.is_some_and(|at| at > now)
        }))
    }

    async fn stale_reservations(&mut self, now: DateTime<Utc>, limit: usize) -> StorageResult<Vec<Reservation>> {
        let mut rows: Vec<Reservation> = self
            .snapshot
            .reservations
            .values()
            .filter(|r| r.is_stale(now))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.expires_at);
        rows.truncate(limit);
        for r in &rows {
            self.touch_reservation(r);
        }
        Ok(rows)
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StorageResult<()> {
        self.write_reservation(reservation);
        Ok(())
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> StorageResult<()> {
        if !self.snapshot.reservations.contains_key(&reservation.id) {
            return Err(StorageError::Missing {
                entity: "reservation",
                id: reservation.id.to_string(),
            });
        }
        self.write_reservation(reservation);
        Ok(())
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> StorageResult<()> {
        if !self.snapshot.tickets.contains_key(&ticket.id) {
            return Err(StorageError::Missing {
                entity: "ticket",
                id: ticket.id.to_string(),
            });
        }
        let row = ConflictKey::Ticket(ticket.id);
        let changed = self
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_write
            .get(&row)
            .is_some_and(|v| *v > self.base_version);
        if changed {
            return Err(StorageError::SerializationConflict);
        }
        self.written.insert(row);
        self.written.insert(ConflictKey::Event(ticket.event_id));
        self.snapshot.tickets.insert(ticket.id, ticket.clone());
        self.writes.push(Write::Ticket(ticket.clone()));
        Ok(())
    }

    async fn payment(&mut self, id: PaymentId) -> StorageResult<Option<Payment>> {
        Ok(self.find_payment(|p| p.id == id))
    }

    async fn payment_for_group(&mut self, group: PurchaseGroupId) -> StorageResult<Option<Payment>> {
        self.read.insert(ConflictKey::Group(group));
        Ok(self.find_payment(|p| p.purchase_group_id == group))
    }

    async fn payment_by_token(&mut self, token: &str) -> StorageResult<Option<Payment>> {
        Ok(self.find_payment(|p| p.token.as_deref() == Some(token)))
    }

    async fn payment_by_buy_order(&mut self, buy_order: &str) -> StorageResult<Option<Payment>> {
        Ok(self.find_payment(|p| p.buy_order == buy_order))
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        self.write_payment(payment);
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        if !self.snapshot.payments.contains_key(&payment.id) {
            return Err(StorageError::Missing {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        self.write_payment(payment);
        Ok(())
    }

    async fn orphaned_payments(&mut self, limit: usize) -> StorageResult<Vec<Payment>> {
        let paid_groups: HashSet<PurchaseGroupId> = self
            .snapshot
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Paid)
            .map(|r| r.purchase_group_id)
            .collect();
        let mut rows: Vec<Payment> = self
            .snapshot
            .payments
            .values()
            .filter(|p| p.status.is_settled() && !p.refundable().is_zero())
            .filter(|p| !paid_groups.contains(&p.purchase_group_id))
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.updated_at);
        rows.truncate(limit);
        for p in &rows {
            self.read.insert(ConflictKey::Group(p.purchase_group_id));
        }
        Ok(rows)
    }

    async fn account_for_user(&mut self, user_id: UserId) -> StorageResult<Option<ConnectedAccount>> {
        Ok(self
            .snapshot
            .accounts
            .values()
            .find(|a| a.user_id == user_id)
            .cloned())
    }

    async fn insert_payout(&mut self, payout: &Payout) -> StorageResult<()> {
        self.snapshot.payouts.insert(payout.id, payout.clone());
        self.writes.push(Write::Payout(payout.clone()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        if this.writes.is_empty() {
            return Ok(());
        }
        let mut shared = this.shared.lock().unwrap_or_else(PoisonError::into_inner);

        let conflicted = this
            .read
            .iter()
            .chain(this.written.iter())
            .any(|key| shared.last_write.get(key).is_some_and(|v| *v > this.base_version));
        if conflicted {
            return Err(StorageError::SerializationConflict);
        }

        shared.version += 1;
        let version = shared.version;
        for key in this.written {
            shared.last_write.insert(key, version);
        }
        for write in this.writes {
            match write {
                Write::Reservation(r) => {
                    shared.state.reservations.insert(r.id, r);
                }
                Write::Ticket(t) => {
                    shared.state.tickets.insert(t.id, t);
                }
                Write::Payment(p) => {
                    shared.state.payments.insert(p.id, p);
                }
                Write::Payout(p) => {
                    shared.state.payouts.insert(p.id, p);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>> {
        let shared = self.lock();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            snapshot: shared.state.clone(),
            base_version: shared.version,
            read: HashSet::new(),
            written: HashSet::new(),
            writes: Vec::new(),
        }))
    }

    async fn account(&self, id: AccountId) -> StorageResult<Option<ConnectedAccount>> {
        Ok(self.lock().state.accounts.get(&id).cloned())
    }

    async fn payout(&self, id: PayoutId) -> StorageResult<Option<Payout>> {
        Ok(self.lock().state.payouts.get(&id).cloned())
    }

    async fn payout_by_external_id(&self, external_id: &str) -> StorageResult<Option<Payout>> {
        Ok(self
            .lock()
            .state
            .payouts
            .values()
            .find(|p| p.external_id.as_deref() == Some(external_id))
            .cloned())
    }

    async fn dispatchable_payouts(&self, max_retries: u32, limit: usize) -> StorageResult<Vec<Payout>> {
        let mut rows: Vec<Payout> = self
            .lock()
            .state
            .payouts
            .values()
            .filter(|p| p.status.is_dispatchable() && p.retries < max_retries)
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.updated_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn in_flight_payouts(&self, limit: usize) -> StorageResult<Vec<Payout>> {
        let mut rows: Vec<Payout> = self
            .lock()
            .state
            .payouts
            .values()
            .filter(|p| p.status.is_in_flight())
            .filter(|p| p.external_id.is_some())
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.updated_at);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn update_payout(&self, payout: &Payout, expected_version: i64) -> StorageResult<bool> {
        let mut shared = self.lock();
        let Some(stored) = shared.state.payouts.get_mut(&payout.id) else {
            return Err(StorageError::Missing {
                entity: "payout",
                id: payout.id.to_string(),
            });
        };
        if stored.version != expected_version {
            return Ok(false);
        }
        *stored = payout.clone();
        stored.version = expected_version + 1;
        Ok(true)
    }

    async fn business_settings(&self) -> StorageResult<HashMap<String, String>> {
        Ok(self.lock().state.settings.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::catalog::EventKind;
    use boxoffice_core::money::Money;
    use boxoffice_core::payout::PayoutStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
    }

    fn event() -> Event {
        Event {
            id: EventId::new(),
            organizer_id: UserId::new(),
            kind: EventKind::Own,
            capacity: 10,
            price: Money::new(1_000),
            approved: true,
            disabled: false,
            starts_at: now() + Duration::days(30),
        }
    }

    fn hold(event_id: EventId, quantity: u32) -> Reservation {
        Reservation {
            id: ReservationId::new(),
            event_id,
            section_id: None,
            buyer_id: UserId::new(),
            quantity,
            subtotal: Money::new(1_000),
            fee: Money::ZERO,
            amount: Money::new(1_000),
            status: ReservationStatus::PendingPayment,
            expires_at: Some(now() + Duration::minutes(15)),
            seat_assignment: Vec::new(),
            purchase_group_id: PurchaseGroupId::new(),
            ticket_id: None,
            paid_at: None,
            upload_deadline: None,
            cancel_reason: None,
            created_at: now(),
            updated_at: now(),
        }
    }

    #[tokio::test]
    async fn second_writer_on_the_same_event_conflicts() {
        let storage = MemoryStorage::new();
        let event = event();
        storage.put_event(event.clone());

        let mut a = storage.begin().await.unwrap();
        let mut b = storage.begin().await.unwrap();
        a.event_reservations(event.id).await.unwrap();
        b.event_reservations(event.id).await.unwrap();
        a.insert_reservation(&hold(event.id, 6)).await.unwrap();
        b.insert_reservation(&hold(event.id, 6)).await.unwrap();

        a.commit().await.unwrap();
        assert!(matches!(b.commit().await, Err(StorageError::SerializationConflict)));
        assert_eq!(storage.reservations_for_event(event.id).len(), 1);
    }

    #[tokio::test]
    async fn updating_a_ticket_changed_since_begin_fails_at_once() {
        let storage = MemoryStorage::new();
        let event = event();
        let ticket = Ticket {
            id: TicketId::new(),
            event_id: event.id,
            seller_id: UserId::new(),
            sold: false,
            reservation_id: None,
        };
        storage.put_event(event);
        storage.put_ticket(ticket.clone());

        let mut a = storage.begin().await.unwrap();
        let mut b = storage.begin().await.unwrap();
        let linked_by_a = Ticket {
            reservation_id: Some(ReservationId::new()),
            ..ticket.clone()
        };
        a.update_ticket(&linked_by_a).await.unwrap();
        a.commit().await.unwrap();

        let linked_by_b = Ticket {
            reservation_id: Some(ReservationId::new()),
            ..ticket.clone()
        };
        assert!(matches!(
            b.update_ticket(&linked_by_b).await,
            Err(StorageError::SerializationConflict)
        ));
        assert_eq!(storage.ticket(ticket.id).unwrap().reservation_id, linked_by_a.reservation_id);
    }

    #[tokio::test]
    async fn writers_on_different_events_do_not_conflict() {
        let storage = MemoryStorage::new();
        let (e1, e2) = (event(), event());
        storage.put_event(e1.clone());
        storage.put_event(e2.clone());

        let mut a = storage.begin().await.unwrap();
        let mut b = storage.begin().await.unwrap();
        a.event_reservations(e1.id).await.unwrap();
        b.event_reservations(e2.id).await.unwrap();
        a.insert_reservation(&hold(e1.id, 1)).await.unwrap();
        b.insert_reservation(&hold(e2.id, 1)).await.unwrap();

        a.commit().await.unwrap();
        b.commit().await.unwrap();
    }

    #[tokio::test]
    async fn dropped_transaction_writes_nothing() {
        let storage = MemoryStorage::new();
        let event = event();
        storage.put_event(event.clone());
        {
            let mut tx = storage.begin().await.unwrap();
            tx.insert_reservation(&hold(event.id, 1)).await.unwrap();
            // Reads inside the unit of work see its own writes.
            assert_eq!(tx.event_reservations(event.id).await.unwrap().len(), 1);
        }
        assert!(storage.reservations_for_event(event.id).is_empty());
    }

    #[tokio::test]
    async fn payout_cas_rejects_stale_versions() {
        let storage = MemoryStorage::new();
        let payout = Payout {
            id: PayoutId::new(),
            account_id: AccountId::new(),
            seller_id: UserId::new(),
            purchase_group_id: None,
            amount: Money::new(10),
            currency: "CLP".to_string(),
            status: PayoutStatus::Pending,
            retries: 0,
            idempotency_key: None,
            external_id: None,
            external_status: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
            version: 0,
            created_at: now(),
            updated_at: now(),
        };
        storage.put_payout(payout.clone());

        let mut first = payout.clone();
        first.retries = 1;
        assert!(storage.update_payout(&first, 0).await.unwrap());
        assert!(!storage.update_payout(&payout, 0).await.unwrap());

        let stored = storage.payout(payout.id).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.retries, 1);
    }
}
