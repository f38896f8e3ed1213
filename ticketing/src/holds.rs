//! Reservation hold manager.
//!
//! A hold is one or more `PENDING_PAYMENT` reservations sharing a purchase
//! group. Every check that decides whether the hold may be created runs in
//! the same unit of work as the inserts, so two requests racing for the last
//! unit, the same seat or the same resale ticket cannot both commit.

use crate::alerts::{Alert, AlertSink};
use crate::error::{MarketError, MarketResult, codes};
use crate::gateway::PaymentGateway;
use crate::identity::Caller;
use crate::ledger;
use crate::limits::{BusinessLimits, LimitsCache};
use crate::storage::{Storage, StorageTx};
use boxoffice_core::catalog::{Event, EventKind, Section, Ticket};
use boxoffice_core::environment::Clock;
use boxoffice_core::inventory;
use boxoffice_core::money::Money;
use boxoffice_core::payment::{PaymentAction, PaymentEnvironment, PaymentReducer, PaymentStatus, Rejection};
use boxoffice_core::pricing;
use boxoffice_core::reducer::Reducer;
use boxoffice_core::reservation::{
    CancelReason, Reservation, ReservationAction, ReservationEnvironment, ReservationStatus,
};
use boxoffice_core::types::{
    EventId, PaymentId, PurchaseGroupId, ReservationId, SeatLabel, SectionId, TicketId, UserId,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// One line of a hold request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldItem {
    /// Section, for sectioned OWN events
    #[serde(default)]
    pub section_id: Option<SectionId>,
    /// Units wanted
    pub quantity: u32,
    /// Named seats, for seated sections
    #[serde(default)]
    pub seats: Vec<SeatLabel>,
    /// Resale ticket, for RESALE events
    #[serde(default)]
    pub ticket_id: Option<TicketId>,
}

/// A hold request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldRequest {
    /// Event
    pub event_id: EventId,
    /// One item per section (or the single resale ticket)
    pub items: Vec<HoldItem>,
}

/// A created or renewed hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hold {
    /// Group shared by every row
    pub purchase_group_id: PurchaseGroupId,
    /// The rows, in creation order
    pub reservations: Vec<Reservation>,
    /// Deadline for paying
    pub expires_at: DateTime<Utc>,
    /// Sum of the rows' amounts
    pub amount: Money,
    /// An existing hold was extended instead of a new one created
    pub renewed: bool,
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations moved to `EXPIRED`
    pub expired: usize,
    /// Other pending rows of those groups canceled
    pub released: usize,
    /// `INITIATED` payments failed
    pub failed_payments: usize,
    /// Settled payments of unsettled holds refunded or voided
    pub refunded: usize,
}

/// Creates, extends and releases holds.
pub struct HoldManager {
    storage: Arc<dyn Storage>,
    limits: Arc<LimitsCache>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    alerts: Arc<dyn AlertSink>,
    reservation_env: ReservationEnvironment,
    payment_env: PaymentEnvironment,
}

/// Per-section totals accumulated while validating a request.
/// What a hold attempt knew when its unit of work was aborted.
struct Contended {
    kind: Option<EventKind>,
    remaining: u32,
    requested: u32,
}

struct SectionDemand {
    section: Section,
    remaining: u32,
    reservations: Vec<Reservation>,
    requested: u32,
    seats: Vec<SeatLabel>,
}

impl HoldManager {
    /// Creates a hold manager
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        limits: Arc<LimitsCache>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            reservation_env: ReservationEnvironment::new(Arc::clone(&clock)),
            payment_env: PaymentEnvironment::new(Arc::clone(&clock)),
            storage,
            limits,
            clock,
            gateway,
            alerts,
        }
    }

    /// Hold inventory for `buyer`.
    ///
    /// If the buyer already has an unexpired hold on the event, that hold is
    /// extended and returned unchanged in quantity and amount.
    ///
    /// # Errors
    ///
    /// Any of the hold error codes; a lost race is reported as the conflict
    /// of the request kind (`INSUFFICIENT_STOCK`, `SEATS_ALREADY_RESERVED` or
    /// `TICKET_ALREADY_SOLD`).
    pub async fn hold(&self, buyer: UserId, request: HoldRequest) -> MarketResult<Hold> {
        let result = self.try_hold(buyer, &request).await;
        match &result {
            Ok(hold) => {
                crate::metrics::record_hold(if hold.renewed { "renewed" } else { "created" });
                tracing::info!(
                    purchase_group_id = %hold.purchase_group_id,
                    event_id = %request.event_id,
                    buyer_id = %buyer,
                    rows = hold.reservations.len(),
                    amount = %hold.amount,
                    renewed = hold.renewed,
                    "Hold placed"
                );
            }
            Err(err) => {
                crate::metrics::record_hold(err.code());
                tracing::debug!(event_id = %request.event_id, buyer_id = %buyer, code = err.code(), "Hold rejected");
            }
        }
        result
    }

    /// A serialization failure anywhere in the unit of work means another
    /// hold won the race.
    async fn try_hold(&self, buyer: UserId, request: &HoldRequest) -> MarketResult<Hold> {
        let mut contended = None;
        match self.place_hold(buyer, request, &mut contended).await {
            Err(err) if err.code() == codes::CONCURRENT_UPDATE => Err(match contended {
                Some(Contended {
                    kind,
                    remaining,
                    requested,
                }) => lost_race(kind, request, remaining, requested),
                None => err,
            }),
            other => other,
        }
    }

    #[allow(clippy::too_many_lines)]
    async fn place_hold(
        &self,
        buyer: UserId,
        request: &HoldRequest,
        contended: &mut Option<Contended>,
    ) -> MarketResult<Hold> {
        validate_shape(request)?;
        let requested = total_quantity(request)?;
        let limits = self.limits.snapshot().await;
        let now = self.clock.now();
        *contended = Some(Contended {
            kind: None,
            remaining: 0,
            requested,
        });
        let mut tx = self.storage.begin().await?;

        let stock = ledger::event_stock(tx.as_mut(), request.event_id, now)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::EVENT_NOT_FOUND, "Event not found"))?;
        check_event(&stock.event, buyer, stock.has_started)?;
        let event = stock.event;
        *contended = Some(Contended {
            kind: Some(event.kind),
            remaining: stock.remaining,
            requested,
        });

        let open = tx.open_holds(buyer, event.id, now).await?;
        if let Some(lead) = open.first() {
            // A race on renewal is between the buyer's own requests.
            *contended = None;
            let group = lead.purchase_group_id;
            return self.renew(tx, group, &limits, now).await;
        }

        let ticket = match event.kind {
            EventKind::Resale => Some(resale_ticket(tx.as_mut(), &event, buyer, request).await?),
            EventKind::Own => None,
        };

        let max = limits.max_per_purchase(event.kind);
        if requested > max {
            return Err(MarketError::validation(
                codes::MAX_PER_PURCHASE_EXCEEDED,
                format!("At most {max} tickets per purchase"),
            )
            .with("max", max)
            .with("requested", requested));
        }

        if requested > stock.remaining {
            return Err(insufficient_stock(stock.remaining, requested));
        }

        let sections = match event.kind {
            EventKind::Own => check_sections(tx.as_mut(), &event, request, now).await?,
            EventKind::Resale => HashMap::new(),
        };

        let purchase_group_id = PurchaseGroupId::new();
        let expires_at = now + limits.hold_duration();
        let mut reservations = Vec::with_capacity(request.items.len());
        for item in &request.items {
            let unit_price = item
                .section_id
                .and_then(|id| sections.get(&id))
                .map_or(event.price, |demand| demand.section.unit_price(&event));
            let quote = pricing::quote(unit_price, item.quantity, limits.platform_fee_bps)
                .ok_or_else(|| MarketError::invalid_input("Order amount is too large"))?;
            let reservation = Reservation {
                id: ReservationId::new(),
                event_id: event.id,
                section_id: item.section_id,
                buyer_id: buyer,
                quantity: item.quantity,
                subtotal: quote.subtotal,
                fee: quote.fee,
                amount: quote.total,
                status: ReservationStatus::PendingPayment,
                expires_at: Some(expires_at),
                seat_assignment: item.seats.clone(),
                purchase_group_id,
                ticket_id: ticket.as_ref().map(|t| t.id),
                paid_at: None,
                upload_deadline: None,
                cancel_reason: None,
                created_at: now,
                updated_at: now,
            };
            tx.insert_reservation(&reservation).await?;
            reservations.push(reservation);
        }

        if let (Some(mut ticket), Some(first)) = (ticket, reservations.first()) {
            ticket.reservation_id = Some(first.id);
            tx.update_ticket(&ticket).await?;
        }

        tx.commit().await?;

        let amount = reservations.iter().map(|r| r.amount).sum();
        Ok(Hold {
            purchase_group_id,
            reservations,
            expires_at,
            amount,
            renewed: false,
        })
    }

    async fn renew(
        &self,
        mut tx: Box<dyn StorageTx>,
        group: PurchaseGroupId,
        limits: &BusinessLimits,
        now: DateTime<Utc>,
    ) -> MarketResult<Hold> {
        let until = now + limits.hold_duration();
        let mut reservations = Vec::new();
        for mut row in tx.group_reservations(group).await? {
            if row.status != ReservationStatus::PendingPayment {
                continue;
            }
            ledger::transition(tx.as_mut(), &mut row, ReservationAction::Extend { until }, &self.reservation_env)
                .await?;
            reservations.push(row);
        }
        if reservations.is_empty() {
            return Err(MarketError::state_guard(
                codes::RESERVATION_NOT_PENDING,
                "The reservation is no longer pending payment",
            ));
        }
        tx.commit().await?;

        let expires_at = reservations
            .iter()
            .filter_map(|r| r.expires_at)
            .min()
            .unwrap_or(until);
        let amount = reservations.iter().map(|r| r.amount).sum();
        Ok(Hold {
            purchase_group_id: group,
            reservations,
            expires_at,
            amount,
            renewed: true,
        })
    }

    /// Push the deadline of the buyer's hold forward.
    ///
    /// Quantity and amount are kept, so a payment already quoted to the
    /// gateway stays consistent.
    ///
    /// # Errors
    ///
    /// `RESERVATION_NOT_FOUND`, `RESERVATION_NOT_PENDING` or
    /// `RESERVATION_EXPIRED`.
    pub async fn refresh_hold(&self, buyer: UserId, reservation_id: ReservationId) -> MarketResult<Hold> {
        let limits = self.limits.snapshot().await;
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let reservation = tx
            .reservation(reservation_id)
            .await?
            .filter(|r| r.buyer_id == buyer)
            .ok_or_else(|| MarketError::not_found(codes::RESERVATION_NOT_FOUND, "Reservation not found"))?;
        if reservation.status != ReservationStatus::PendingPayment {
            return Err(MarketError::state_guard(
                codes::RESERVATION_NOT_PENDING,
                "The reservation is no longer pending payment",
            )
            .with("status", reservation.status));
        }

        let hold = self
            .renew(tx, reservation.purchase_group_id, &limits, now)
            .await?;
        tracing::info!(
            purchase_group_id = %hold.purchase_group_id,
            expires_at = %hold.expires_at,
            "Hold extended"
        );
        Ok(hold)
    }

    /// Cancel the purchase group of a reservation.
    ///
    /// Buyers cancel their own holds, organizers holds on their events and
    /// administrators anything. Linked resale tickets are released and an
    /// `INITIATED` payment is voided.
    ///
    /// # Errors
    ///
    /// `RESERVATION_NOT_FOUND`, `FORBIDDEN`, `CANNOT_CANCEL_PAID` or
    /// `RESERVATION_NOT_PENDING`.
    pub async fn cancel(&self, caller: &Caller, reservation_id: ReservationId) -> MarketResult<Vec<Reservation>> {
        let mut tx = self.storage.begin().await?;

        let reservation = tx
            .reservation(reservation_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::RESERVATION_NOT_FOUND, "Reservation not found"))?;
        let event = tx
            .event(reservation.event_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::EVENT_NOT_FOUND, "Event not found"))?;

        let reason = if caller.user_id == reservation.buyer_id {
            CancelReason::Buyer
        } else if caller.user_id == event.organizer_id {
            CancelReason::Organizer
        } else if caller.is_admin() {
            CancelReason::Admin
        } else {
            return Err(MarketError::forbidden("You cannot cancel this reservation"));
        };

        match reservation.status {
            ReservationStatus::PendingPayment => {}
            ReservationStatus::Canceled => return Ok(vec![reservation]),
            ReservationStatus::Paid => {
                return Err(MarketError::state_guard(
                    codes::CANNOT_CANCEL_PAID,
                    "A paid reservation cannot be canceled",
                ));
            }
            ReservationStatus::Expired => {
                return Err(MarketError::state_guard(
                    codes::RESERVATION_NOT_PENDING,
                    "The reservation has already expired",
                ));
            }
        }

        let group = reservation.purchase_group_id;
        if let Some(mut payment) = tx.payment_for_group(group).await? {
            if payment.status.is_settled() {
                return Err(MarketError::state_guard(
                    codes::CANNOT_CANCEL_PAID,
                    "The reservation has already been paid",
                ));
            }
            if payment.status == PaymentStatus::Initiated {
                // The group is canceled below with the caller's reason.
                PaymentReducer.reduce(&mut payment, PaymentAction::Void, &self.payment_env)?;
                tx.update_payment(&payment).await?;
                crate::metrics::record_payment(payment.status);
            }
        }

        let mut canceled = Vec::new();
        for mut row in tx.group_reservations(group).await? {
            if row.status == ReservationStatus::PendingPayment {
                ledger::transition(tx.as_mut(), &mut row, ReservationAction::Cancel { reason }, &self.reservation_env)
                    .await?;
                canceled.push(row);
            }
        }
        tx.commit().await?;

        crate::metrics::record_reservations("canceled", canceled.len());
        tracing::info!(
            purchase_group_id = %group,
            reason = reason.as_str(),
            rows = canceled.len(),
            "Hold canceled"
        );
        Ok(canceled)
    }

    /// Expire stale holds and return money taken for holds that never settled.
    ///
    /// At most `limit` stale reservations and `limit` orphaned payments are
    /// handled per call.
    ///
    /// # Errors
    ///
    /// Storage failures, including a lost race with a concurrent writer; the
    /// next sweep picks the rows up again.
    pub async fn sweep_expired(&self, limit: usize) -> MarketResult<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut tx = self.storage.begin().await?;

        let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;
        for stale in tx.stale_reservations(now, limit).await? {
            let Some(mut row) = tx.reservation(stale.id).await? else {
                continue;
            };
            if !row.is_stale(now) {
                continue;
            }
            ledger::transition(tx.as_mut(), &mut row, ReservationAction::Expire, &self.reservation_env).await?;
            report.expired += 1;

            if let Some(mut payment) = tx.payment_for_group(row.purchase_group_id).await? {
                if payment.status == PaymentStatus::Initiated {
                    let effects = PaymentReducer.reduce(
                        &mut payment,
                        PaymentAction::Reject {
                            reason: Rejection::HoldExpired,
                        },
                        &self.payment_env,
                    )?;
                    tx.update_payment(&payment).await?;
                    let changes =
                        ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours)
                            .await?;
                    report.released += changes.released;
                    report.failed_payments += 1;
                    crate::metrics::record_payment(payment.status);
                }
            }
        }
        tx.commit().await?;
        crate::metrics::record_reservations("expired", report.expired);

        report.refunded = self.return_orphaned_funds(limit).await?;

        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                released = report.released,
                failed_payments = report.failed_payments,
                refunded = report.refunded,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    async fn return_orphaned_funds(&self, limit: usize) -> MarketResult<usize> {
        let orphans = {
            let mut tx = self.storage.begin().await?;
            let orphans = tx.orphaned_payments(limit).await?;
            tx.commit().await?;
            orphans
        };

        let mut returned = 0;
        for orphan in orphans {
            let Some(token) = orphan.token.clone() else {
                tracing::warn!(payment_id = %orphan.id, "Settled payment without a gateway token");
                continue;
            };
            let amount = orphan.refundable();
            if let Err(err) = self.gateway.refund(&token, amount).await {
                tracing::warn!(payment_id = %orphan.id, error = %err, "Refund of unsettled payment failed");
                self.alerts
                    .raise(Alert::RefundFailed {
                        reference: orphan.buy_order.clone(),
                        error: err.to_string(),
                    })
                    .await;
                continue;
            }

            if let Err(err) = self.record_return(orphan.id, amount).await {
                tracing::error!(payment_id = %orphan.id, error = %err, "Refund issued but not recorded");
                self.alerts
                    .raise(Alert::RefundFailed {
                        reference: orphan.buy_order.clone(),
                        error: format!("refund issued but not recorded: {err}"),
                    })
                    .await;
                continue;
            }
            crate::metrics::record_refund(amount);
            returned += 1;
        }
        Ok(returned)
    }

    async fn record_return(&self, payment_id: PaymentId, amount: Money) -> MarketResult<()> {
        let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;
        let mut tx = self.storage.begin().await?;
        let mut payment = tx
            .payment(payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;

        let action = if payment.status == PaymentStatus::Authorized {
            PaymentAction::Void
        } else {
            PaymentAction::Refunded { amount }
        };
        let effects = PaymentReducer.reduce(&mut payment, action, &self.payment_env)?;
        tx.update_payment(&payment).await?;
        ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours).await?;
        tx.commit().await?;

        crate::metrics::record_payment(payment.status);
        tracing::info!(payment_id = %payment.id, amount = %amount, status = %payment.status, "Unsettled payment returned");
        Ok(())
    }
}

async fn resale_ticket(
    tx: &mut dyn StorageTx,
    event: &Event,
    buyer: UserId,
    request: &HoldRequest,
) -> MarketResult<Ticket> {
    if request.items.len() > 1 {
        return Err(MarketError::validation(
            codes::RESALE_ONLY_ALLOWS_ONE_TICKET,
            "Resale purchases are one ticket at a time",
        ));
    }
    let item = request.items.first().cloned().unwrap_or_default();
    let Some(ticket_id) = item.ticket_id else {
        return Err(MarketError::validation(
            codes::TICKET_ID_REQUIRED_FOR_RESALE,
            "A ticket id is required for resale events",
        ));
    };
    if item.quantity != 1 {
        return Err(MarketError::validation(
            codes::RESALE_ONLY_ALLOWS_ONE_TICKET,
            "Resale purchases are one ticket at a time",
        )
        .with("requested", item.quantity));
    }

    let ticket = tx
        .ticket(ticket_id)
        .await?
        .filter(|t| t.event_id == event.id)
        .ok_or_else(|| {
            MarketError::not_found(codes::TICKET_NOT_FOUND, "Ticket not found").with("ticketId", ticket_id)
        })?;
    if ticket.seller_id == buyer {
        return Err(MarketError::validation(
            codes::CANNOT_BUY_OWN_TICKET,
            "You cannot buy your own ticket",
        ));
    }
    if !ticket.is_available() {
        return Err(ticket_already_sold(ticket_id));
    }
    Ok(ticket)
}

fn validate_shape(request: &HoldRequest) -> MarketResult<()> {
    if request.items.is_empty() {
        return Err(MarketError::invalid_input("At least one item is required"));
    }
    if request.items.iter().any(|i| i.quantity == 0) {
        return Err(MarketError::invalid_input("Quantity must be positive"));
    }
    Ok(())
}

fn total_quantity(request: &HoldRequest) -> MarketResult<u32> {
    request
        .items
        .iter()
        .try_fold(0u32, |acc, item| acc.checked_add(item.quantity))
        .ok_or_else(|| MarketError::invalid_input("Quantity is too large"))
}

fn check_event(event: &Event, buyer: UserId, has_started: bool) -> MarketResult<()> {
    if !event.approved {
        return Err(MarketError::state_guard(codes::EVENT_NOT_APPROVED, "The event is not approved"));
    }
    if has_started {
        return Err(MarketError::state_guard(codes::EVENT_HAS_STARTED, "The event has already started")
            .with("startsAt", event.starts_at));
    }
    if event.disabled {
        return Err(MarketError::state_guard(codes::EVENT_DISABLED, "The event is disabled"));
    }
    if event.organizer_id == buyer {
        return Err(MarketError::validation(
            codes::CANNOT_BUY_OWN_EVENT,
            "You cannot buy tickets for your own event",
        ));
    }
    Ok(())
}

async fn check_sections(
    tx: &mut dyn StorageTx,
    event: &Event,
    request: &HoldRequest,
    now: DateTime<Utc>,
) -> MarketResult<HashMap<SectionId, SectionDemand>> {
    let mut sections: HashMap<SectionId, SectionDemand> = HashMap::new();

    for item in &request.items {
        let Some(section_id) = item.section_id else {
            if !item.seats.is_empty() {
                return Err(MarketError::validation(codes::INVALID_SEATS, "Seats require a section")
                    .with("invalidSeats", &item.seats));
            }
            continue;
        };

        if !sections.contains_key(&section_id) {
            let section = tx
                .section(section_id)
                .await?
                .filter(|s| s.event_id == event.id)
                .ok_or_else(|| {
                    MarketError::not_found(codes::SECTION_NOT_FOUND, "Section not found").with("sectionId", section_id)
                })?;
            let stock = ledger::section_stock(tx, &section, now).await?;
            sections.insert(
                section_id,
                SectionDemand {
                    section,
                    remaining: stock.remaining,
                    reservations: stock.reservations,
                    requested: 0,
                    seats: Vec::new(),
                },
            );
        }
        let Some(demand) = sections.get_mut(&section_id) else {
            continue;
        };

        if demand.section.is_seated() {
            check_seats(demand, item, now)?;
            demand.seats.extend(item.seats.iter().cloned());
        } else {
            if !item.seats.is_empty() {
                return Err(MarketError::validation(codes::INVALID_SEATS, "This section has no named seats")
                    .with("invalidSeats", &item.seats));
            }
            demand.requested = demand.requested.saturating_add(item.quantity);
            if demand.requested > demand.remaining {
                return Err(MarketError::conflict(
                    codes::SECTION_INSUFFICIENT_STOCK,
                    format!("Only {} tickets left in this section", demand.remaining),
                )
                .with("sectionId", section_id)
                .with("remaining", demand.remaining)
                .with("requested", demand.requested));
            }
        }
    }
    Ok(sections)
}

fn check_seats(demand: &SectionDemand, item: &HoldItem, now: DateTime<Utc>) -> MarketResult<()> {
    let quantity = usize::try_from(item.quantity).unwrap_or(usize::MAX);
    if item.seats.len() != quantity {
        return Err(MarketError::validation(
            codes::SEATS_QUANTITY_MISMATCH,
            "The number of seats must match the quantity",
        )
        .with("quantity", item.quantity)
        .with("seats", item.seats.len()));
    }

    let unknown = inventory::unknown_seats(&item.seats, &demand.section.seats);
    if !unknown.is_empty() || inventory::has_duplicate_seats(&item.seats) {
        return Err(MarketError::validation(codes::INVALID_SEATS, "Some seats are invalid")
            .with("invalidSeats", unknown));
    }

    let mut conflicting = inventory::seat_conflicts(&item.seats, &demand.reservations, None, now);
    conflicting.extend(item.seats.iter().filter(|s| demand.seats.contains(s)).cloned());
    if !conflicting.is_empty() {
        conflicting.sort();
        conflicting.dedup();
        return Err(MarketError::conflict(codes::SEATS_ALREADY_RESERVED, "Some seats are already reserved")
            .with("conflictingSeats", conflicting));
    }
    Ok(())
}

fn insufficient_stock(remaining: u32, requested: u32) -> MarketError {
    MarketError::conflict(
        codes::INSUFFICIENT_STOCK,
        format!("Only {remaining} tickets left"),
    )
    .with("remaining", remaining)
    .with("requested", requested)
}

fn ticket_already_sold(ticket_id: TicketId) -> MarketError {
    MarketError::conflict(codes::TICKET_ALREADY_SOLD, "The ticket is no longer available").with("ticketId", ticket_id)
}

/// The error reported to the request that lost a commit race.
fn lost_race(kind: Option<EventKind>, request: &HoldRequest, remaining: u32, requested: u32) -> MarketError {
    if kind != Some(EventKind::Own) {
        if let Some(ticket_id) = request.items.first().and_then(|i| i.ticket_id) {
            return ticket_already_sold(ticket_id);
        }
    }
    let seats: Vec<&SeatLabel> = request.items.iter().flat_map(|i| i.seats.iter()).collect();
    if !seats.is_empty() {
        return MarketError::conflict(codes::SEATS_ALREADY_RESERVED, "Some seats are already reserved")
            .with("conflictingSeats", seats);
    }
    insufficient_stock(remaining, requested)
}
