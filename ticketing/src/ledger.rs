//! Inventory ledger.
//!
//! Remaining stock is always computed inside the unit of work whose writes
//! depend on it; read anywhere else it is advisory only.

use crate::error::{MarketError, MarketResult};
use crate::settlement::ReservationSettled;
use crate::storage::{StorageResult, StorageTx};
use boxoffice_core::catalog::{EventKind, Section};
use boxoffice_core::inventory::{self, StockSnapshot};
use boxoffice_core::payment::PaymentEffect;
use boxoffice_core::reducer::{Effects, Reducer};
use boxoffice_core::reservation::{
    Reservation, ReservationAction, ReservationEffect, ReservationEnvironment, ReservationReducer, ReservationStatus,
};
use boxoffice_core::types::{EventId, PurchaseGroupId};
use chrono::{DateTime, Utc};

/// Stock of an event at `now`, or `None` if the event does not exist.
///
/// # Errors
///
/// Propagates storage failures.
pub async fn event_stock(
    tx: &mut dyn StorageTx,
    event_id: EventId,
    now: DateTime<Utc>,
) -> StorageResult<Option<StockSnapshot>> {
    let Some(event) = tx.event(event_id).await? else {
        return Ok(None);
    };
    let snapshot = match event.kind {
        EventKind::Own => {
            let reservations = tx.event_reservations(event_id).await?;
            inventory::snapshot(event, &reservations, std::iter::empty(), now)
        }
        EventKind::Resale => {
            let tickets = tx.event_tickets(event_id).await?;
            inventory::snapshot(event, std::iter::empty(), &tickets, now)
        }
    };
    Ok(Some(snapshot))
}

/// Stock of one section at `now`.
#[derive(Debug, Clone)]
pub struct SectionStock {
    /// Units still sellable in the section
    pub remaining: u32,
    /// Active reservations of the section, for seat checks
    pub reservations: Vec<Reservation>,
}

/// Remaining capacity of a section.
///
/// # Errors
///
/// Propagates storage failures.
pub async fn section_stock(
    tx: &mut dyn StorageTx,
    section: &Section,
    now: DateTime<Utc>,
) -> StorageResult<SectionStock> {
    let reservations = tx.section_reservations(section.id).await?;
    Ok(SectionStock {
        remaining: inventory::remaining_capacity(section.capacity, &reservations, now),
        reservations,
    })
}

/// What applying payment effects did to the reservations of a group.
#[derive(Debug, Default)]
pub struct GroupChanges {
    /// Facts for rows that became `PAID`
    pub settled: Vec<ReservationSettled>,
    /// Rows canceled
    pub released: usize,
    /// Settled rows reversed
    pub revoked: usize,
}

/// Transition one reservation and carry out the resulting ticket writes.
///
/// # Errors
///
/// Fails if the reducer refuses the action or a write fails.
pub async fn transition(
    tx: &mut dyn StorageTx,
    reservation: &mut Reservation,
    action: ReservationAction,
    env: &ReservationEnvironment,
) -> MarketResult<Option<ReservationSettled>> {
    let effects = ReservationReducer.reduce(reservation, action, env)?;
    tx.update_reservation(reservation).await?;

    let mut settled = None;
    for effect in effects {
        match effect {
            ReservationEffect::ReleaseTicket(ticket_id) => {
                if let Some(mut ticket) = tx.ticket(ticket_id).await? {
                    if ticket.reservation_id == Some(reservation.id) {
                        ticket.reservation_id = None;
                        ticket.sold = false;
                        tx.update_ticket(&ticket).await?;
                    }
                }
            }
            ReservationEffect::MarkTicketSold(ticket_id) => {
                let mut ticket = tx.ticket(ticket_id).await?.ok_or_else(|| {
                    MarketError::internal(anyhow::anyhow!("ticket {ticket_id} of reservation {} vanished", reservation.id))
                })?;
                ticket.sold = true;
                ticket.reservation_id = Some(reservation.id);
                tx.update_ticket(&ticket).await?;
            }
            ReservationEffect::Settled { paid_at, .. } => {
                settled = Some(ReservationSettled::from_reservation(reservation, paid_at));
            }
        }
    }
    Ok(settled)
}

/// Carry out the group-level effects of a payment transition.
///
/// `SettleGroup` settles the pending rows of the group, `ReleaseGroup`
/// cancels them and `RevokeGroup` reverses settled and pending rows alike.
/// Rows in any other status are left alone.
///
/// # Errors
///
/// Fails if a reservation transition is refused or a write fails.
pub async fn apply_payment_effects(
    tx: &mut dyn StorageTx,
    effects: Effects<PaymentEffect>,
    env: &ReservationEnvironment,
    upload_deadline_hours: u32,
) -> MarketResult<GroupChanges> {
    let mut changes = GroupChanges::default();
    for effect in effects {
        match effect {
            PaymentEffect::SettleGroup(group) => {
                for mut row in pending_rows(tx, group).await? {
                    let action = ReservationAction::Settle { upload_deadline_hours };
                    if let Some(fact) = transition(tx, &mut row, action, env).await? {
                        changes.settled.push(fact);
                    }
                }
            }
            PaymentEffect::ReleaseGroup {
                purchase_group_id,
                reason,
            } => {
                for mut row in pending_rows(tx, purchase_group_id).await? {
                    transition(tx, &mut row, ReservationAction::Cancel { reason }, env).await?;
                    changes.released += 1;
                }
            }
            PaymentEffect::RevokeGroup(group) => {
                for mut row in tx.group_reservations(group).await? {
                    if matches!(row.status, ReservationStatus::Paid | ReservationStatus::PendingPayment) {
                        transition(tx, &mut row, ReservationAction::Revoke, env).await?;
                        changes.revoked += 1;
                    }
                }
            }
        }
    }
    Ok(changes)
}

async fn pending_rows(tx: &mut dyn StorageTx, group: PurchaseGroupId) -> StorageResult<Vec<Reservation>> {
    let rows = tx.group_reservations(group).await?;
    Ok(rows
        .into_iter()
        .filter(|r| r.status == ReservationStatus::PendingPayment)
        .collect())
}
