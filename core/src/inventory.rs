//! Inventory ledger math.
//!
//! Pure functions over rows already loaded inside a serializable unit of work.
//! The results are only authoritative when the caller writes in that same unit
//! of work; on their own they are advisory.

use crate::catalog::{Event, EventKind, Ticket};
use crate::reservation::Reservation;
use crate::types::{PurchaseGroupId, SeatLabel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sellable stock for an event at a point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSnapshot {
    /// Units still sellable
    pub remaining: u32,
    /// The event has started
    pub has_started: bool,
    /// The event as read
    pub event: Event,
}

/// Units held by reservations that count against capacity at `now`.
#[must_use]
pub fn held_quantity<'a>(reservations: impl IntoIterator<Item = &'a Reservation>, now: DateTime<Utc>) -> u32 {
    reservations
        .into_iter()
        .filter(|r| r.counts_against_capacity(now))
        .fold(0u32, |acc, r| acc.saturating_add(r.quantity))
}

/// `capacity - held`, clamped at zero.
#[must_use]
pub fn remaining_capacity<'a>(
    capacity: u32,
    reservations: impl IntoIterator<Item = &'a Reservation>,
    now: DateTime<Utc>,
) -> u32 {
    capacity.saturating_sub(held_quantity(reservations, now))
}

/// Unsold, unlinked resale tickets.
#[must_use]
pub fn available_tickets<'a>(tickets: impl IntoIterator<Item = &'a Ticket>) -> u32 {
    let count = tickets.into_iter().filter(|t| t.is_available()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Stock snapshot for an event.
///
/// `reservations` is only consulted for OWN events and `tickets` only for
/// RESALE events.
#[must_use]
pub fn snapshot<'a>(
    event: Event,
    reservations: impl IntoIterator<Item = &'a Reservation>,
    tickets: impl IntoIterator<Item = &'a Ticket>,
    now: DateTime<Utc>,
) -> StockSnapshot {
    let remaining = match event.kind {
        EventKind::Own => remaining_capacity(event.capacity, reservations, now),
        EventKind::Resale => available_tickets(tickets),
    };
    StockSnapshot {
        remaining,
        has_started: event.has_started(now),
        event,
    }
}

/// Requested seats already held by another active reservation.
///
/// Reservations of `own_group` are skipped so a renewed hold does not conflict
/// with itself. The result is sorted and de-duplicated.
#[must_use]
pub fn seat_conflicts<'a>(
    requested: &[SeatLabel],
    reservations: impl IntoIterator<Item = &'a Reservation>,
    own_group: Option<PurchaseGroupId>,
    now: DateTime<Utc>,
) -> Vec<SeatLabel> {
    let wanted: BTreeSet<&SeatLabel> = requested.iter().collect();
    let taken: BTreeSet<&SeatLabel> = reservations
        .into_iter()
        .filter(|r| Some(r.purchase_group_id) != own_group)
        .filter(|r| r.counts_against_capacity(now))
        .flat_map(|r| r.seat_assignment.iter())
        .collect();
    wanted.intersection(&taken).map(|s| (*s).clone()).collect()
}

/// Requested seats that the section does not have.
#[must_use]
pub fn unknown_seats(requested: &[SeatLabel], section_seats: &[SeatLabel]) -> Vec<SeatLabel> {
    let known: BTreeSet<&SeatLabel> = section_seats.iter().collect();
    let unknown: BTreeSet<&SeatLabel> = requested.iter().filter(|s| !known.contains(s)).collect();
    unknown.into_iter().cloned().collect()
}

/// Whether a seat list names the same seat twice.
#[must_use]
pub fn has_duplicate_seats(requested: &[SeatLabel]) -> bool {
    let unique: BTreeSet<&SeatLabel> = requested.iter().collect();
    unique.len() != requested.len()
}
