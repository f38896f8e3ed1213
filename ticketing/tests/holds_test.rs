//! Hold manager integration tests.
//!
//! Run with: `cargo test --test holds_test`

#![allow(clippy::unwrap_used)]

mod common;

use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::reservation::{CancelReason, ReservationStatus};
use boxoffice_core::types::{SeatLabel, UserId};
use chrono::Duration;
use common::{Harness, general_admission};
use ticketing::error::codes;
use ticketing::holds::{HoldItem, HoldRequest};
use ticketing::identity::Caller;

#[tokio::test]
async fn test_hold_creates_pending_rows_until_deadline() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 5_000);
    let buyer = UserId::new();

    let hold = h.hold(buyer, &event, 2).await;

    assert!(!hold.renewed);
    assert_eq!(hold.amount.units(), 10_000);
    assert_eq!(hold.expires_at, h.now() + Duration::minutes(15));
    assert_eq!(hold.reservations.len(), 1);
    let row = h.storage.reservation(hold.reservations[0].id).unwrap();
    assert_eq!(row.status, ReservationStatus::PendingPayment);
    assert_eq!(row.buyer_id, buyer);
    assert_eq!(row.quantity, 2);
}

#[tokio::test]
async fn test_second_hold_on_same_event_extends_the_first() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 5_000);
    let buyer = UserId::new();

    let first = h.hold(buyer, &event, 2).await;
    h.clock.advance(Duration::minutes(10));
    let second = h.hold(buyer, &event, 4).await;

    assert!(second.renewed);
    assert_eq!(second.purchase_group_id, first.purchase_group_id);
    assert_eq!(second.amount, first.amount);
    assert_eq!(second.expires_at, h.now() + Duration::minutes(15));
    assert_eq!(h.storage.reservations_for_event(event.id).len(), 1);
}

#[tokio::test]
async fn test_refresh_extends_only_the_callers_hold() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 1_000);
    let buyer = UserId::new();
    let hold = h.hold(buyer, &event, 1).await;
    let id = hold.reservations[0].id;

    h.clock.advance(Duration::minutes(5));
    let refreshed = h.state.holds.refresh_hold(buyer, id).await.unwrap();
    assert_eq!(refreshed.expires_at, h.now() + Duration::minutes(15));

    let err = h.state.holds.refresh_hold(UserId::new(), id).await.unwrap_err();
    assert_eq!(err.code(), codes::RESERVATION_NOT_FOUND);
}

#[tokio::test]
async fn test_quantity_above_purchase_limit_is_rejected() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 100, 1_000);

    let err = h
        .state
        .holds
        .hold(UserId::new(), general_admission(event.id, 11))
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::MAX_PER_PURCHASE_EXCEEDED);
    assert_eq!(err.context()["max"], 10);
}

#[tokio::test]
async fn test_insufficient_stock_reports_what_is_left() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 3, 1_000);
    h.hold(UserId::new(), &event, 2).await;

    let err = h
        .state
        .holds
        .hold(UserId::new(), general_admission(event.id, 2))
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::INSUFFICIENT_STOCK);
    assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    assert_eq!(err.context()["remaining"], 1);
}

#[tokio::test]
async fn test_lapsed_holds_no_longer_count_against_stock() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 2, 1_000);
    h.hold(UserId::new(), &event, 2).await;

    h.clock.advance(Duration::minutes(16));
    let hold = h.hold(UserId::new(), &event, 2).await;

    assert_eq!(hold.reservations[0].quantity, 2);
}

#[tokio::test]
async fn test_organizer_cannot_hold_own_event() {
    let h = Harness::new();
    let organizer = UserId::new();
    let event = h.own_event(organizer, 10, 1_000);

    let err = h
        .state
        .holds
        .hold(organizer, general_admission(event.id, 1))
        .await
        .unwrap_err();

    assert_eq!(err.code(), codes::CANNOT_BUY_OWN_EVENT);
}

#[tokio::test]
async fn test_unapproved_and_started_events_are_closed() {
    let h = Harness::new();
    let mut event = h.own_event(UserId::new(), 10, 1_000);
    event.approved = false;
    h.storage.put_event(event.clone());
    let err = h
        .state
        .holds
        .hold(UserId::new(), general_admission(event.id, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::EVENT_NOT_APPROVED);

    event.approved = true;
    event.starts_at = h.now() - Duration::hours(1);
    h.storage.put_event(event.clone());
    let err = h
        .state
        .holds
        .hold(UserId::new(), general_admission(event.id, 1))
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::EVENT_HAS_STARTED);
}

/// Twenty buyers race for five units; losers see a stock conflict.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_never_oversell() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 5, 1_000);

    let tasks = (0..20).map(|_| {
        let holds = h.state.holds.clone();
        let request = general_admission(event.id, 1);
        tokio::spawn(async move { holds.hold(UserId::new(), request).await })
    });
    let results = futures::future::join_all(tasks).await;

    let mut won = 0;
    for result in results {
        match result.unwrap() {
            Ok(_) => won += 1,
            Err(err) => assert_eq!(err.code(), codes::INSUFFICIENT_STOCK),
        }
    }
    assert!((1..=5).contains(&won));
    let held: u32 = h
        .storage
        .reservations_for_event(event.id)
        .iter()
        .filter(|r| r.status == ReservationStatus::PendingPayment)
        .map(|r| r.quantity)
        .sum();
    assert_eq!(held, won);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_large_holds_cannot_both_fit() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 1_000);

    let tasks = (0..2).map(|_| {
        let holds = h.state.holds.clone();
        let request = general_admission(event.id, 6);
        tokio::spawn(async move { holds.hold(UserId::new(), request).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert_eq!(err.code(), codes::INSUFFICIENT_STOCK);
    // A loser that raced the winner reports the stock its snapshot saw.
    let remaining = err.context()["remaining"].as_u64().unwrap();
    assert!(remaining == 10 || remaining == 4);
}

#[tokio::test]
async fn test_taken_seat_is_reported_as_conflict() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 50, 1_000);
    let section = h.seated_section(&event, &["A1", "A2", "A3"]);
    let seats = |labels: &[&str]| HoldRequest {
        event_id: event.id,
        items: vec![HoldItem {
            section_id: Some(section.id),
            quantity: u32::try_from(labels.len()).unwrap(),
            seats: labels.iter().map(|s| SeatLabel::new(*s)).collect(),
            ticket_id: None,
        }],
    };

    h.state.holds.hold(UserId::new(), seats(&["A1", "A2"])).await.unwrap();
    let err = h.state.holds.hold(UserId::new(), seats(&["A2", "A3"])).await.unwrap_err();

    assert_eq!(err.code(), codes::SEATS_ALREADY_RESERVED);
    assert_eq!(err.context()["conflictingSeats"], serde_json::json!(["A2"]));

    let err = h.state.holds.hold(UserId::new(), seats(&["Z9"])).await.unwrap_err();
    assert_eq!(err.code(), codes::INVALID_SEATS);
}

#[tokio::test]
async fn test_resale_ticket_is_held_once() {
    let h = Harness::new();
    let event = h.resale_event(UserId::new(), 20_000);
    let seller = UserId::new();
    let ticket = h.ticket(&event, seller);
    let request = HoldRequest {
        event_id: event.id,
        items: vec![HoldItem {
            quantity: 1,
            ticket_id: Some(ticket.id),
            ..HoldItem::default()
        }],
    };

    let hold = h.state.holds.hold(UserId::new(), request.clone()).await.unwrap();
    assert_eq!(hold.reservations[0].ticket_id, Some(ticket.id));
    assert_eq!(
        h.storage.ticket(ticket.id).unwrap().reservation_id,
        Some(hold.reservations[0].id)
    );

    let err = h.state.holds.hold(UserId::new(), request.clone()).await.unwrap_err();
    assert_eq!(err.code(), codes::TICKET_ALREADY_SOLD);

    let err = h.state.holds.hold(seller, request).await.unwrap_err();
    assert_eq!(err.code(), codes::CANNOT_BUY_OWN_TICKET);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_of_one_resale_ticket() {
    let h = Harness::new();
    let event = h.resale_event(UserId::new(), 20_000);
    let ticket = h.ticket(&event, UserId::new());
    let request = HoldRequest {
        event_id: event.id,
        items: vec![HoldItem {
            quantity: 1,
            ticket_id: Some(ticket.id),
            ..HoldItem::default()
        }],
    };

    let tasks = (0..8).map(|_| {
        let holds = h.state.holds.clone();
        let request = request.clone();
        tokio::spawn(async move { holds.hold(UserId::new(), request).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), codes::TICKET_ALREADY_SOLD);
    }
    assert_eq!(
        h.storage.ticket(ticket.id).unwrap().reservation_id,
        Some(winners[0].reservations[0].id)
    );
    assert_eq!(h.storage.reservations_for_event(event.id).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_buyers_of_one_seat() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 50, 1_000);
    let section = h.seated_section(&event, &["A1", "A2", "A3"]);
    let request = HoldRequest {
        event_id: event.id,
        items: vec![HoldItem {
            section_id: Some(section.id),
            quantity: 1,
            seats: vec![SeatLabel::new("A1")],
            ticket_id: None,
        }],
    };

    let tasks = (0..8).map(|_| {
        let holds = h.state.holds.clone();
        let request = request.clone();
        tokio::spawn(async move { holds.hold(UserId::new(), request).await })
    });
    let results: Vec<_> = futures::future::join_all(tasks)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), codes::SEATS_ALREADY_RESERVED);
        assert_eq!(err.context()["conflictingSeats"], serde_json::json!(["A1"]));
    }
    let live = h
        .storage
        .reservations_for_event(event.id)
        .into_iter()
        .filter(|r| r.status == ReservationStatus::PendingPayment)
        .count();
    assert_eq!(live, 1);
}

#[tokio::test]
async fn test_cancel_permissions() {
    let h = Harness::new();
    let organizer = UserId::new();
    let event = h.own_event(organizer, 10, 1_000);
    let buyer = UserId::new();
    let hold = h.hold(buyer, &event, 1).await;
    let id = hold.reservations[0].id;

    let err = h
        .state
        .holds
        .cancel(&Caller::user(UserId::new()), id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), codes::FORBIDDEN);

    let canceled = h.state.holds.cancel(&Caller::user(organizer), id).await.unwrap();
    assert_eq!(canceled.len(), 1);
    let row = h.storage.reservation(id).unwrap();
    assert_eq!(row.status, ReservationStatus::Canceled);
    assert_eq!(row.cancel_reason, Some(CancelReason::Organizer));
}

#[tokio::test]
async fn test_paid_reservation_cannot_be_canceled() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 1_000);
    let buyer = UserId::new();
    h.buy(buyer, &event, 1).await;
    let id = h.storage.reservations_for_event(event.id)[0].id;

    let err = h.state.holds.cancel(&Caller::user(buyer), id).await.unwrap_err();
    assert_eq!(err.code(), codes::CANNOT_CANCEL_PAID);
}

#[tokio::test]
async fn test_sweep_expires_stale_holds_and_fails_open_payments() {
    let h = Harness::new();
    let event = h.own_event(UserId::new(), 10, 1_000);
    let buyer = UserId::new();
    let hold = h.hold(buyer, &event, 1).await;
    let id = hold.reservations[0].id;
    h.state
        .payments
        .create_or_reuse_payment(buyer, id)
        .await
        .unwrap();

    h.clock.advance(Duration::minutes(16));
    let report = h.state.holds.sweep_expired(100).await.unwrap();

    assert_eq!(report.expired, 1);
    assert_eq!(report.failed_payments, 1);
    assert_eq!(h.storage.reservation(id).unwrap().status, ReservationStatus::Expired);
    assert_eq!(h.storage.payments()[0].status, PaymentStatus::Failed);

    let again = h.state.holds.sweep_expired(100).await.unwrap();
    assert_eq!(again.expired, 0);
}
