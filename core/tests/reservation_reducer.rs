//! Reservation state machine tests.

#![allow(clippy::unwrap_used)]

use boxoffice_core::environment::Clock;
use boxoffice_core::money::Money;
use boxoffice_core::reservation::{
    CancelReason, Reservation, ReservationAction, ReservationEffect, ReservationEnvironment,
    ReservationReducer, ReservationStatus,
};
use boxoffice_core::types::{EventId, PurchaseGroupId, ReservationId, TicketId, UserId};
use boxoffice_core::TransitionError;
use boxoffice_testing::assertions::assert_no_effects;
use boxoffice_testing::{test_clock, ReducerTest};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

fn now() -> DateTime<Utc> {
    test_clock().now()
}

fn env() -> ReservationEnvironment {
    ReservationEnvironment::new(Arc::new(test_clock()))
}

fn pending(expires_in_minutes: i64) -> Reservation {
    Reservation {
        id: ReservationId::new(),
        event_id: EventId::new(),
        section_id: None,
        buyer_id: UserId::new(),
        quantity: 2,
        subtotal: Money::new(20_000),
        fee: Money::new(1_000),
        amount: Money::new(21_000),
        status: ReservationStatus::PendingPayment,
        expires_at: Some(now() + Duration::minutes(expires_in_minutes)),
        seat_assignment: Vec::new(),
        purchase_group_id: PurchaseGroupId::new(),
        ticket_id: None,
        paid_at: None,
        upload_deadline: None,
        cancel_reason: None,
        created_at: now() - Duration::minutes(1),
        updated_at: now() - Duration::minutes(1),
    }
}

fn resale_pending(ticket_id: TicketId) -> Reservation {
    Reservation {
        quantity: 1,
        ticket_id: Some(ticket_id),
        ..pending(10)
    }
}

#[test]
fn settle_marks_paid_and_sets_upload_deadline() {
    let reservation = pending(10);
    let id = reservation.id;
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Settle {
            upload_deadline_hours: 48,
        })
        .then_state(|r| {
            assert_eq!(r.status, ReservationStatus::Paid);
            assert_eq!(r.paid_at, Some(now()));
            assert_eq!(r.upload_deadline, Some(now() + Duration::hours(48)));
            assert_eq!(r.expires_at, None);
        })
        .then_effects(move |effects| {
            assert_eq!(
                effects,
                &[ReservationEffect::Settled {
                    reservation_id: id,
                    paid_at: now(),
                }]
            );
        })
        .run();
}

#[test]
fn settling_a_resale_hold_sells_the_ticket() {
    let ticket = TicketId::new();
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(resale_pending(ticket))
        .when_action(ReservationAction::Settle {
            upload_deadline_hours: 24,
        })
        .then_effects(move |effects| {
            assert_eq!(effects[0], ReservationEffect::MarkTicketSold(ticket));
            assert_eq!(effects.len(), 2);
        })
        .run();
}

#[test]
fn settling_twice_is_a_no_op() {
    let mut reservation = pending(10);
    reservation.status = ReservationStatus::Paid;
    reservation.paid_at = Some(now() - Duration::minutes(3));
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Settle {
            upload_deadline_hours: 48,
        })
        .then_state(|r| assert_eq!(r.paid_at, Some(now() - Duration::minutes(3))))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn expired_reservation_cannot_be_settled() {
    let mut reservation = pending(-5);
    reservation.status = ReservationStatus::Expired;
    reservation.expires_at = None;
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Settle {
            upload_deadline_hours: 48,
        })
        .then_error(|e| {
            assert!(matches!(e, TransitionError::Invalid { from: "EXPIRED", .. }));
        })
        .run();
}

#[test]
fn expire_requires_a_passed_deadline() {
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(pending(3))
        .when_action(ReservationAction::Expire)
        .then_error(|e| assert!(matches!(e, TransitionError::HoldActive { .. })))
        .run();
}

#[test]
fn expiring_a_resale_hold_releases_the_ticket() {
    let ticket = TicketId::new();
    let mut reservation = resale_pending(ticket);
    reservation.expires_at = Some(now() - Duration::seconds(1));
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Expire)
        .then_state(|r| {
            assert_eq!(r.status, ReservationStatus::Expired);
            assert_eq!(r.expires_at, None);
        })
        .then_effects(move |effects| assert_eq!(effects, &[ReservationEffect::ReleaseTicket(ticket)]))
        .run();
}

#[test]
fn extend_pushes_deadline_forward_only() {
    let reservation = pending(5);
    let original = reservation.expires_at;
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Extend {
            until: now() + Duration::minutes(1),
        })
        .then_state(move |r| assert_eq!(r.expires_at, original))
        .run();

    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(pending(5))
        .when_action(ReservationAction::Extend {
            until: now() + Duration::minutes(15),
        })
        .then_state(|r| assert_eq!(r.expires_at, Some(now() + Duration::minutes(15))))
        .run();
}

#[test]
fn extend_refuses_a_stale_hold() {
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(pending(-1))
        .when_action(ReservationAction::Extend {
            until: now() + Duration::minutes(15),
        })
        .then_error(|e| assert!(matches!(e, TransitionError::HoldExpired { .. })))
        .run();
}

#[test]
fn paid_reservation_cannot_be_canceled() {
    let mut reservation = pending(10);
    reservation.status = ReservationStatus::Paid;
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Cancel {
            reason: CancelReason::Buyer,
        })
        .then_error(|e| {
            assert_eq!(e, &TransitionError::invalid("reservation", "PAID", "cancel"));
        })
        .run();
}

#[test]
fn cancel_records_reason() {
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(pending(10))
        .when_action(ReservationAction::Cancel {
            reason: CancelReason::Organizer,
        })
        .then_state(|r| {
            assert_eq!(r.status, ReservationStatus::Canceled);
            assert_eq!(r.cancel_reason, Some(CancelReason::Organizer));
        })
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn revoke_undoes_a_settlement() {
    let ticket = TicketId::new();
    let mut reservation = resale_pending(ticket);
    reservation.status = ReservationStatus::Paid;
    reservation.upload_deadline = Some(now() + Duration::hours(48));
    ReducerTest::new(ReservationReducer)
        .with_env(env())
        .given_state(reservation)
        .when_action(ReservationAction::Revoke)
        .then_state(|r| {
            assert_eq!(r.status, ReservationStatus::Canceled);
            assert_eq!(r.cancel_reason, Some(CancelReason::Voided));
            assert_eq!(r.upload_deadline, None);
        })
        .then_effects(move |effects| assert_eq!(effects, &[ReservationEffect::ReleaseTicket(ticket)]))
        .run();
}
