//! Payout state machine tests.

#![allow(clippy::unwrap_used)]

use boxoffice_core::environment::Clock;
use boxoffice_core::money::Money;
use boxoffice_core::payout::{Payout, PayoutAction, PayoutEffect, PayoutEnvironment, PayoutReducer, PayoutStatus};
use boxoffice_core::types::{AccountId, PayoutId, UserId};
use boxoffice_testing::assertions::assert_no_effects;
use boxoffice_testing::{test_clock, ReducerTest};
use chrono::Duration;
use std::sync::Arc;

fn env(max_retries: u32) -> PayoutEnvironment {
    PayoutEnvironment::new(Arc::new(test_clock()), max_retries)
}

fn payout(status: PayoutStatus, retries: u32) -> Payout {
    let earlier = test_clock().now() - Duration::hours(1);
    Payout {
        id: PayoutId::new(),
        account_id: AccountId::new(),
        seller_id: UserId::new(),
        purchase_group_id: None,
        amount: Money::new(50_000),
        currency: "CLP".to_string(),
        status,
        retries,
        idempotency_key: None,
        external_id: None,
        external_status: None,
        failure_code: None,
        failure_message: None,
        paid_at: None,
        version: 0,
        created_at: earlier,
        updated_at: earlier,
    }
}

#[test]
fn idempotency_key_is_assigned_once() {
    let mut keyed = payout(PayoutStatus::Failed, 1);
    keyed.idempotency_key = Some("first".to_string());
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(keyed)
        .when_action(PayoutAction::AssignIdempotencyKey("second".to_string()))
        .then_state(|p| assert_eq!(p.idempotency_key.as_deref(), Some("first")))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn failed_dispatch_increments_retries() {
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(payout(PayoutStatus::Pending, 0))
        .when_action(PayoutAction::DispatchFailed {
            code: Some("HTTP_503".to_string()),
            message: "provider unavailable".to_string(),
        })
        .then_state(|p| {
            assert_eq!(p.status, PayoutStatus::Failed);
            assert_eq!(p.retries, 1);
            assert_eq!(p.failure_code.as_deref(), Some("HTTP_503"));
            assert_eq!(p.updated_at, test_clock().now());
        })
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn reaching_the_ceiling_raises_an_alert() {
    let p = payout(PayoutStatus::Failed, 4);
    let id = p.id;
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(p)
        .when_action(PayoutAction::DispatchFailed {
            code: None,
            message: "timeout".to_string(),
        })
        .then_effects(move |effects| {
            assert_eq!(effects, &[PayoutEffect::RetriesExhausted { payout_id: id, retries: 5 }]);
        })
        .run();
}

#[test]
fn successful_dispatch_keeps_retries_and_clears_failure() {
    let mut failed = payout(PayoutStatus::Failed, 2);
    failed.failure_message = Some("timeout".to_string());
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(failed)
        .when_action(PayoutAction::DispatchSucceeded {
            status: PayoutStatus::InTransit,
            external_id: Some("psp_1".to_string()),
            paid_at: None,
        })
        .then_state(|p| {
            assert_eq!(p.status, PayoutStatus::InTransit);
            assert_eq!(p.retries, 2);
            assert_eq!(p.external_id.as_deref(), Some("psp_1"));
            assert_eq!(p.failure_message, None);
            assert_eq!(p.paid_at, None);
        })
        .run();
}

#[test]
fn immediate_paid_dispatch_stamps_paid_at() {
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(payout(PayoutStatus::Pending, 0))
        .when_action(PayoutAction::DispatchSucceeded {
            status: PayoutStatus::Paid,
            external_id: Some("sim-1".to_string()),
            paid_at: None,
        })
        .then_state(|p| assert_eq!(p.paid_at, Some(test_clock().now())))
        .run();
}

#[test]
fn in_flight_payout_cannot_be_dispatched_again() {
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(payout(PayoutStatus::Scheduled, 0))
        .when_action(PayoutAction::DispatchFailed {
            code: None,
            message: "x".to_string(),
        })
        .then_error(|_| {})
        .run();
}

#[test]
fn reconciliation_never_touches_retries() {
    let mut in_transit = payout(PayoutStatus::InTransit, 3);
    in_transit.external_id = Some("psp_9".to_string());
    let paid_at = test_clock().now() - Duration::minutes(10);
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(in_transit)
        .when_action(PayoutAction::Reconciled {
            status: PayoutStatus::Paid,
            external_status: Some("paid".to_string()),
            failure_code: None,
            failure_message: None,
            paid_at: Some(paid_at),
        })
        .then_state(move |p| {
            assert_eq!(p.status, PayoutStatus::Paid);
            assert_eq!(p.retries, 3);
            assert_eq!(p.paid_at, Some(paid_at));
            assert_eq!(p.external_status.as_deref(), Some("paid"));
        })
        .run();
}

#[test]
fn terminal_payout_ignores_matching_reconciliation() {
    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(payout(PayoutStatus::Paid, 0))
        .when_action(PayoutAction::Reconciled {
            status: PayoutStatus::Paid,
            external_status: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
        })
        .then_effects(assert_no_effects)
        .run();

    ReducerTest::new(PayoutReducer)
        .with_env(env(5))
        .given_state(payout(PayoutStatus::Paid, 0))
        .when_action(PayoutAction::Reconciled {
            status: PayoutStatus::Failed,
            external_status: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
        })
        .then_error(|_| {})
        .run();
}
