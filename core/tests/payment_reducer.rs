//! Payment state machine tests.

#![allow(clippy::unwrap_used)]

use boxoffice_core::environment::Clock;
use boxoffice_core::money::Money;
use boxoffice_core::payment::{
    Approval, Payment, PaymentAction, PaymentEffect, PaymentEnvironment, PaymentReducer, PaymentStatus,
    Rejection,
};
use boxoffice_core::reservation::CancelReason;
use boxoffice_core::types::{PaymentId, PurchaseGroupId, ReservationId};
use boxoffice_core::TransitionError;
use boxoffice_testing::assertions::assert_no_effects;
use boxoffice_testing::{test_clock, ReducerTest};
use std::sync::Arc;

fn env() -> PaymentEnvironment {
    PaymentEnvironment::new(Arc::new(test_clock()))
}

fn payment(status: PaymentStatus) -> Payment {
    let now = test_clock().now();
    Payment {
        id: PaymentId::new(),
        reservation_id: ReservationId::new(),
        purchase_group_id: PurchaseGroupId::new(),
        amount: Money::new(30_000),
        status,
        token: Some("tok-1".to_string()),
        buy_order: "O-1".to_string(),
        session_id: "S-1".to_string(),
        refunded: Money::ZERO,
        authorization_code: None,
        response_code: None,
        card_last4: None,
        failure_reason: None,
        created_at: now,
        updated_at: now,
    }
}

fn approval() -> Approval {
    Approval {
        authorization_code: Some("1213".to_string()),
        response_code: Some(0),
        card_last4: Some("6623".to_string()),
    }
}

#[test]
fn immediate_approval_commits_and_settles_group() {
    let p = payment(PaymentStatus::Initiated);
    let group = p.purchase_group_id;
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(p)
        .when_action(PaymentAction::GatewayApproved {
            deferred_capture: false,
            approval: approval(),
        })
        .then_state(|p| {
            assert_eq!(p.status, PaymentStatus::Committed);
            assert_eq!(p.card_last4.as_deref(), Some("6623"));
        })
        .then_effects(move |effects| assert_eq!(effects, &[PaymentEffect::SettleGroup(group)]))
        .run();
}

#[test]
fn deferred_approval_authorizes() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Initiated))
        .when_action(PaymentAction::GatewayApproved {
            deferred_capture: true,
            approval: approval(),
        })
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Authorized))
        .run();
}

#[test]
fn duplicate_approval_callback_is_a_no_op() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Committed))
        .when_action(PaymentAction::GatewayApproved {
            deferred_capture: false,
            approval: Approval::default(),
        })
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Committed))
        .then_effects(assert_no_effects)
        .run();
}

#[test]
fn committed_payment_never_goes_back_to_failed() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Committed))
        .when_action(PaymentAction::GatewayDeclined { response_code: Some(-1) })
        .then_error(|e| assert_eq!(e, &TransitionError::invalid("payment", "COMMITTED", "decline")))
        .run();
}

#[test]
fn decline_fails_and_releases_group() {
    let p = payment(PaymentStatus::Initiated);
    let group = p.purchase_group_id;
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(p)
        .when_action(PaymentAction::GatewayDeclined { response_code: Some(-1) })
        .then_state(|p| {
            assert_eq!(p.status, PaymentStatus::Failed);
            assert_eq!(p.response_code, Some(-1));
        })
        .then_effects(move |effects| {
            assert_eq!(
                effects,
                &[PaymentEffect::ReleaseGroup {
                    purchase_group_id: group,
                    reason: CancelReason::PaymentFailed,
                }]
            );
        })
        .run();
}

#[test]
fn own_event_rejection_records_reason() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Initiated))
        .when_action(PaymentAction::Reject {
            reason: Rejection::OwnEvent,
        })
        .then_state(|p| {
            assert_eq!(p.status, PaymentStatus::Failed);
            assert_eq!(p.failure_reason.as_deref(), Some(Rejection::OwnEvent.as_str()));
        })
        .then_effects(|effects| {
            assert!(matches!(
                effects,
                [PaymentEffect::ReleaseGroup {
                    reason: CancelReason::OwnEvent,
                    ..
                }]
            ));
        })
        .run();
}

#[test]
fn abort_from_initiated() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Initiated))
        .when_action(PaymentAction::Abort)
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Aborted))
        .run();
}

#[test]
fn reinitiate_overwrites_a_failed_attempt() {
    let mut failed = payment(PaymentStatus::Failed);
    failed.failure_reason = Some("declined by gateway".to_string());
    failed.response_code = Some(-1);
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(failed)
        .when_action(PaymentAction::Reinitiate {
            amount: Money::new(31_000),
            buy_order: "O-2".to_string(),
            session_id: "S-2".to_string(),
        })
        .then_state(|p| {
            assert_eq!(p.status, PaymentStatus::Initiated);
            assert_eq!(p.amount, Money::new(31_000));
            assert_eq!(p.buy_order, "O-2");
            assert_eq!(p.token, None);
            assert_eq!(p.failure_reason, None);
            assert_eq!(p.response_code, None);
        })
        .run();
}

#[test]
fn reinitiate_refuses_a_settled_payment() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Authorized))
        .when_action(PaymentAction::Reinitiate {
            amount: Money::new(1),
            buy_order: "O-3".to_string(),
            session_id: "S-3".to_string(),
        })
        .then_error(|e| assert!(matches!(e, TransitionError::Invalid { from: "AUTHORIZED", .. })))
        .run();
}

#[test]
fn capture_only_from_authorized() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Authorized))
        .when_action(PaymentAction::Capture)
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Captured))
        .run();

    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Initiated))
        .when_action(PaymentAction::Capture)
        .then_error(|_| {})
        .run();
}

#[test]
fn voiding_an_authorization_revokes_the_group() {
    let p = payment(PaymentStatus::Authorized);
    let group = p.purchase_group_id;
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(p)
        .when_action(PaymentAction::Void)
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Voided))
        .then_effects(move |effects| assert_eq!(effects, &[PaymentEffect::RevokeGroup(group)]))
        .run();
}

#[test]
fn committed_payment_cannot_be_voided() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Committed))
        .when_action(PaymentAction::Void)
        .then_error(|_| {})
        .run();
}

#[test]
fn partial_refund_keeps_status_until_fully_refunded() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Committed))
        .when_action(PaymentAction::Refunded {
            amount: Money::new(10_000),
        })
        .then_state(|p| {
            assert_eq!(p.status, PaymentStatus::Committed);
            assert_eq!(p.refunded, Money::new(10_000));
            assert_eq!(p.refundable(), Money::new(20_000));
        })
        .run();

    let mut partly = payment(PaymentStatus::Captured);
    partly.refunded = Money::new(10_000);
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(partly)
        .when_action(PaymentAction::Refunded {
            amount: Money::new(20_000),
        })
        .then_state(|p| assert_eq!(p.status, PaymentStatus::Refunded))
        .run();
}

#[test]
fn refund_validation() {
    let committed = payment(PaymentStatus::Committed);
    assert_eq!(committed.validate_refund(None).unwrap(), Money::new(30_000));
    assert_eq!(
        committed.validate_refund(Some(Money::ZERO)),
        Err(TransitionError::NonPositiveRefund)
    );
    assert_eq!(
        committed.validate_refund(Some(Money::new(30_001))),
        Err(TransitionError::RefundExceedsBalance {
            requested: Money::new(30_001),
            refundable: Money::new(30_000),
        })
    );
    assert!(payment(PaymentStatus::Initiated).validate_refund(None).is_err());
    assert!(payment(PaymentStatus::Authorized).validate_refund(None).is_err());
}

#[test]
fn refund_over_balance_leaves_payment_untouched() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Committed))
        .when_action(PaymentAction::Refunded {
            amount: Money::new(40_000),
        })
        .then_error(|e| assert!(matches!(e, TransitionError::RefundExceedsBalance { .. })))
        .run();
}

#[test]
fn expired_hold_rejection_releases_as_payment_failure() {
    ReducerTest::new(PaymentReducer)
        .with_env(env())
        .given_state(payment(PaymentStatus::Initiated))
        .when_action(PaymentAction::Reject {
            reason: Rejection::HoldExpired,
        })
        .then_effects(|effects| {
            assert!(matches!(
                effects,
                [PaymentEffect::ReleaseGroup {
                    reason: CancelReason::PaymentFailed,
                    ..
                }]
            ));
        })
        .run();
}
