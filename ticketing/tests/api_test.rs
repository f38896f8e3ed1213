//! HTTP surface tests, driving the router in-process.
//!
//! Run with: `cargo test --test api_test`

#![allow(clippy::unwrap_used)]

mod common;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use boxoffice_core::payout::PayoutStatus;
use boxoffice_core::types::UserId;
use common::{Harness, WEBHOOK_SECRET};
use serde_json::{Value, json};
use ticketing::api::payouts::SIGNATURE_HEADER;
use ticketing::identity::{USER_ID_HEADER, USER_ROLE_HEADER};
use ticketing::payouts::sign_webhook;
use tower::ServiceExt;

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post(uri: &str, user: Option<UserId>, body: &Value) -> Request<Body> {
    let mut builder = Request::post(uri).header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header(USER_ID_HEADER, user.to_string());
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn admin_post(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .header(USER_ID_HEADER, UserId::new().to_string())
        .header(USER_ROLE_HEADER, "admin")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let router = h.app.router();

    let (status, body) = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_hold_created_then_renewed() {
    let h = Harness::new();
    let router = h.app.router();
    let event = h.own_event(UserId::new(), 10, 5_000);
    let buyer = UserId::new();
    let request = json!({"eventId": event.id, "items": [{"quantity": 2}]});

    let (status, body) = send(&router, post("/api/holds", Some(buyer), &request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["amount"], 10_000);
    assert_eq!(body["renewed"], false);
    assert_eq!(body["reservations"][0]["status"], "PENDING");
    assert_eq!(body["reservations"][0]["quantity"], 2);

    let (status, body) = send(&router, post("/api/holds", Some(buyer), &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["renewed"], true);
}

#[tokio::test]
async fn test_hold_requires_identity() {
    let h = Harness::new();
    let router = h.app.router();
    let event = h.own_event(UserId::new(), 10, 5_000);

    let (status, body) = send(
        &router,
        post("/api/holds", None, &json!({"eventId": event.id, "items": [{"quantity": 1}]})),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_insufficient_stock_body_carries_context() {
    let h = Harness::new();
    let router = h.app.router();
    let event = h.own_event(UserId::new(), 2, 5_000);

    let (status, body) = send(
        &router,
        post("/api/holds", Some(UserId::new()), &json!({"eventId": event.id, "items": [{"quantity": 3}]})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INSUFFICIENT_STOCK");
    assert_eq!(body["context"]["remaining"], 2);
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn test_purchase_over_http() {
    let h = Harness::new();
    let router = h.app.router();
    let organizer = UserId::new();
    h.ready_account(organizer);
    let event = h.own_event(organizer, 10, 7_500);
    let buyer = UserId::new();

    let (_, hold) = send(
        &router,
        post("/api/holds", Some(buyer), &json!({"eventId": event.id, "items": [{"quantity": 2}]})),
    )
    .await;
    let reservation_id = hold["reservations"][0]["id"].clone();

    let (status, session) = send(
        &router,
        post("/api/payments", Some(buyer), &json!({"reservationId": reservation_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(session["amount"], 15_000);
    assert!(session["redirectUrl"].as_str().unwrap().starts_with("http"));

    let token = session["token"].clone();
    let (status, commit) = send(&router, post("/api/payments/commit", None, &json!({"token": token}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(commit["payment"]["status"], "COMMITTED");
    assert_eq!(commit["payment"]["cardLast4"], "6623");
    assert_eq!(commit["settledReservations"].as_array().unwrap().len(), 1);
    assert_eq!(commit["payouts"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_refund_requires_admin() {
    let h = Harness::new();
    let router = h.app.router();
    let event = h.own_event(UserId::new(), 10, 5_000);
    let token = h.buy(UserId::new(), &event, 1).await;
    let request = json!({"token": token, "amount": 1_000});

    let (status, body) = send(&router, post("/api/payments/refund", Some(UserId::new()), &request)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, body) = send(&router, admin_post("/api/payments/refund", &request)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["refunded"], 1_000);
    assert_eq!(body["status"], "COMMITTED");
}

#[tokio::test]
async fn test_refund_needs_exactly_one_reference() {
    let h = Harness::new();
    let router = h.app.router();

    let (status, body) = send(
        &router,
        admin_post("/api/payments/refund", &json!({"token": "a", "buyOrder": "b"})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_malformed_bodies_and_paths_are_invalid_input() {
    let h = Harness::new();
    let router = h.app.router();

    let (status, body) = send(
        &router,
        admin_post("/api/payments/refund", &json!({"token": "t", "amount": -5})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert!(body["message"].as_str().unwrap().contains("amount"));

    let broken = Request::post("/api/holds")
        .header("content-type", "application/json")
        .header(USER_ID_HEADER, UserId::new().to_string())
        .body(Body::from("{\"eventId\":"))
        .unwrap();
    let (status, body) = send(&router, broken).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");

    let (status, body) = send(&router, post("/api/holds/not-a-uuid/refresh", Some(UserId::new()), &json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_payout_webhook_checks_signature() {
    let h = Harness::new();
    let router = h.app.router();
    let account = h.ready_account(UserId::new());
    let payout = h.pending_payout(&account, 3_000);
    let body = json!({"payoutId": payout.id, "status": "paid"}).to_string();

    let unsigned = Request::post("/api/webhooks/payouts")
        .header(SIGNATURE_HEADER, "forged")
        .body(Body::from(body.clone()))
        .unwrap();
    let (status, error) = send(&router, unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error["code"], "INVALID_SIGNATURE");

    let signed = Request::post("/api/webhooks/payouts")
        .header(SIGNATURE_HEADER, sign_webhook(WEBHOOK_SECRET, body.as_bytes()))
        .body(Body::from(body))
        .unwrap();
    let (status, view) = send(&router, signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "PAID");
    assert_eq!(h.payout(payout.id).status, PayoutStatus::Paid);
}

#[tokio::test]
async fn test_admin_payout_retry() {
    let h = Harness::new();
    let router = h.app.router();
    let account = h.ready_account(UserId::new());
    let payout = h.pending_payout(&account, 3_000);
    let uri = format!("/api/admin/payouts/{}/retry", payout.id);

    let (status, _) = send(&router, post(&uri, Some(UserId::new()), &Value::Null)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, view) = send(&router, admin_post(&uri, &Value::Null)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "PAID");

    let (status, error) = send(&router, admin_post(&uri, &Value::Null)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error["code"], "PAYOUT_NOT_RETRYABLE");
}
