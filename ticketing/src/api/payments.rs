//! Payment endpoints.
//!
//! - POST /api/payments - Open a gateway transaction for the caller's hold
//! - POST /api/payments/commit - Confirm after the buyer returns from the gateway
//! - POST /api/payments/abort - The buyer abandoned the gateway form
//! - POST /api/payments/refund - Refund a settled payment (admin)
//! - GET /api/payments/status/:token - Gateway-side status
//! - POST /api/admin/payments/:id/capture - Capture an authorization (admin)
//! - POST /api/admin/payments/:id/void - Void before capture (admin)
//!
//! Commit and abort are authenticated by the gateway token itself.

use super::{ApiJson, ApiPath, PaymentView};
use crate::error::MarketError;
use crate::gateway::TransactionStatus;
use crate::identity::{Caller, RequireAdmin};
use crate::payments::PaymentReference;
use crate::server::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use boxoffice_core::money::Money;
use boxoffice_core::types::{PaymentId, PayoutId, PurchaseGroupId, ReservationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to pay for a hold.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    /// Any reservation of the purchase group
    pub reservation_id: ReservationId,
}

/// Where to send the buyer next.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSessionResponse {
    /// Payment ID
    pub payment_id: PaymentId,
    /// Purchase group
    pub purchase_group_id: PurchaseGroupId,
    /// Gateway token
    pub token: String,
    /// Card-entry page
    pub redirect_url: String,
    /// Order reference
    pub buy_order: String,
    /// Amount to be charged
    pub amount: Money,
}

/// A gateway token.
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    /// Token returned by the gateway
    pub token: String,
}

/// Result of a commit.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// The payment
    pub payment: PaymentView,
    /// Reservations that became `PAID`
    pub settled_reservations: Vec<ReservationId>,
    /// Payouts scheduled for sellers
    pub payouts: Vec<PayoutId>,
}

/// Refund request; exactly one of `token` or `buyOrder`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRequest {
    /// Gateway token
    pub token: Option<String>,
    /// Order reference
    pub buy_order: Option<String>,
    /// Amount; everything left when absent
    pub amount: Option<Money>,
}

impl RefundRequest {
    fn reference(self) -> Result<(PaymentReference, Option<Money>), MarketError> {
        let reference = match (self.token, self.buy_order) {
            (Some(token), None) => PaymentReference::Token(token),
            (None, Some(buy_order)) => PaymentReference::BuyOrder(buy_order),
            _ => return Err(MarketError::invalid_input("Provide exactly one of token or buyOrder")),
        };
        Ok((reference, self.amount))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Open (or reopen) the gateway transaction for the caller's hold.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/payments \
///   -H "X-User-Id: 880e8400-e29b-41d4-a716-446655440003" \
///   -H "Content-Type: application/json" \
///   -d '{"reservationId":"660e8400-e29b-41d4-a716-446655440001"}'
/// ```
///
/// # Errors
///
/// `RESERVATION_NOT_FOUND`, `ALREADY_PAID`, `RESERVATION_EXPIRED`,
/// `CANNOT_BUY_OWN_EVENT` or `GATEWAY_UNAVAILABLE`.
pub async fn create_payment(
    caller: Caller,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentSessionResponse>), MarketError> {
    let session = state
        .payments
        .create_or_reuse_payment(caller.user_id, request.reservation_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(PaymentSessionResponse {
            payment_id: session.payment_id,
            purchase_group_id: session.purchase_group_id,
            token: session.token,
            redirect_url: session.redirect_url,
            buy_order: session.buy_order,
            amount: session.amount,
        }),
    ))
}

/// Confirm a payment.
///
/// # Errors
///
/// `PAYMENT_NOT_FOUND`, `RESERVATION_EXPIRED`, `CANNOT_BUY_OWN_EVENT`,
/// `PAYMENT_DECLINED` or `GATEWAY_UNAVAILABLE`.
pub async fn commit_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<CommitResponse>, MarketError> {
    let outcome = state.payments.commit(&request.token).await?;
    Ok(Json(CommitResponse {
        payment: PaymentView::from(&outcome.payment),
        settled_reservations: outcome.settled.iter().map(|fact| fact.reservation_id).collect(),
        payouts: outcome.payouts,
    }))
}

/// Abandon a payment and release its hold.
///
/// # Errors
///
/// `PAYMENT_NOT_FOUND` or `INVALID_STATE_TRANSITION`.
pub async fn abort_payment(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<TokenRequest>,
) -> Result<Json<PaymentView>, MarketError> {
    let payment = state.payments.abort(&request.token).await?;
    Ok(Json(PaymentView::from(&payment)))
}

/// Refund a settled payment.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/payments/refund \
///   -H "X-User-Id: ..." -H "X-User-Role: admin" \
///   -H "Content-Type: application/json" \
///   -d '{"buyOrder":"BO-1a2b3c4d-1767225600000","amount":5000}'
/// ```
///
/// # Errors
///
/// `INVALID_INPUT`, `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION`,
/// `INVALID_REFUND_AMOUNT`, `REFUND_EXCEEDS_BALANCE` or `GATEWAY_UNAVAILABLE`.
pub async fn refund_payment(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RefundRequest>,
) -> Result<Json<PaymentView>, MarketError> {
    let (reference, amount) = request.reference()?;
    tracing::info!(admin_id = %admin.user_id, ?reference, "Refund requested");
    let payment = state.payments.refund(&reference, amount).await?;
    Ok(Json(PaymentView::from(&payment)))
}

/// Gateway-side status of a transaction.
///
/// # Errors
///
/// `PAYMENT_NOT_FOUND` or `GATEWAY_UNAVAILABLE`.
pub async fn gateway_status(
    State(state): State<AppState>,
    ApiPath(token): ApiPath<String>,
) -> Result<Json<TransactionStatus>, MarketError> {
    Ok(Json(state.payments.gateway_status(&token).await?))
}

/// Capture an authorized payment.
///
/// # Errors
///
/// `FORBIDDEN`, `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION` or
/// `GATEWAY_UNAVAILABLE`.
pub async fn capture_payment(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PaymentView>, MarketError> {
    let payment = state.payments.capture(PaymentId::from_uuid(id)).await?;
    Ok(Json(PaymentView::from(&payment)))
}

/// Void a payment before capture.
///
/// # Errors
///
/// `FORBIDDEN`, `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION` or
/// `GATEWAY_UNAVAILABLE`.
pub async fn void_payment(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PaymentView>, MarketError> {
    let payment = state.payments.void(PaymentId::from_uuid(id)).await?;
    Ok(Json(PaymentView::from(&payment)))
}
