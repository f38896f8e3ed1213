//! Payout endpoints.
//!
//! - POST /api/admin/payouts/:id/retry - Dispatch now, bypassing the backoff (admin)
//! - POST /api/webhooks/payouts - Provider status push, signed

use super::{ApiPath, PayoutView};
use crate::error::MarketError;
use crate::identity::RequireAdmin;
use crate::server::AppState;
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use boxoffice_core::types::PayoutId;
use uuid::Uuid;

/// Header carrying `base64(hmac_sha256(secret, body))`
pub const SIGNATURE_HEADER: &str = "x-payout-signature";

/// Dispatch a pending or failed payout immediately.
///
/// Readiness and idempotency checks still apply; a failure is recorded on
/// the payout and returned in the body, not as an error.
///
/// # Errors
///
/// `FORBIDDEN`, `PAYOUT_NOT_FOUND`, `PAYOUT_NOT_RETRYABLE` or
/// `CONCURRENT_UPDATE`.
pub async fn retry_payout(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PayoutView>, MarketError> {
    let payout_id = PayoutId::from_uuid(id);
    tracing::info!(admin_id = %admin.user_id, payout_id = %payout_id, "Manual payout retry requested");
    let payout = state.payouts.retry_now(payout_id).await?;
    Ok(Json(PayoutView::from(&payout)))
}

/// Apply a provider webhook.
///
/// # Errors
///
/// `INVALID_SIGNATURE`, `INVALID_INPUT`, `PAYOUT_NOT_FOUND` or
/// `CONCURRENT_UPDATE`.
pub async fn payout_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PayoutView>, MarketError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let payout = state.payouts.apply_webhook(&body, signature).await?;
    Ok(Json(PayoutView::from(&payout)))
}
