//! Hold endpoints.
//!
//! - POST /api/holds - Hold inventory for the caller
//! - POST /api/holds/:id/refresh - Extend the caller's hold
//! - POST /api/reservations/:id/cancel - Cancel a hold (buyer, organizer or admin)

use super::{ApiJson, ApiPath, ReservationView};
use crate::error::MarketError;
use crate::holds::{Hold, HoldRequest};
use crate::identity::Caller;
use crate::server::AppState;
use axum::{
    Json,
    extract::State,
    http::StatusCode,
};
use boxoffice_core::money::Money;
use boxoffice_core::types::{PurchaseGroupId, ReservationId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

// ============================================================================
// Response Types
// ============================================================================

/// A created or extended hold.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldResponse {
    /// Group shared by the rows
    pub purchase_group_id: PurchaseGroupId,
    /// Rows of the hold
    pub reservations: Vec<ReservationView>,
    /// Pay before
    pub expires_at: DateTime<Utc>,
    /// Total to pay
    pub amount: Money,
    /// An existing hold was extended
    pub renewed: bool,
}

impl From<Hold> for HoldResponse {
    fn from(hold: Hold) -> Self {
        Self {
            purchase_group_id: hold.purchase_group_id,
            reservations: hold.reservations.iter().map(ReservationView::from).collect(),
            expires_at: hold.expires_at,
            amount: hold.amount,
            renewed: hold.renewed,
        }
    }
}

/// Rows canceled.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    /// The canceled rows
    pub reservations: Vec<ReservationView>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Hold inventory.
///
/// Returns 201 for a new hold and 200 when the caller's open hold on the
/// event was extended instead.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/holds \
///   -H "X-User-Id: 880e8400-e29b-41d4-a716-446655440003" \
///   -H "Content-Type: application/json" \
///   -d '{"eventId":"550e8400-e29b-41d4-a716-446655440000","items":[{"quantity":2}]}'
/// ```
///
/// # Errors
///
/// Any hold error code, rendered by [`MarketError`].
pub async fn create_hold(
    caller: Caller,
    State(state): State<AppState>,
    ApiJson(request): ApiJson<HoldRequest>,
) -> Result<(StatusCode, Json<HoldResponse>), MarketError> {
    let hold = state.holds.hold(caller.user_id, request).await?;
    let status = if hold.renewed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(hold.into())))
}

/// Extend the caller's hold.
///
/// # Errors
///
/// `RESERVATION_NOT_FOUND`, `RESERVATION_NOT_PENDING` or `RESERVATION_EXPIRED`.
pub async fn refresh_hold(
    caller: Caller,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<HoldResponse>, MarketError> {
    let hold = state
        .holds
        .refresh_hold(caller.user_id, ReservationId::from_uuid(id))
        .await?;
    Ok(Json(hold.into()))
}

/// Cancel the purchase group of a reservation.
///
/// # Errors
///
/// `RESERVATION_NOT_FOUND`, `FORBIDDEN`, `CANNOT_CANCEL_PAID` or
/// `RESERVATION_NOT_PENDING`.
pub async fn cancel_reservation(
    caller: Caller,
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<CancelResponse>, MarketError> {
    let rows = state.holds.cancel(&caller, ReservationId::from_uuid(id)).await?;
    Ok(Json(CancelResponse {
        reservations: rows.iter().map(ReservationView::from).collect(),
    }))
}
