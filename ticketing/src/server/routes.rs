//! Router configuration for the ticketing service.

use super::health::health_check;
use super::state::AppState;
use crate::api;
use axum::{
    Router,
    routing::{get, post},
};

/// Build the complete Axum router.
///
/// Everything except `/health` lives under `/api`; administrator routes
/// under `/api/admin` check the caller's role in their extractor.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Holds
        .route("/holds", post(api::create_hold))
        .route("/holds/:id/refresh", post(api::refresh_hold))
        .route("/reservations/:id/cancel", post(api::cancel_reservation))
        // Payments
        .route("/payments", post(api::create_payment))
        .route("/payments/commit", post(api::commit_payment))
        .route("/payments/abort", post(api::abort_payment))
        .route("/payments/refund", post(api::refund_payment))
        .route("/payments/status/:token", get(api::gateway_status))
        // Administration
        .route("/admin/payments/:id/capture", post(api::capture_payment))
        .route("/admin/payments/:id/void", post(api::void_payment))
        .route("/admin/payouts/:id/retry", post(api::retry_payout))
        // Provider callbacks
        .route("/webhooks/payouts", post(api::payout_webhook));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .with_state(state)
}
