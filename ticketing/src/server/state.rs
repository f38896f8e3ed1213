//! Application state for the ticketing HTTP server.
//!
//! Holds the three services the handlers call into. Cloned (cheaply, via
//! `Arc`) for each request.

use crate::holds::HoldManager;
use crate::payments::PaymentService;
use crate::payouts::PayoutService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hold creation, extension, cancellation
    pub holds: Arc<HoldManager>,

    /// Payment state machine driver
    pub payments: Arc<PaymentService>,

    /// Manual retries and webhooks
    pub payouts: Arc<PayoutService>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(holds: Arc<HoldManager>, payments: Arc<PaymentService>, payouts: Arc<PayoutService>) -> Self {
        Self {
            holds,
            payments,
            payouts,
        }
    }
}
