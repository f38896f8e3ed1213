//! Seller payouts: provider interface, disbursement engine and the service
//! behind the retry and reconciliation schedulers.

pub mod engine;
pub mod http;
pub mod provider;
pub mod service;
pub mod simulated;

pub use engine::{ACCOUNT_NOT_READY, DispatchOutcome, PayoutEngine};
pub use http::{HttpPayoutProvider, HttpProviderConfig};
pub use provider::{
    PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError, ProviderStatus, WebhookUpdate, sign_webhook,
};
pub use service::{PayoutService, PayoutSettings, ReconcileReport, RetryReport};
pub use simulated::SimulatedProvider;
