//! Business metrics for the hold/payment/payout pipeline.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticketing_holds_total{outcome}` - Hold requests by outcome (`created` or the error code)
//! - `ticketing_reservations_total{status}` - Reservation transitions (`settled`, `canceled`, `expired`)
//! - `ticketing_payments_total{status}` - Payment transitions by resulting status
//! - `ticketing_payment_revenue_total` - Settled amount in minor units
//! - `ticketing_payment_refunds_total` - Refunded amount in minor units
//! - `ticketing_payouts_total{status}` - Payout dispatch and reconciliation outcomes
//! - `ticketing_payout_alerts_total` - Operational alerts raised
//!
//! ## Histograms
//! - `ticketing_payout_dispatch_duration_seconds` - Time spent in one provider `pay` call

use boxoffice_core::money::Money;
use boxoffice_core::payment::PaymentStatus;
use boxoffice_core::payout::PayoutStatus;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;

/// The Prometheus exporter could not be started.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Bucket configuration rejected
    #[error("failed to build metrics exporter: {0}")]
    Build(String),
    /// Listener or recorder installation failed
    #[error("failed to install metrics exporter: {0}")]
    Install(String),
}

/// Serve `/metrics` on `addr` and register the business metric descriptions.
///
/// Must be called from inside a Tokio runtime, once per process.
///
/// # Errors
///
/// Returns [`MetricsError`] if the listener cannot be bound or a recorder is
/// already installed.
pub fn install_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0],
        )
        .map_err(|e| MetricsError::Build(e.to_string()))?
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    register_business_metrics();
    tracing::info!(addr = %addr, "Metrics available at http://{addr}/metrics");
    Ok(())
}

/// Initialize and register all business metrics descriptions.
///
/// This should be called once at application startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!("ticketing_holds_total", "Hold requests by outcome");
    describe_counter!(
        "ticketing_reservations_total",
        "Reservation transitions by resulting status (settled, canceled, expired)"
    );

    describe_counter!("ticketing_payments_total", "Payment transitions by resulting status");
    describe_counter!(
        "ticketing_payment_revenue_total",
        "Amount settled through the gateway, in minor units"
    );
    describe_counter!("ticketing_payment_refunds_total", "Amount refunded, in minor units");

    describe_counter!("ticketing_payouts_total", "Payout outcomes by status");
    describe_counter!("ticketing_payout_alerts_total", "Operational alerts raised");
    describe_histogram!(
        "ticketing_payout_dispatch_duration_seconds",
        "Time spent in one payout provider call"
    );

    tracing::info!("Business metrics registered");
}

// ============================================================================
// Metric Recording Functions
// ============================================================================

/// Record the outcome of a hold request.
///
/// `outcome` is `created` or the stable error code.
pub fn record_hold(outcome: &'static str) {
    metrics::counter!("ticketing_holds_total", "outcome" => outcome).increment(1);
}

/// Record reservations moving to `status`.
pub fn record_reservations(status: &'static str, count: usize) {
    metrics::counter!("ticketing_reservations_total", "status" => status)
        .increment(u64::try_from(count).unwrap_or(u64::MAX));
    tracing::debug!(status, count, "Recorded reservations metric");
}

/// Record a payment transition.
pub fn record_payment(status: PaymentStatus) {
    metrics::counter!("ticketing_payments_total", "status" => status.as_str()).increment(1);
}

/// Record a settled charge.
pub fn record_revenue(amount: Money) {
    metrics::counter!("ticketing_payment_revenue_total").increment(amount.units());
}

/// Record a refund.
pub fn record_refund(amount: Money) {
    metrics::counter!("ticketing_payment_refunds_total").increment(amount.units());
    tracing::debug!(amount = amount.units(), "Recorded refund metric");
}

/// Record a payout outcome.
pub fn record_payout(status: PayoutStatus) {
    metrics::counter!("ticketing_payouts_total", "status" => status.as_str()).increment(1);
}

/// Record the duration of one provider call.
pub fn record_dispatch_duration(duration_secs: f64) {
    metrics::histogram!("ticketing_payout_dispatch_duration_seconds").record(duration_secs);
}

/// Record an operational alert.
pub fn record_alert() {
    metrics::counter!("ticketing_payout_alerts_total").increment(1);
}
