//! Background jobs driven by [`boxoffice_runtime::JobRunner`].

use crate::error::MarketError;
use crate::holds::HoldManager;
use crate::payouts::PayoutService;
use async_trait::async_trait;
use boxoffice_runtime::PeriodicJob;
use std::sync::Arc;

/// Dispatches payouts whose backoff has elapsed.
pub struct PayoutRetryJob(pub Arc<PayoutService>);

#[async_trait]
impl PeriodicJob for PayoutRetryJob {
    type Error = MarketError;

    fn name(&self) -> &'static str {
        "payout-retry"
    }

    async fn run(&self) -> Result<(), MarketError> {
        self.0.retry_pass().await.map(|_| ())
    }
}

/// Polls the provider for in-flight payouts.
pub struct PayoutReconcileJob(pub Arc<PayoutService>);

#[async_trait]
impl PeriodicJob for PayoutReconcileJob {
    type Error = MarketError;

    fn name(&self) -> &'static str {
        "payout-reconcile"
    }

    async fn run(&self) -> Result<(), MarketError> {
        self.0.reconcile_pass().await.map(|_| ())
    }
}

/// Expires stale holds and returns money taken for them.
pub struct ExpirySweepJob {
    /// Hold manager
    pub holds: Arc<HoldManager>,
    /// Reservations per run
    pub batch: usize,
}

#[async_trait]
impl PeriodicJob for ExpirySweepJob {
    type Error = MarketError;

    fn name(&self) -> &'static str {
        "expiry-sweep"
    }

    async fn run(&self) -> Result<(), MarketError> {
        let report = self.holds.sweep_expired(self.batch).await?;
        if report.expired > 0 || report.refunded > 0 {
            tracing::info!(
                expired = report.expired,
                released = report.released,
                failed_payments = report.failed_payments,
                refunded = report.refunded,
                "Expiry sweep finished"
            );
        }
        Ok(())
    }
}
