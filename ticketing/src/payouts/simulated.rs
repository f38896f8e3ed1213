//! Provider that pays instantly without moving money.
//!
//! Used when no disbursement endpoint is configured. Identifiers are derived
//! from the idempotency key, so a replayed request yields the same id.

use super::provider::{
    PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError, ProviderStatus, verify_signature,
};
use async_trait::async_trait;
use boxoffice_core::environment::Clock;
use boxoffice_core::payout::PayoutStatus;
use std::sync::Arc;

const PREFIX: &str = "sim_";

/// Resolves every payout as `PAID` with a synthetic id.
pub struct SimulatedProvider {
    clock: Arc<dyn Clock>,
    webhook_secret: Option<String>,
}

impl SimulatedProvider {
    /// Creates the provider
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, webhook_secret: Option<String>) -> Self {
        Self { clock, webhook_secret }
    }
}

#[async_trait]
impl PayoutProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn pay(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        let external_id = format!("{PREFIX}{}", request.idempotency_key);
        tracing::info!(
            payout_id = %request.payout_id,
            external_id = %external_id,
            amount = %request.amount,
            "Simulated payout paid"
        );
        Ok(PayoutReceipt {
            status: PayoutStatus::Paid,
            external_id: Some(external_id),
            paid_at: Some(self.clock.now()),
        })
    }

    async fn status(&self, external_id: &str) -> Result<ProviderStatus, ProviderError> {
        if !external_id.starts_with(PREFIX) {
            return Err(ProviderError::NotFound(external_id.to_string()));
        }
        Ok(ProviderStatus {
            status: PayoutStatus::Paid,
            raw_status: Some("paid".to_string()),
            failure_code: None,
            failure_message: None,
            paid_at: None,
        })
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_signature(self.webhook_secret.as_deref(), body, signature)
    }
}
