//! Disbursement engine.
//!
//! Checks that the destination account can receive money, then hands the
//! payout to the configured provider. An account that is not ready fails
//! fast without any external call.

use super::provider::{PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError};
use boxoffice_core::catalog::ConnectedAccount;
use boxoffice_core::payout::Payout;
use std::sync::Arc;
use std::time::Instant;

/// Failure code recorded when the account cannot receive payouts
pub const ACCOUNT_NOT_READY: &str = "ACCOUNT_NOT_READY";

/// Result of one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The provider accepted the payout
    Sent(PayoutReceipt),
    /// The account is disabled or incomplete; the provider was not called
    NotReady {
        /// Why, as stored in `failure_message`
        message: String,
    },
    /// The provider call failed
    Failed(ProviderError),
}

/// Provider-agnostic disbursement.
#[derive(Clone)]
pub struct PayoutEngine {
    provider: Arc<dyn PayoutProvider>,
}

impl PayoutEngine {
    /// Creates the engine
    #[must_use]
    pub fn new(provider: Arc<dyn PayoutProvider>) -> Self {
        Self { provider }
    }

    /// The provider in use
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn PayoutProvider> {
        &self.provider
    }

    /// Send `payout` to `account`.
    ///
    /// The payout must carry its idempotency key already.
    pub async fn dispatch(&self, payout: &Payout, account: Option<&ConnectedAccount>) -> DispatchOutcome {
        let Some(account) = account else {
            return DispatchOutcome::NotReady {
                message: "Connected account not found".to_string(),
            };
        };
        let Some(destination) = account.destination() else {
            return DispatchOutcome::NotReady {
                message: readiness_message(account),
            };
        };
        let Some(idempotency_key) = payout.idempotency_key.clone() else {
            return DispatchOutcome::Failed(ProviderError::InvalidResponse(
                "payout has no idempotency key".to_string(),
            ));
        };

        let request = PayoutRequest {
            payout_id: payout.id,
            amount: payout.amount,
            currency: payout.currency.clone(),
            destination,
            idempotency_key,
        };

        let started = Instant::now();
        let result = self.provider.pay(&request).await;
        crate::metrics::record_dispatch_duration(started.elapsed().as_secs_f64());

        match result {
            Ok(receipt) => {
                tracing::info!(
                    payout_id = %payout.id,
                    provider = self.provider.name(),
                    status = %receipt.status,
                    external_id = ?receipt.external_id,
                    "Payout dispatched"
                );
                DispatchOutcome::Sent(receipt)
            }
            Err(error) => {
                tracing::warn!(
                    payout_id = %payout.id,
                    provider = self.provider.name(),
                    error = %error,
                    "Payout dispatch failed"
                );
                DispatchOutcome::Failed(error)
            }
        }
    }
}

fn readiness_message(account: &ConnectedAccount) -> String {
    if !account.payouts_enabled {
        return "Payouts are disabled for this account".to_string();
    }
    format!(
        "Account is missing banking fields: {}",
        account.missing_fields().join(", ")
    )
}
