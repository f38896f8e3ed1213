//! Payout orchestration.
//!
//! Every payout write goes through [`Storage::update_payout`], a
//! compare-and-swap on the row's `version`. The retry pass, the
//! reconciliation pass and the webhook path may race on the same row; the
//! loser logs and moves on, and the next pass sees the winner's write.

use super::engine::{ACCOUNT_NOT_READY, DispatchOutcome, PayoutEngine};
use super::provider::ProviderStatus;
use crate::alerts::{Alert, AlertSink};
use crate::error::{ErrorKind, MarketError, MarketResult, codes};
use crate::storage::Storage;
use boxoffice_core::backoff::BackoffSchedule;
use boxoffice_core::environment::Clock;
use boxoffice_core::payout::{Payout, PayoutAction, PayoutEffect, PayoutEnvironment, PayoutReducer};
use boxoffice_core::reducer::Reducer;
use boxoffice_core::types::PayoutId;
use std::sync::Arc;

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct PayoutSettings {
    /// Wait between attempts, indexed by failures so far
    pub schedule: BackoffSchedule,
    /// Retry ceiling
    pub max_retries: u32,
    /// Payouts considered per retry pass
    pub retry_batch: usize,
    /// Payouts polled per reconciliation pass
    pub reconcile_batch: usize,
}

/// Summary of one retry pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetryReport {
    /// Rows below the retry ceiling
    pub considered: usize,
    /// Rows still inside their backoff window
    pub waiting: usize,
    /// Accepted by the provider
    pub dispatched: usize,
    /// Failed again
    pub failed: usize,
    /// Lost a concurrent write
    pub conflicts: usize,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rows polled
    pub checked: usize,
    /// Rows whose state changed
    pub updated: usize,
    /// Provider lookups that failed
    pub failed: usize,
    /// Lost a concurrent write
    pub conflicts: usize,
}

enum Attempted {
    Dispatched(Payout),
    Failed(Payout),
    Conflict,
}

/// Drives payouts through dispatch, retry and reconciliation.
pub struct PayoutService {
    storage: Arc<dyn Storage>,
    engine: PayoutEngine,
    alerts: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    env: PayoutEnvironment,
    settings: PayoutSettings,
}

impl PayoutService {
    /// Creates the service
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        engine: PayoutEngine,
        alerts: Arc<dyn AlertSink>,
        clock: Arc<dyn Clock>,
        settings: PayoutSettings,
    ) -> Self {
        Self {
            env: PayoutEnvironment::new(Arc::clone(&clock), settings.max_retries),
            storage,
            engine,
            alerts,
            clock,
            settings,
        }
    }

    /// Dispatch every `PENDING`/`FAILED` payout whose backoff has elapsed.
    ///
    /// # Errors
    ///
    /// Fails only if the candidate query fails; per-payout failures are
    /// recorded on the row and counted in the report.
    pub async fn retry_pass(&self) -> MarketResult<RetryReport> {
        let now = self.clock.now();
        let candidates = self
            .storage
            .dispatchable_payouts(self.settings.max_retries, self.settings.retry_batch)
            .await?;

        let mut report = RetryReport {
            considered: candidates.len(),
            ..RetryReport::default()
        };
        for payout in candidates {
            if !self.settings.schedule.is_due(payout.retries, payout.updated_at, now) {
                report.waiting += 1;
                continue;
            }
            let payout_id = payout.id;
            match self.attempt(payout).await {
                Ok(Attempted::Dispatched(_)) => report.dispatched += 1,
                Ok(Attempted::Failed(_)) => report.failed += 1,
                Ok(Attempted::Conflict) => report.conflicts += 1,
                Err(err) => {
                    tracing::error!(payout_id = %payout_id, error = %err, "Payout retry errored");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            considered = report.considered,
            waiting = report.waiting,
            dispatched = report.dispatched,
            failed = report.failed,
            conflicts = report.conflicts,
            "Payout retry pass finished"
        );
        Ok(report)
    }

    /// Dispatch one payout now, ignoring its backoff and the retry ceiling.
    ///
    /// # Errors
    ///
    /// `PAYOUT_NOT_FOUND`, `PAYOUT_NOT_RETRYABLE` for a payout that is not
    /// `PENDING` or `FAILED`, or `CONCURRENT_UPDATE` if another writer won.
    pub async fn retry_now(&self, payout_id: PayoutId) -> MarketResult<Payout> {
        let payout = self
            .storage
            .payout(payout_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYOUT_NOT_FOUND, "Payout not found"))?;
        if !payout.status.is_dispatchable() {
            return Err(MarketError::state_guard(
                codes::PAYOUT_NOT_RETRYABLE,
                "Only pending or failed payouts can be retried",
            )
            .with("status", payout.status));
        }

        tracing::info!(payout_id = %payout_id, retries = payout.retries, "Manual payout retry");
        match self.attempt(payout).await? {
            Attempted::Dispatched(payout) | Attempted::Failed(payout) => Ok(payout),
            Attempted::Conflict => Err(concurrent_update()),
        }
    }

    /// Poll the provider for every in-flight payout and record what changed.
    ///
    /// Never dispatches and never touches `retries`.
    ///
    /// # Errors
    ///
    /// Fails only if the candidate query fails.
    pub async fn reconcile_pass(&self) -> MarketResult<ReconcileReport> {
        let payouts = self.storage.in_flight_payouts(self.settings.reconcile_batch).await?;
        let provider = self.engine.provider();

        let mut report = ReconcileReport::default();
        for payout in payouts {
            let Some(external_id) = payout.external_id.clone() else {
                continue;
            };
            report.checked += 1;
            let status = match provider.status(&external_id).await {
                Ok(status) => status,
                Err(err) => {
                    tracing::warn!(payout_id = %payout.id, external_id, error = %err, "Payout status lookup failed");
                    report.failed += 1;
                    continue;
                }
            };
            let payout_id = payout.id;
            match self.reconcile(payout, status).await {
                Ok(Some(_)) => report.updated += 1,
                Ok(None) => {}
                Err(err) if err.code() == codes::CONCURRENT_UPDATE => report.conflicts += 1,
                Err(err) => {
                    tracing::error!(payout_id = %payout_id, error = %err, "Payout reconciliation errored");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            conflicts = report.conflicts,
            "Payout reconciliation pass finished"
        );
        Ok(report)
    }

    /// Apply a signed provider webhook.
    ///
    /// # Errors
    ///
    /// `INVALID_SIGNATURE`, `INVALID_INPUT` for an unparsable body,
    /// `PAYOUT_NOT_FOUND`, or `CONCURRENT_UPDATE` so the provider redelivers.
    pub async fn apply_webhook(&self, body: &[u8], signature: &str) -> MarketResult<Payout> {
        let provider = self.engine.provider();
        if !provider.verify_webhook_signature(body, signature) {
            tracing::warn!(provider = provider.name(), "Rejected payout webhook with a bad signature");
            return Err(MarketError::new(
                ErrorKind::Unauthorized,
                codes::INVALID_SIGNATURE,
                "Webhook signature does not match",
            ));
        }
        let update = provider
            .parse_webhook(body)
            .map_err(|e| MarketError::invalid_input(e.to_string()))?;

        let by_external = match &update.external_id {
            Some(external_id) => self.storage.payout_by_external_id(external_id).await?,
            None => None,
        };
        let payout = match (by_external, update.payout_id) {
            (Some(payout), _) => Some(payout),
            (None, Some(id)) => self.storage.payout(id).await?,
            (None, None) => None,
        }
        .ok_or_else(|| MarketError::not_found(codes::PAYOUT_NOT_FOUND, "Payout not found"))?;

        let payout_id = payout.id;
        let current = payout.clone();
        let updated = self.reconcile(payout, update.status).await?.unwrap_or(current);
        tracing::info!(payout_id = %payout_id, status = %updated.status, "Payout webhook applied");
        Ok(updated)
    }

    /// One dispatch attempt with its bookkeeping.
    async fn attempt(&self, mut payout: Payout) -> MarketResult<Attempted> {
        if payout.idempotency_key.is_none() {
            let expected = payout.version;
            PayoutReducer.reduce(
                &mut payout,
                PayoutAction::AssignIdempotencyKey(uuid::Uuid::new_v4().to_string()),
                &self.env,
            )?;
            if !self.storage.update_payout(&payout, expected).await? {
                tracing::info!(payout_id = %payout.id, "Lost the race assigning an idempotency key");
                return Ok(Attempted::Conflict);
            }
            payout.version = expected + 1;
        }

        let account = self.storage.account(payout.account_id).await?;
        let action = match self.engine.dispatch(&payout, account.as_ref()).await {
            DispatchOutcome::Sent(receipt) => PayoutAction::DispatchSucceeded {
                status: receipt.status,
                external_id: receipt.external_id,
                paid_at: receipt.paid_at,
            },
            DispatchOutcome::NotReady { message } => {
                tracing::warn!(payout_id = %payout.id, account_id = %payout.account_id, message, "Account not ready for payouts");
                PayoutAction::DispatchFailed {
                    code: Some(ACCOUNT_NOT_READY.to_string()),
                    message,
                }
            }
            DispatchOutcome::Failed(error) => PayoutAction::DispatchFailed {
                code: error.code(),
                message: error.to_string(),
            },
        };
        let succeeded = matches!(action, PayoutAction::DispatchSucceeded { .. });

        let expected = payout.version;
        let effects = PayoutReducer.reduce(&mut payout, action, &self.env)?;
        if !self.storage.update_payout(&payout, expected).await? {
            // The idempotency key makes the next dispatch a replay.
            tracing::warn!(payout_id = %payout.id, "Payout changed during dispatch; result not recorded");
            return Ok(Attempted::Conflict);
        }
        payout.version = expected + 1;
        crate::metrics::record_payout(payout.status);

        for effect in effects {
            match effect {
                PayoutEffect::RetriesExhausted { payout_id, retries } => {
                    self.alerts
                        .raise(Alert::PayoutRetriesExhausted {
                            payout_id,
                            retries,
                            last_error: payout.failure_message.clone(),
                        })
                        .await;
                }
            }
        }

        if succeeded {
            Ok(Attempted::Dispatched(payout))
        } else {
            tracing::info!(
                payout_id = %payout.id,
                retries = payout.retries,
                failure_code = ?payout.failure_code,
                "Payout attempt failed"
            );
            Ok(Attempted::Failed(payout))
        }
    }

    /// Record the provider's view of a payout. `None` when nothing changed.
    async fn reconcile(&self, mut payout: Payout, status: ProviderStatus) -> MarketResult<Option<Payout>> {
        let unchanged = payout.status == status.status
            && (status.raw_status.is_none() || payout.external_status == status.raw_status)
            && status.failure_code.is_none()
            && status.failure_message.is_none()
            && (status.paid_at.is_none() || payout.paid_at == status.paid_at);
        if unchanged {
            return Ok(None);
        }

        let expected = payout.version;
        let from = payout.status;
        PayoutReducer.reduce(
            &mut payout,
            PayoutAction::Reconciled {
                status: status.status,
                external_status: status.raw_status,
                failure_code: status.failure_code,
                failure_message: status.failure_message,
                paid_at: status.paid_at,
            },
            &self.env,
        )?;
        if !self.storage.update_payout(&payout, expected).await? {
            tracing::info!(payout_id = %payout.id, "Payout changed during reconciliation; skipped");
            return Err(concurrent_update());
        }
        payout.version = expected + 1;

        if from != payout.status {
            crate::metrics::record_payout(payout.status);
            tracing::info!(payout_id = %payout.id, from = %from, to = %payout.status, "Payout reconciled");
        }
        Ok(Some(payout))
    }
}

fn concurrent_update() -> MarketError {
    MarketError::conflict(codes::CONCURRENT_UPDATE, "The payout was updated concurrently")
}
