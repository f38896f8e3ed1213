//! Operational alerts.

use async_trait::async_trait;
use boxoffice_core::types::PayoutId;
use std::sync::{Mutex, PoisonError};

/// Something an operator has to look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// A payout used up its automatic retries
    PayoutRetriesExhausted {
        /// The payout
        payout_id: PayoutId,
        /// Failed attempts so far
        retries: u32,
        /// Last failure, if known
        last_error: Option<String>,
    },
    /// Money was taken for a hold that never settled and could not be returned
    RefundFailed {
        /// Gateway token or order reference
        reference: String,
        /// Gateway error
        error: String,
    },
}

/// Alert delivery.
///
/// Fire-and-forget: a failed delivery is logged by the sink and never fails
/// the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raise an alert
    async fn raise(&self, alert: Alert);
}

/// Logs alerts at `error` and counts them.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn raise(&self, alert: Alert) {
        match &alert {
            Alert::PayoutRetriesExhausted {
                payout_id,
                retries,
                last_error,
            } => tracing::error!(
                payout_id = %payout_id,
                retries,
                last_error = last_error.as_deref().unwrap_or("unknown"),
                "Payout exhausted its retries"
            ),
            Alert::RefundFailed { reference, error } => {
                tracing::error!(reference = %reference, error = %error, "Refund of an unsettled payment failed");
            }
        }
        crate::metrics::record_alert();
    }
}

/// Keeps alerts in memory.
#[derive(Debug, Default)]
pub struct RecordingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingAlertSink {
    /// Creates an empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts raised so far
    #[must_use]
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn raise(&self, alert: Alert) {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).push(alert);
    }
}
