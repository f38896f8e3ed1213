//! Payout provider interface.
//!
//! A provider moves money to a seller's bank account. The engine talks to it
//! through [`PayoutProvider`] only, so the simulated and HTTP-backed
//! implementations are interchangeable.

use async_trait::async_trait;
use base64::Engine;
use boxoffice_core::catalog::Destination;
use boxoffice_core::money::Money;
use boxoffice_core::payout::PayoutStatus;
use boxoffice_core::types::PayoutId;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Normalized disbursement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutRequest {
    /// Local payout id
    pub payout_id: PayoutId,
    /// Amount to send
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Where the money goes
    pub destination: Destination,
    /// Sent with the request so a replay is not paid twice
    pub idempotency_key: String,
}

/// What the provider said when it accepted a payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutReceipt {
    /// Normalized status
    pub status: PayoutStatus,
    /// Provider's payout id
    pub external_id: Option<String>,
    /// Delivery time, if already paid
    pub paid_at: Option<DateTime<Utc>>,
}

/// Authoritative state of a payout at the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    /// Normalized status
    pub status: PayoutStatus,
    /// Status string as the provider reported it
    pub raw_status: Option<String>,
    /// Provider failure code
    pub failure_code: Option<String>,
    /// Provider failure message
    pub failure_message: Option<String>,
    /// Delivery time
    pub paid_at: Option<DateTime<Utc>>,
}

/// A status change pushed by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookUpdate {
    /// Provider's payout id
    pub external_id: Option<String>,
    /// Local payout id, when the provider echoes our metadata
    pub payout_id: Option<PayoutId>,
    /// New state
    pub status: ProviderStatus,
}

/// Provider call failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Network failure, timeout, throttling or 5xx; worth retrying
    #[error("provider unavailable: {0}")]
    Transient(String),

    /// The provider refused the request
    #[error("provider rejected the payout: {message}")]
    Rejected {
        /// Provider failure code
        code: Option<String>,
        /// Provider message
        message: String,
    },

    /// The provider does not know the payout
    #[error("payout {0} not found at provider")]
    NotFound(String),

    /// The response could not be understood
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Code recorded on the payout row
    #[must_use]
    pub fn code(&self) -> Option<String> {
        match self {
            Self::Transient(_) => Some("PROVIDER_UNAVAILABLE".to_string()),
            Self::Rejected { code, .. } => code.clone(),
            Self::NotFound(_) => Some("NOT_FOUND".to_string()),
            Self::InvalidResponse(_) => Some("INVALID_RESPONSE".to_string()),
        }
    }
}

/// A disbursement backend.
#[async_trait]
pub trait PayoutProvider: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Send a payout.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] once the provider's own retries are spent.
    async fn pay(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError>;

    /// Look up a payout by provider id. Never moves money.
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotFound`] if the provider does not know the id.
    async fn status(&self, external_id: &str) -> Result<ProviderStatus, ProviderError>;

    /// Whether `signature` authenticates `body`.
    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool;

    /// Decode a webhook body.
    ///
    /// # Errors
    ///
    /// [`ProviderError::InvalidResponse`] for a malformed body or an unknown status.
    fn parse_webhook(&self, body: &[u8]) -> Result<WebhookUpdate, ProviderError> {
        parse_webhook_body(body)
    }
}

/// `base64(hmac_sha256(secret, body))`
#[must_use]
pub fn sign_webhook(secret: &str, body: &[u8]) -> String {
    // HMAC takes keys of any length, so this never falls back.
    HmacSha256::new_from_slice(secret.as_bytes())
        .map(|mac| base64::engine::general_purpose::STANDARD.encode(mac.chain_update(body).finalize().into_bytes()))
        .unwrap_or_default()
}

/// Constant-time check of a webhook signature.
///
/// Without a configured secret every signature is refused.
#[must_use]
pub fn verify_signature(secret: Option<&str>, body: &[u8], signature: &str) -> bool {
    let Some(secret) = secret else {
        return false;
    };
    let expected = sign_webhook(secret, body);
    !expected.is_empty() && constant_time_eq::constant_time_eq(expected.as_bytes(), signature.trim().as_bytes())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebhookBody {
    #[serde(alias = "externalId")]
    psp_payout_id: Option<String>,
    payout_id: Option<uuid::Uuid>,
    status: String,
    failure_code: Option<String>,
    failure_message: Option<String>,
    paid_at: Option<DateTime<Utc>>,
}

/// Decode the common webhook shape
/// `{ pspPayoutId?, payoutId?, status, failureCode?, failureMessage?, paidAt? }`.
///
/// # Errors
///
/// [`ProviderError::InvalidResponse`] for malformed JSON, an unknown status or
/// a body naming no payout.
pub fn parse_webhook_body(body: &[u8]) -> Result<WebhookUpdate, ProviderError> {
    let body: WebhookBody =
        serde_json::from_slice(body).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
    if body.psp_payout_id.is_none() && body.payout_id.is_none() {
        return Err(ProviderError::InvalidResponse("webhook names no payout".to_string()));
    }
    let status = PayoutStatus::from_provider(&body.status)
        .ok_or_else(|| ProviderError::InvalidResponse(format!("unknown status {:?}", body.status)))?;

    Ok(WebhookUpdate {
        external_id: body.psp_payout_id,
        payout_id: body.payout_id.map(PayoutId::from_uuid),
        status: ProviderStatus {
            status,
            raw_status: Some(body.status),
            failure_code: body.failure_code,
            failure_message: body.failure_message,
            paid_at: body.paid_at,
        },
    })
}
