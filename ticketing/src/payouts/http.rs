//! HTTP-backed payout provider.
//!
//! Posts normalized payout requests to an external adapter:
//!
//! ```text
//! POST {base}/payouts                    Authorization: Bearer <key>
//!                                        X-Idempotency-Key: <key>
//! GET  {base}/payouts/{externalId}       (falls back to ?externalId= on 404)
//! ```
//!
//! Network errors, timeouts, 408, 429, 5xx and an in-progress 409 are retried
//! in-process with [`retry_with_hint`], honoring `Retry-After`. A 409 that
//! reports the idempotency key as already processed is a success.

use super::provider::{
    PayoutProvider, PayoutReceipt, PayoutRequest, ProviderError, ProviderStatus, verify_signature,
};
use async_trait::async_trait;
use boxoffice_core::payout::PayoutStatus;
use boxoffice_runtime::{Attempt, RetryPolicy, retry_with_hint};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Header carrying the idempotency key
pub const IDEMPOTENCY_HEADER: &str = "X-Idempotency-Key";

/// Connection settings for [`HttpPayoutProvider`].
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
    /// Adapter base URL, without trailing slash
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// In-process retry policy
    pub retry: RetryPolicy,
    /// Shared webhook secret
    pub webhook_secret: Option<String>,
}

/// Provider talking to the payout adapter over HTTP.
#[derive(Clone)]
pub struct HttpPayoutProvider {
    client: Client,
    base_url: String,
    api_key: String,
    retry: RetryPolicy,
    webhook_secret: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PayBody<'a> {
    amount: u64,
    currency: &'a str,
    destination: DestinationBody<'a>,
    metadata: Metadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DestinationBody<'a> {
    bank_name: &'a str,
    account_type: &'a str,
    account_number: &'a str,
    holder_name: &'a str,
    holder_rut: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Metadata {
    payout_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    ok: Option<bool>,
    status: Option<String>,
    psp_payout_id: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: String,
    failure_code: Option<String>,
    failure_message: Option<String>,
    paid_at: Option<DateTime<Utc>>,
}

impl PayResponse {
    fn error_code(&self) -> Option<String> {
        match &self.error {
            Some(Value::Object(map)) => map.get("code").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    fn error_message(&self) -> Option<String> {
        match &self.error {
            Some(Value::String(message)) => Some(message.clone()),
            Some(Value::Object(map)) => map.get("message").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    fn normalized_status(&self) -> Option<PayoutStatus> {
        self.status.as_deref().and_then(PayoutStatus::from_provider)
    }

    /// The provider answered but reports the payout as failed or canceled.
    fn refusal(&self) -> Option<ProviderError> {
        if !matches!(self.normalized_status(), Some(PayoutStatus::Failed | PayoutStatus::Canceled)) {
            return None;
        }
        let raw = self.status.clone().unwrap_or_default();
        Some(ProviderError::Rejected {
            code: self.error_code().or_else(|| Some(raw.to_ascii_uppercase())),
            message: self
                .error_message()
                .unwrap_or_else(|| format!("provider reported payout {raw}")),
        })
    }

    fn receipt(self) -> PayoutReceipt {
        PayoutReceipt {
            status: self.normalized_status().unwrap_or(PayoutStatus::Scheduled),
            external_id: self.psp_payout_id,
            paid_at: self.paid_at,
        }
    }
}

impl HttpPayoutProvider {
    /// Build the provider and its HTTP client.
    ///
    /// # Errors
    ///
    /// Fails if the TLS backend cannot be initialized.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::InvalidResponse(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            retry: config.retry,
            webhook_secret: config.webhook_secret,
        })
    }

    async fn pay_once(&self, request: &PayoutRequest) -> Attempt<PayoutReceipt, ProviderError> {
        let destination = &request.destination;
        let body = PayBody {
            amount: request.amount.units(),
            currency: &request.currency,
            destination: DestinationBody {
                bank_name: &destination.bank_name,
                account_type: &destination.account_type,
                account_number: &destination.account_number,
                holder_name: &destination.holder_name,
                holder_rut: &destination.holder_tax_id,
            },
            metadata: Metadata {
                payout_id: request.payout_id.to_string(),
            },
        };

        let response = match self
            .client
            .post(format!("{}/payouts", self.base_url))
            .bearer_auth(&self.api_key)
            .header(IDEMPOTENCY_HEADER, &request.idempotency_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    error: ProviderError::Transient(e.to_string()),
                    after: None,
                };
            }
        };

        let status = response.status();
        let after = retry_after(response.headers());
        let text = response.text().await.unwrap_or_default();
        let parsed: PayResponse = serde_json::from_str(&text).unwrap_or_default();
        classify(status, after, parsed)
    }

    async fn status_once(&self, external_id: &str) -> Attempt<ProviderStatus, ProviderError> {
        let by_path = self
            .client
            .get(format!("{}/payouts/{external_id}", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        let response = match by_path {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                tracing::debug!(external_id, "Path lookup returned 404, trying query lookup");
                self.client
                    .get(format!("{}/payouts", self.base_url))
                    .query(&[("externalId", external_id)])
                    .bearer_auth(&self.api_key)
                    .send()
                    .await
            }
            other => other,
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                return Attempt::Retry {
                    error: ProviderError::Transient(e.to_string()),
                    after: None,
                };
            }
        };

        let status = response.status();
        if is_retryable(status) {
            return Attempt::Retry {
                error: ProviderError::Transient(format!("status lookup returned {status}")),
                after: retry_after(response.headers()),
            };
        }
        if status == StatusCode::NOT_FOUND {
            return Attempt::Fail(ProviderError::NotFound(external_id.to_string()));
        }
        if !status.is_success() {
            return Attempt::Fail(ProviderError::Rejected {
                code: Some(format!("HTTP_{}", status.as_u16())),
                message: format!("status lookup returned {status}"),
            });
        }

        let body: StatusResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return Attempt::Fail(ProviderError::InvalidResponse(e.to_string())),
        };
        match PayoutStatus::from_provider(&body.status) {
            Some(normalized) => Attempt::Done(ProviderStatus {
                status: normalized,
                raw_status: Some(body.status),
                failure_code: body.failure_code,
                failure_message: body.failure_message,
                paid_at: body.paid_at,
            }),
            None => Attempt::Fail(ProviderError::InvalidResponse(format!(
                "unknown status {:?}",
                body.status
            ))),
        }
    }
}

#[async_trait]
impl PayoutProvider for HttpPayoutProvider {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn pay(&self, request: &PayoutRequest) -> Result<PayoutReceipt, ProviderError> {
        retry_with_hint(&self.retry, |_attempt| self.pay_once(request)).await
    }

    async fn status(&self, external_id: &str) -> Result<ProviderStatus, ProviderError> {
        retry_with_hint(&self.retry, |_attempt| self.status_once(external_id)).await
    }

    fn verify_webhook_signature(&self, body: &[u8], signature: &str) -> bool {
        verify_signature(self.webhook_secret.as_deref(), body, signature)
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// A 409 saying the key was already processed.
fn is_replay(body: &PayResponse) -> bool {
    let code = body.error_code().unwrap_or_default().to_ascii_uppercase();
    let message = body.error_message().unwrap_or_default().to_ascii_lowercase();
    code.contains("IDEMPOTEN")
        || code.contains("ALREADY_PROCESSED")
        || message.contains("already processed")
        || (body.psp_payout_id.is_some() && body.ok != Some(false))
}

/// A 409 saying a request with the same key is still running.
fn is_in_progress(body: &PayResponse) -> bool {
    let code = body.error_code().unwrap_or_default().to_ascii_uppercase();
    let message = body.error_message().unwrap_or_default().to_ascii_lowercase();
    code.contains("IN_PROGRESS") || message.contains("in progress")
}

fn classify(status: StatusCode, after: Option<Duration>, body: PayResponse) -> Attempt<PayoutReceipt, ProviderError> {
    if status.is_success() {
        if body.ok == Some(false) {
            let message = body.error_message().unwrap_or_else(|| "payout refused".to_string());
            return Attempt::Fail(ProviderError::Rejected {
                code: body.error_code(),
                message,
            });
        }
        if let Some(refusal) = body.refusal() {
            return Attempt::Fail(refusal);
        }
        return Attempt::Done(body.receipt());
    }

    if status == StatusCode::CONFLICT {
        if is_replay(&body) {
            tracing::info!(external_id = ?body.psp_payout_id, "Provider replayed an already processed payout");
            if let Some(refusal) = body.refusal() {
                return Attempt::Fail(refusal);
            }
            return Attempt::Done(body.receipt());
        }
        if is_in_progress(&body) {
            return Attempt::Retry {
                error: ProviderError::Transient("payout with this key is in progress".to_string()),
                after,
            };
        }
    }

    if is_retryable(status) {
        return Attempt::Retry {
            error: ProviderError::Transient(format!("provider returned {status}")),
            after,
        };
    }

    Attempt::Fail(ProviderError::Rejected {
        code: body.error_code().or_else(|| Some(format!("HTTP_{}", status.as_u16()))),
        message: body
            .error_message()
            .unwrap_or_else(|| format!("provider returned {status}")),
    })
}

/// `Retry-After` as delta-seconds or an HTTP date.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}
