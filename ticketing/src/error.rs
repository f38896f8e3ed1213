//! Request-facing error type.
//!
//! Every failure a buyer, organizer or administrator can see is a
//! [`MarketError`]: a [`ErrorKind`] that fixes the HTTP status, a stable
//! machine-readable `code`, a human message and a JSON `context` map with the
//! structured details (`remaining`, `conflictingSeats`, ...).
//!
//! ```ignore
//! return Err(MarketError::conflict(codes::INSUFFICIENT_STOCK, "Not enough tickets left")
//!     .with("remaining", remaining));
//! ```

use crate::storage::StorageError;
use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use boxoffice_core::TransitionError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

/// Stable error codes.
pub mod codes {
    #![allow(missing_docs)]

    pub const INVALID_INPUT: &str = "INVALID_INPUT";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const INTERNAL: &str = "INTERNAL_ERROR";

    pub const EVENT_NOT_FOUND: &str = "EVENT_NOT_FOUND";
    pub const EVENT_NOT_APPROVED: &str = "EVENT_NOT_APPROVED";
    pub const EVENT_HAS_STARTED: &str = "EVENT_HAS_STARTED";
    pub const EVENT_DISABLED: &str = "EVENT_DISABLED";
    pub const CANNOT_BUY_OWN_EVENT: &str = "CANNOT_BUY_OWN_EVENT";
    pub const CANNOT_BUY_OWN_TICKET: &str = "CANNOT_BUY_OWN_TICKET";
    pub const TICKET_ID_REQUIRED_FOR_RESALE: &str = "TICKET_ID_REQUIRED_FOR_RESALE";
    pub const RESALE_ONLY_ALLOWS_ONE_TICKET: &str = "RESALE_ONLY_ALLOWS_ONE_TICKET";
    pub const TICKET_NOT_FOUND: &str = "TICKET_NOT_FOUND";
    pub const TICKET_ALREADY_SOLD: &str = "TICKET_ALREADY_SOLD";
    pub const MAX_PER_PURCHASE_EXCEEDED: &str = "MAX_PER_PURCHASE_EXCEEDED";
    pub const INSUFFICIENT_STOCK: &str = "INSUFFICIENT_STOCK";
    pub const SECTION_NOT_FOUND: &str = "SECTION_NOT_FOUND";
    pub const SECTION_INSUFFICIENT_STOCK: &str = "SECTION_INSUFFICIENT_STOCK";
    pub const INVALID_SEATS: &str = "INVALID_SEATS";
    pub const SEATS_QUANTITY_MISMATCH: &str = "SEATS_QUANTITY_MISMATCH";
    pub const SEATS_ALREADY_RESERVED: &str = "SEATS_ALREADY_RESERVED";

    pub const RESERVATION_NOT_FOUND: &str = "RESERVATION_NOT_FOUND";
    pub const RESERVATION_EXPIRED: &str = "RESERVATION_EXPIRED";
    pub const RESERVATION_NOT_PENDING: &str = "RESERVATION_NOT_PENDING";
    pub const CANNOT_CANCEL_PAID: &str = "CANNOT_CANCEL_PAID";

    pub const PAYMENT_NOT_FOUND: &str = "PAYMENT_NOT_FOUND";
    pub const ALREADY_PAID: &str = "ALREADY_PAID";
    pub const PAYMENT_DECLINED: &str = "PAYMENT_DECLINED";
    pub const INVALID_REFUND_AMOUNT: &str = "INVALID_REFUND_AMOUNT";
    pub const REFUND_EXCEEDS_BALANCE: &str = "REFUND_EXCEEDS_BALANCE";
    pub const INVALID_STATE_TRANSITION: &str = "INVALID_STATE_TRANSITION";
    pub const GATEWAY_UNAVAILABLE: &str = "GATEWAY_UNAVAILABLE";

    pub const PAYOUT_NOT_FOUND: &str = "PAYOUT_NOT_FOUND";
    pub const PAYOUT_NOT_RETRYABLE: &str = "PAYOUT_NOT_RETRYABLE";
    pub const INVALID_SIGNATURE: &str = "INVALID_SIGNATURE";
    pub const CONCURRENT_UPDATE: &str = "CONCURRENT_UPDATE";
}

/// Failure category; fixes the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input (400)
    Validation,
    /// Caller identity missing (401)
    Unauthorized,
    /// Caller not allowed to act on the resource (403)
    Forbidden,
    /// Referenced row does not exist (404)
    NotFound,
    /// Stock, seat, ticket or payment contention (409)
    Conflict,
    /// Operation not permitted in the current state (409)
    StateGuard,
    /// Gateway explicitly declined (402)
    ExternalTerminal,
    /// Network, timeout or 5xx from an external system (502)
    ExternalTransient,
    /// Anything unexpected (500)
    Internal,
}

impl ErrorKind {
    /// HTTP status for this kind
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Validation => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict | Self::StateGuard => StatusCode::CONFLICT,
            Self::ExternalTerminal => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalTransient => StatusCode::BAD_GATEWAY,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Marketplace error with a stable code and structured context.
#[derive(Debug)]
pub struct MarketError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    context: Map<String, Value>,
    source: Option<anyhow::Error>,
}

/// Result alias for marketplace operations
pub type MarketResult<T> = Result<T, MarketError>;

impl MarketError {
    /// Create a new error.
    #[must_use]
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: Map::new(),
            source: None,
        }
    }

    /// 400 with the given code
    #[must_use]
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    /// 400 `INVALID_INPUT`
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::validation(codes::INVALID_INPUT, message)
    }

    /// 401 `UNAUTHORIZED`
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, codes::UNAUTHORIZED, message)
    }

    /// 403 `FORBIDDEN`
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, codes::FORBIDDEN, message)
    }

    /// 404 with the given code
    #[must_use]
    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    /// 409 contention
    #[must_use]
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, code, message)
    }

    /// 409 state-machine guard
    #[must_use]
    pub fn state_guard(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StateGuard, code, message)
    }

    /// 502 external failure worth retrying later
    #[must_use]
    pub fn external_transient(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalTransient, code, message)
    }

    /// 402 definitive external refusal
    #[must_use]
    pub fn external_terminal(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalTerminal, code, message)
    }

    /// 500 with a generic message; `source` is logged, never rendered.
    #[must_use]
    pub fn internal(source: impl Into<anyhow::Error>) -> Self {
        Self::new(ErrorKind::Internal, codes::INTERNAL, "An internal error occurred").with_source(source)
    }

    /// Attach a context field.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        self.context.insert(key.to_string(), value);
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<anyhow::Error>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Failure category
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable error code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Human-readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Structured context
    #[must_use]
    pub const fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// HTTP status
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl fmt::Display for MarketError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for MarketError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
    context: Map<String, Value>,
}

impl IntoResponse for MarketError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %status,
                    code = self.code,
                    message = %self.message,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(
                    status = %status,
                    code = self.code,
                    message = %self.message,
                    "Request failed"
                ),
            }
        }

        let message = if self.kind == ErrorKind::Internal {
            "An internal error occurred".to_string()
        } else {
            self.message
        };
        let body = ErrorResponse {
            code: self.code,
            message,
            context: self.context,
        };

        (status, Json(body)).into_response()
    }
}

impl From<StorageError> for MarketError {
    fn from(err: StorageError) -> Self {
        if err.is_conflict() {
            return Self::conflict(
                codes::CONCURRENT_UPDATE,
                "The request raced with another update, please retry",
            );
        }
        Self::internal(err)
    }
}

impl From<JsonRejection> for MarketError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl From<PathRejection> for MarketError {
    fn from(rejection: PathRejection) -> Self {
        Self::invalid_input(rejection.body_text())
    }
}

impl From<TransitionError> for MarketError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::HoldExpired { expired_at } => {
                Self::state_guard(codes::RESERVATION_EXPIRED, "The reservation has expired")
                    .with("expiredAt", expired_at)
            }
            TransitionError::HoldActive { expires_at } => Self::state_guard(
                codes::INVALID_STATE_TRANSITION,
                "The reservation hold is still active",
            )
            .with("expiresAt", expires_at),
            TransitionError::RefundExceedsBalance { requested, refundable } => Self::validation(
                codes::REFUND_EXCEEDS_BALANCE,
                format!("Refund of {requested} exceeds the refundable balance of {refundable}"),
            )
            .with("maxRefundable", refundable),
            TransitionError::NonPositiveRefund => {
                Self::validation(codes::INVALID_REFUND_AMOUNT, "Refund amount must be positive")
            }
            invalid @ TransitionError::Invalid { .. } => {
                Self::state_guard(codes::INVALID_STATE_TRANSITION, invalid.to_string())
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_core::Money;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(ErrorKind::Validation.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorKind::Conflict.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::StateGuard.status(), StatusCode::CONFLICT);
        assert_eq!(ErrorKind::ExternalTerminal.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(ErrorKind::ExternalTransient.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn context_is_collected() {
        let err = MarketError::conflict(codes::INSUFFICIENT_STOCK, "Not enough tickets left")
            .with("remaining", 4);
        assert_eq!(err.to_string(), "[INSUFFICIENT_STOCK] Not enough tickets left");
        assert_eq!(err.context()["remaining"], 4);
    }

    #[test]
    fn refund_errors_carry_max_refundable() {
        let err: MarketError = TransitionError::RefundExceedsBalance {
            requested: Money::new(10),
            refundable: Money::new(7),
        }
        .into();
        assert_eq!(err.code(), codes::REFUND_EXCEEDS_BALANCE);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(err.context()["maxRefundable"], 7);
    }

    #[tokio::test]
    async fn internal_errors_hide_their_source() {
        let response = MarketError::internal(anyhow::anyhow!("connection refused by 10.0.0.3")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "INTERNAL_ERROR");
        assert!(!body["message"].as_str().unwrap().contains("10.0.0.3"));
    }
}
