//! Payment gateway seam.
//!
//! The gateway owns card entry and the actual charge. This crate only drives
//! it: `create` opens a transaction and returns a redirect, `commit` confirms
//! it after the buyer returns, `capture` finalizes an authorized charge,
//! `refund` reverses (part of) a charge and `status` is a best-effort lookup.

use boxoffice_core::money::Money;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Payment gateway result
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Boxed future returned by [`PaymentGateway`] methods
pub type GatewayFuture<T> = Pin<Box<dyn Future<Output = GatewayResult<T>> + Send>>;

/// Payment gateway error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Network failure or 5xx
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    /// No answer in time
    #[error("gateway timeout")]
    Timeout,
    /// The gateway does not know the token
    #[error("unknown token {0}")]
    UnknownToken(String),
    /// The gateway refused the operation
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
}

impl GatewayError {
    /// Whether the same call may succeed later
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout)
    }
}

/// A transaction to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTransaction {
    /// Order reference
    pub buy_order: String,
    /// Session reference
    pub session_id: String,
    /// Amount to charge
    pub amount: Money,
    /// Where the gateway sends the buyer back
    pub return_url: String,
}

/// An opened transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTransaction {
    /// Gateway token
    pub token: String,
    /// Card-entry page
    pub redirect_url: String,
}

/// Gateway answer to a commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResponse {
    /// Charge approved
    pub approved: bool,
    /// Authorization code, if approved
    pub authorization_code: Option<String>,
    /// Raw response code (`0` is approval)
    pub response_code: Option<i32>,
    /// Last four card digits
    pub card_last4: Option<String>,
    /// When the gateway processed it
    pub transaction_date: Option<DateTime<Utc>>,
}

/// Best-effort transaction status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatus {
    /// Gateway token
    pub token: String,
    /// Gateway's own status string
    pub status: String,
    /// Charged amount
    pub amount: Money,
    /// Refunded so far
    pub refunded: Money,
}

/// Payment gateway trait
pub trait PaymentGateway: Send + Sync {
    /// Open a transaction.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway cannot be reached or refuses the request
    fn create(&self, request: CreateTransaction) -> GatewayFuture<CreatedTransaction>;

    /// Confirm a transaction after the buyer returns.
    ///
    /// # Errors
    ///
    /// Returns error if the gateway cannot be reached or does not know the token
    fn commit(&self, token: &str) -> GatewayFuture<CommitResponse>;

    /// Finalize an authorized charge.
    ///
    /// # Errors
    ///
    /// Returns error if the capture is refused
    fn capture(&self, token: &str, amount: Money) -> GatewayFuture<()>;

    /// Refund `amount` of a charge. Refunding an uncaptured authorization
    /// releases it.
    ///
    /// # Errors
    ///
    /// Returns error if the refund is refused
    fn refund(&self, token: &str, amount: Money) -> GatewayFuture<()>;

    /// Look a transaction up.
    ///
    /// # Errors
    ///
    /// Returns error if the token is unknown or the gateway is unreachable
    fn status(&self, token: &str) -> GatewayFuture<TransactionStatus>;
}

#[derive(Debug, Default)]
struct MockState {
    transactions: HashMap<String, TransactionStatus>,
    commits: Vec<String>,
    captures: Vec<(String, Money)>,
    refunds: Vec<(String, Money)>,
}

/// In-process gateway for development and tests.
///
/// Approves every commit unless switched to declining, and can be switched
/// to unavailable to exercise transient failures. Every call is recorded.
#[derive(Clone, Debug)]
pub struct MockPaymentGateway {
    state: Arc<Mutex<MockState>>,
    decline: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Creates an approving gateway
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            decline: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentGateway> {
        Arc::new(Self::new())
    }

    /// Decline subsequent commits
    pub fn set_declining(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    /// Fail subsequent calls with [`GatewayError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Tokens committed so far
    #[must_use]
    pub fn commits(&self) -> Vec<String> {
        self.with_state(|s| s.commits.clone())
    }

    /// Captures issued so far
    #[must_use]
    pub fn captures(&self) -> Vec<(String, Money)> {
        self.with_state(|s| s.captures.clone())
    }

    /// Refunds issued so far
    #[must_use]
    pub fn refunds(&self) -> Vec<(String, Money)> {
        self.with_state(|s| s.refunds.clone())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn check_available(&self) -> GatewayResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("mock gateway switched off".to_string()));
        }
        Ok(())
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create(&self, request: CreateTransaction) -> GatewayFuture<CreatedTransaction> {
        let result = self.check_available().map(|()| {
            let token = format!("mock_tok_{}", uuid::Uuid::new_v4().simple());
            self.with_state(|s| {
                s.transactions.insert(
                    token.clone(),
                    TransactionStatus {
                        token: token.clone(),
                        status: "INITIALIZED".to_string(),
                        amount: request.amount,
                        refunded: Money::ZERO,
                    },
                );
            });
            tracing::debug!(buy_order = %request.buy_order, token = %token, "Mock transaction created");
            CreatedTransaction {
                redirect_url: format!("https://gateway.invalid/pay?token={token}"),
                token,
            }
        });
        Box::pin(async move { result })
    }

    fn commit(&self, token: &str) -> GatewayFuture<CommitResponse> {
        let token = token.to_string();
        let declining = self.decline.load(Ordering::SeqCst);
        let result = self.check_available().and_then(|()| {
            self.with_state(|s| {
                let tx = s
                    .transactions
                    .get_mut(&token)
                    .ok_or_else(|| GatewayError::UnknownToken(token.clone()))?;
                tx.status = if declining { "FAILED" } else { "AUTHORIZED" }.to_string();
                s.commits.push(token.clone());
                Ok(if declining {
                    CommitResponse {
                        approved: false,
                        authorization_code: None,
                        response_code: Some(-1),
                        card_last4: Some("6623".to_string()),
                        transaction_date: Some(Utc::now()),
                    }
                } else {
                    CommitResponse {
                        approved: true,
                        authorization_code: Some("1213".to_string()),
                        response_code: Some(0),
                        card_last4: Some("6623".to_string()),
                        transaction_date: Some(Utc::now()),
                    }
                })
            })
        });
        Box::pin(async move { result })
    }

    fn capture(&self, token: &str, amount: Money) -> GatewayFuture<()> {
        let token = token.to_string();
        let result = self.check_available().and_then(|()| {
            self.with_state(|s| {
                let tx = s
                    .transactions
                    .get_mut(&token)
                    .ok_or_else(|| GatewayError::UnknownToken(token.clone()))?;
                tx.status = "CAPTURED".to_string();
                s.captures.push((token, amount));
                Ok(())
            })
        });
        Box::pin(async move { result })
    }

    fn refund(&self, token: &str, amount: Money) -> GatewayFuture<()> {
        let token = token.to_string();
        let result = self.check_available().and_then(|()| {
            self.with_state(|s| {
                let tx = s
                    .transactions
                    .get_mut(&token)
                    .ok_or_else(|| GatewayError::UnknownToken(token.clone()))?;
                tx.refunded = tx.refunded.checked_add(amount).unwrap_or(tx.amount);
                if tx.refunded >= tx.amount {
                    tx.status = "REVERSED".to_string();
                }
                s.refunds.push((token.clone(), amount));
                tracing::info!(token = %token, amount = %amount, "Mock refund processed");
                Ok(())
            })
        });
        Box::pin(async move { result })
    }

    fn status(&self, token: &str) -> GatewayFuture<TransactionStatus> {
        let token = token.to_string();
        let result = self.check_available().and_then(|()| {
            self.with_state(|s| {
                s.transactions
                    .get(&token)
                    .cloned()
                    .ok_or(GatewayError::UnknownToken(token))
            })
        });
        Box::pin(async move { result })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn request(amount: u64) -> CreateTransaction {
        CreateTransaction {
            buy_order: "O-1".to_string(),
            session_id: "S-1".to_string(),
            amount: Money::new(amount),
            return_url: "http://localhost/return".to_string(),
        }
    }

    #[tokio::test]
    async fn approves_commits_by_default() {
        let gateway = MockPaymentGateway::new();
        let created = gateway.create(request(1_000)).await.unwrap();

        let response = gateway.commit(&created.token).await.unwrap();

        assert!(response.approved);
        assert_eq!(response.response_code, Some(0));
        assert_eq!(gateway.commits(), vec![created.token]);
    }

    #[tokio::test]
    async fn declining_switch_rejects_commits() {
        let gateway = MockPaymentGateway::new();
        gateway.set_declining(true);
        let created = gateway.create(request(1_000)).await.unwrap();

        let response = gateway.commit(&created.token).await.unwrap();

        assert!(!response.approved);
    }

    #[tokio::test]
    async fn unknown_token_is_not_transient() {
        let gateway = MockPaymentGateway::new();
        let err = gateway.commit("nope").await.unwrap_err();

        assert_eq!(err, GatewayError::UnknownToken("nope".to_string()));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unavailable_switch_is_transient() {
        let gateway = MockPaymentGateway::new();
        gateway.set_unavailable(true);

        let err = gateway.create(request(1_000)).await.unwrap_err();

        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn refunds_accumulate_until_reversed() {
        let gateway = MockPaymentGateway::new();
        let created = gateway.create(request(1_000)).await.unwrap();
        gateway.commit(&created.token).await.unwrap();

        gateway.refund(&created.token, Money::new(400)).await.unwrap();
        gateway.refund(&created.token, Money::new(600)).await.unwrap();

        let status = gateway.status(&created.token).await.unwrap();
        assert_eq!(status.refunded, Money::new(1_000));
        assert_eq!(status.status, "REVERSED");
        assert_eq!(gateway.refunds().len(), 2);
    }
}
