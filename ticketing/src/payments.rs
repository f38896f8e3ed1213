//! Payment service.
//!
//! Drives the payment of a purchase group through the gateway. Gateway calls
//! never run inside a unit of work: each operation reads and validates in one
//! unit of work, calls the gateway, then re-reads the payment and applies
//! the transition in a second one. The transition is gated by the status
//! read in that second unit of work, so a duplicate callback is a no-op.

use crate::error::{MarketError, MarketResult, codes};
use crate::gateway::{CreateTransaction, GatewayError, PaymentGateway, TransactionStatus};
use crate::ledger::{self, GroupChanges};
use crate::limits::LimitsCache;
use crate::settlement::{ReservationSettled, SettlementPublisher};
use crate::storage::{Storage, StorageTx};
use boxoffice_core::environment::Clock;
use boxoffice_core::money::Money;
use boxoffice_core::payment::{
    Approval, Payment, PaymentAction, PaymentEnvironment, PaymentReducer, PaymentStatus, Rejection, buy_order_for,
    session_id_for,
};
use boxoffice_core::payout::{Payout, PayoutStatus};
use boxoffice_core::reducer::Reducer;
use boxoffice_core::reservation::{Reservation, ReservationAction, ReservationEnvironment, ReservationStatus};
use boxoffice_core::types::{PaymentId, PayoutId, PurchaseGroupId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static payment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSettings {
    /// Where the gateway sends the buyer back
    pub return_url: String,
    /// Authorize at commit and capture later
    pub deferred_capture: bool,
    /// Currency of seller payouts
    pub payout_currency: String,
}

/// What a buyer needs to continue at the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    /// Payment row
    pub payment_id: PaymentId,
    /// Purchase group being paid
    pub purchase_group_id: PurchaseGroupId,
    /// Gateway token
    pub token: String,
    /// Card-entry page
    pub redirect_url: String,
    /// Order reference of this attempt
    pub buy_order: String,
    /// Amount charged
    pub amount: Money,
}

/// How a refund names its payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentReference {
    /// Gateway token
    Token(String),
    /// Order reference
    BuyOrder(String),
}

/// Result of a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    /// The payment after the commit
    pub payment: Payment,
    /// Rows that became `PAID`
    pub settled: Vec<ReservationSettled>,
    /// Payouts scheduled for sellers
    pub payouts: Vec<PayoutId>,
}

/// Payment state machine driver.
pub struct PaymentService {
    storage: Arc<dyn Storage>,
    limits: Arc<LimitsCache>,
    clock: Arc<dyn Clock>,
    gateway: Arc<dyn PaymentGateway>,
    publisher: Arc<dyn SettlementPublisher>,
    settings: PaymentSettings,
    reservation_env: ReservationEnvironment,
    payment_env: PaymentEnvironment,
}

impl PaymentService {
    /// Creates the service
    #[must_use]
    pub fn new(
        storage: Arc<dyn Storage>,
        limits: Arc<LimitsCache>,
        clock: Arc<dyn Clock>,
        gateway: Arc<dyn PaymentGateway>,
        publisher: Arc<dyn SettlementPublisher>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            reservation_env: ReservationEnvironment::new(Arc::clone(&clock)),
            payment_env: PaymentEnvironment::new(Arc::clone(&clock)),
            storage,
            limits,
            clock,
            gateway,
            publisher,
            settings,
        }
    }

    /// Open a gateway transaction for the purchase group of a reservation.
    ///
    /// A group has at most one payment row. A failed, aborted, voided or
    /// still-initiated attempt is overwritten with fresh order and session
    /// references; a settled one fails with `ALREADY_PAID`.
    ///
    /// # Errors
    ///
    /// `RESERVATION_NOT_FOUND`, `ALREADY_PAID`, `CANNOT_BUY_OWN_EVENT`,
    /// `RESERVATION_NOT_PENDING`, `RESERVATION_EXPIRED` or a gateway failure.
    pub async fn create_or_reuse_payment(
        &self,
        buyer: UserId,
        reservation_id: ReservationId,
    ) -> MarketResult<PaymentSession> {
        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;

        let reservation = tx
            .reservation(reservation_id)
            .await?
            .filter(|r| r.buyer_id == buyer)
            .ok_or_else(|| MarketError::not_found(codes::RESERVATION_NOT_FOUND, "Reservation not found"))?;
        let group = reservation.purchase_group_id;
        let rows = tx.group_reservations(group).await?;
        if rows.iter().any(|r| r.status == ReservationStatus::Paid) {
            return Err(already_paid());
        }

        let event = tx
            .event(reservation.event_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::EVENT_NOT_FOUND, "Event not found"))?;
        if event.organizer_id == buyer {
            return Err(own_event());
        }

        let pending: Vec<&Reservation> = rows
            .iter()
            .filter(|r| r.status == ReservationStatus::PendingPayment)
            .collect();
        let Some(lead) = pending.first().copied() else {
            return Err(not_pending());
        };
        if let Some(expired_at) = stale_deadline(&rows, now) {
            self.expire_group(tx.as_mut(), group, now).await?;
            tx.commit().await?;
            return Err(hold_expired(expired_at));
        }

        let amount: Money = pending.iter().map(|r| r.amount).sum();
        let buy_order = buy_order_for(lead.id, now);
        let session_id = session_id_for(group, now);

        let payment = match tx.payment_for_group(group).await? {
            Some(mut payment) => {
                if !payment.status.is_reusable() {
                    return Err(already_paid().with("status", payment.status));
                }
                PaymentReducer.reduce(
                    &mut payment,
                    PaymentAction::Reinitiate {
                        amount,
                        buy_order,
                        session_id,
                    },
                    &self.payment_env,
                )?;
                payment.reservation_id = lead.id;
                tx.update_payment(&payment).await?;
                payment
            }
            None => {
                let payment = Payment {
                    id: PaymentId::new(),
                    reservation_id: lead.id,
                    purchase_group_id: group,
                    amount,
                    status: PaymentStatus::Initiated,
                    token: None,
                    buy_order,
                    session_id,
                    refunded: Money::ZERO,
                    authorization_code: None,
                    response_code: None,
                    card_last4: None,
                    failure_reason: None,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_payment(&payment).await?;
                payment
            }
        };
        tx.commit().await?;
        crate::metrics::record_payment(PaymentStatus::Initiated);

        let created = self
            .gateway
            .create(CreateTransaction {
                buy_order: payment.buy_order.clone(),
                session_id: payment.session_id.clone(),
                amount,
                return_url: self.settings.return_url.clone(),
            })
            .await
            .map_err(gateway_error)?;

        let mut tx = self.storage.begin().await?;
        let mut current = tx
            .payment(payment.id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        if current.buy_order != payment.buy_order || current.status != PaymentStatus::Initiated {
            return Err(MarketError::conflict(
                codes::CONCURRENT_UPDATE,
                "A newer payment attempt replaced this one",
            ));
        }
        current.token = Some(created.token.clone());
        current.updated_at = self.clock.now();
        tx.update_payment(&current).await?;
        tx.commit().await?;

        tracing::info!(
            payment_id = %current.id,
            purchase_group_id = %group,
            buy_order = %current.buy_order,
            amount = %amount,
            "Payment created"
        );
        Ok(PaymentSession {
            payment_id: current.id,
            purchase_group_id: group,
            token: created.token,
            redirect_url: created.redirect_url,
            buy_order: current.buy_order,
            amount,
        })
    }

    /// Confirm a payment after the buyer returns from the gateway.
    ///
    /// On approval every pending row of the group becomes `PAID`, linked
    /// resale tickets are marked sold, payouts are scheduled (unless capture
    /// is deferred) and a settlement fact is published per row.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND`, `CANNOT_BUY_OWN_EVENT`, `RESERVATION_EXPIRED`,
    /// `PAYMENT_DECLINED` or a gateway failure.
    #[allow(clippy::too_many_lines)]
    pub async fn commit(&self, token: &str) -> MarketResult<CommitOutcome> {
        let now = self.clock.now();
        let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;

        let mut tx = self.storage.begin().await?;
        let mut payment = find_by_token(tx.as_mut(), token).await?;
        if payment.status.is_final() {
            tx.commit().await?;
            return Ok(unchanged(payment));
        }

        let group = payment.purchase_group_id;
        let rows = tx.group_reservations(group).await?;
        let lead = rows
            .first()
            .ok_or_else(|| MarketError::internal(anyhow::anyhow!("payment {} has no reservations", payment.id)))?;
        let event = tx
            .event(lead.event_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::EVENT_NOT_FOUND, "Event not found"))?;

        if event.organizer_id == lead.buyer_id {
            let effects = PaymentReducer.reduce(
                &mut payment,
                PaymentAction::Reject {
                    reason: Rejection::OwnEvent,
                },
                &self.payment_env,
            )?;
            tx.update_payment(&payment).await?;
            ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours).await?;
            tx.commit().await?;
            crate::metrics::record_payment(payment.status);
            tracing::warn!(payment_id = %payment.id, "Commit rejected: buyer organizes the event");
            return Err(own_event());
        }

        if let Some(expired_at) = stale_deadline(&rows, now) {
            self.expire_group(tx.as_mut(), group, now).await?;
            tx.commit().await?;
            tracing::info!(payment_id = %payment.id, "Commit rejected: hold expired");
            return Err(hold_expired(expired_at));
        }
        if !rows.iter().any(|r| r.status == ReservationStatus::PendingPayment) {
            return Err(not_pending());
        }
        tx.commit().await?;

        let response = self.gateway.commit(token).await.map_err(gateway_error)?;

        let mut tx = self.storage.begin().await?;
        let mut payment = find_by_token(tx.as_mut(), token).await?;
        if payment.status.is_final() {
            tx.commit().await?;
            return Ok(unchanged(payment));
        }

        let approved = response.approved;
        let action = if approved {
            PaymentAction::GatewayApproved {
                deferred_capture: self.settings.deferred_capture,
                approval: Approval {
                    authorization_code: response.authorization_code,
                    response_code: response.response_code,
                    card_last4: response.card_last4,
                },
            }
        } else {
            PaymentAction::GatewayDeclined {
                response_code: response.response_code,
            }
        };
        let effects = PaymentReducer.reduce(&mut payment, action, &self.payment_env)?;
        tx.update_payment(&payment).await?;

        let rows = tx.group_reservations(group).await?;
        let late = approved && (stale_deadline(&rows, self.clock.now()).is_some() || !any_pending(&rows));
        let changes = if late {
            // Charged after the hold lapsed; the expiry sweep returns the money.
            self.expire_group(tx.as_mut(), group, self.clock.now()).await?;
            GroupChanges::default()
        } else {
            ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours).await?
        };

        let payouts = if payment.status == PaymentStatus::Committed && !late {
            schedule_payouts(tx.as_mut(), group, &self.settings.payout_currency, now).await?
        } else {
            Vec::new()
        };
        tx.commit().await?;
        crate::metrics::record_payment(payment.status);

        if late {
            tracing::warn!(payment_id = %payment.id, "Gateway approved a payment whose hold lapsed");
            return Err(hold_expired(now));
        }
        if !approved {
            crate::metrics::record_reservations("canceled", changes.released);
            tracing::info!(
                payment_id = %payment.id,
                response_code = ?payment.response_code,
                "Payment declined"
            );
            return Err(MarketError::external_terminal(codes::PAYMENT_DECLINED, "The payment was declined")
                .with("responseCode", payment.response_code));
        }

        crate::metrics::record_revenue(payment.amount);
        crate::metrics::record_reservations("settled", changes.settled.len());
        tracing::info!(
            payment_id = %payment.id,
            purchase_group_id = %group,
            status = %payment.status,
            settled = changes.settled.len(),
            payouts = payouts.len(),
            "Payment committed"
        );
        for fact in &changes.settled {
            self.publisher.publish(fact.clone()).await;
        }
        Ok(CommitOutcome {
            payment,
            settled: changes.settled,
            payouts,
        })
    }

    /// The buyer abandoned the gateway form.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND` or `INVALID_STATE_TRANSITION` once settled.
    pub async fn abort(&self, token: &str) -> MarketResult<Payment> {
        let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;
        let mut tx = self.storage.begin().await?;
        let mut payment = find_by_token(tx.as_mut(), token).await?;

        let effects = PaymentReducer.reduce(&mut payment, PaymentAction::Abort, &self.payment_env)?;
        tx.update_payment(&payment).await?;
        let changes =
            ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours).await?;
        tx.commit().await?;

        crate::metrics::record_payment(payment.status);
        crate::metrics::record_reservations("canceled", changes.released);
        tracing::info!(payment_id = %payment.id, released = changes.released, "Payment aborted");
        Ok(payment)
    }

    /// Refund (part of) a settled payment.
    ///
    /// `None` refunds everything left. The payment becomes `REFUNDED` once
    /// nothing is left.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION`,
    /// `INVALID_REFUND_AMOUNT`, `REFUND_EXCEEDS_BALANCE` or a gateway failure.
    pub async fn refund(&self, reference: &PaymentReference, amount: Option<Money>) -> MarketResult<Payment> {
        let mut tx = self.storage.begin().await?;
        let payment = match reference {
            PaymentReference::Token(token) => tx.payment_by_token(token).await?,
            PaymentReference::BuyOrder(buy_order) => tx.payment_by_buy_order(buy_order).await?,
        }
        .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        tx.commit().await?;

        let amount = payment.validate_refund(amount)?;
        let token = gateway_token(&payment)?;
        self.gateway.refund(&token, amount).await.map_err(gateway_error)?;

        let mut tx = self.storage.begin().await?;
        let mut current = tx
            .payment(payment.id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        if let Err(err) = PaymentReducer.reduce(&mut current, PaymentAction::Refunded { amount }, &self.payment_env) {
            tracing::error!(payment_id = %current.id, amount = %amount, error = %err, "Gateway refunded but the payment moved on");
            return Err(err.into());
        }
        tx.update_payment(&current).await?;
        tx.commit().await?;

        crate::metrics::record_refund(amount);
        crate::metrics::record_payment(current.status);
        tracing::info!(
            payment_id = %current.id,
            amount = %amount,
            refunded = %current.refunded,
            status = %current.status,
            "Payment refunded"
        );
        Ok(current)
    }

    /// Capture an authorized payment and schedule its payouts.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION` or a gateway failure.
    pub async fn capture(&self, payment_id: PaymentId) -> MarketResult<Payment> {
        let payment = self.load(payment_id).await?;
        let mut probe = payment.clone();
        PaymentReducer.reduce(&mut probe, PaymentAction::Capture, &self.payment_env)?;
        if payment.status == PaymentStatus::Captured {
            return Ok(payment);
        }

        let token = gateway_token(&payment)?;
        self.gateway
            .capture(&token, payment.amount)
            .await
            .map_err(gateway_error)?;

        let now = self.clock.now();
        let mut tx = self.storage.begin().await?;
        let mut current = tx
            .payment(payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        let from = current.status;
        PaymentReducer.reduce(&mut current, PaymentAction::Capture, &self.payment_env)?;
        tx.update_payment(&current).await?;
        let payouts = if from == PaymentStatus::Authorized {
            schedule_payouts(tx.as_mut(), current.purchase_group_id, &self.settings.payout_currency, now).await?
        } else {
            Vec::new()
        };
        tx.commit().await?;

        crate::metrics::record_payment(current.status);
        tracing::info!(payment_id = %current.id, payouts = payouts.len(), "Payment captured");
        Ok(current)
    }

    /// Cancel a payment before capture.
    ///
    /// An `INITIATED` payment releases its holds; an `AUTHORIZED` one is
    /// reversed at the gateway and its settled rows are revoked.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND`, `INVALID_STATE_TRANSITION` or a gateway failure.
    pub async fn void(&self, payment_id: PaymentId) -> MarketResult<Payment> {
        let payment = self.load(payment_id).await?;
        let mut probe = payment.clone();
        PaymentReducer.reduce(&mut probe, PaymentAction::Void, &self.payment_env)?;
        if payment.status == PaymentStatus::Voided {
            return Ok(payment);
        }

        if payment.status == PaymentStatus::Authorized {
            let token = gateway_token(&payment)?;
            self.gateway
                .refund(&token, payment.amount)
                .await
                .map_err(gateway_error)?;
        }

        let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;
        let mut tx = self.storage.begin().await?;
        let mut current = tx
            .payment(payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        let effects = PaymentReducer.reduce(&mut current, PaymentAction::Void, &self.payment_env)?;
        tx.update_payment(&current).await?;
        let changes =
            ledger::apply_payment_effects(tx.as_mut(), effects, &self.reservation_env, upload_deadline_hours).await?;
        tx.commit().await?;

        crate::metrics::record_payment(current.status);
        tracing::info!(
            payment_id = %current.id,
            released = changes.released,
            revoked = changes.revoked,
            "Payment voided"
        );
        Ok(current)
    }

    /// Ask the gateway about a transaction.
    ///
    /// # Errors
    ///
    /// `PAYMENT_NOT_FOUND` for an unknown token or a gateway failure.
    pub async fn gateway_status(&self, token: &str) -> MarketResult<TransactionStatus> {
        self.gateway.status(token).await.map_err(gateway_error)
    }

    async fn load(&self, payment_id: PaymentId) -> MarketResult<Payment> {
        let mut tx = self.storage.begin().await?;
        let payment = tx
            .payment(payment_id)
            .await?
            .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))?;
        tx.commit().await?;
        Ok(payment)
    }

    /// Expire the stale pending rows of a group and fail its `INITIATED` payment.
    async fn expire_group(&self, tx: &mut dyn StorageTx, group: PurchaseGroupId, now: DateTime<Utc>) -> MarketResult<()> {
        let mut expired = 0;
        for mut row in tx.group_reservations(group).await? {
            if row.is_stale(now) {
                ledger::transition(tx, &mut row, ReservationAction::Expire, &self.reservation_env).await?;
                expired += 1;
            }
        }
        if let Some(mut payment) = tx.payment_for_group(group).await? {
            if payment.status == PaymentStatus::Initiated {
                let effects = PaymentReducer.reduce(
                    &mut payment,
                    PaymentAction::Reject {
                        reason: Rejection::HoldExpired,
                    },
                    &self.payment_env,
                )?;
                tx.update_payment(&payment).await?;
                let upload_deadline_hours = self.limits.snapshot().await.upload_deadline_hours;
                ledger::apply_payment_effects(tx, effects, &self.reservation_env, upload_deadline_hours).await?;
                crate::metrics::record_payment(payment.status);
            }
        }
        crate::metrics::record_reservations("expired", expired);
        Ok(())
    }
}

/// Create one `PENDING` payout per seller of a settled group.
///
/// The seller is the resale ticket's owner, or the organizer for OWN events.
/// The payout is the subtotal, without the platform fee. Sellers without a
/// connected account are skipped.
///
/// # Errors
///
/// Propagates storage failures.
pub async fn schedule_payouts(
    tx: &mut dyn StorageTx,
    group: PurchaseGroupId,
    currency: &str,
    now: DateTime<Utc>,
) -> MarketResult<Vec<PayoutId>> {
    let rows: Vec<Reservation> = tx
        .group_reservations(group)
        .await?
        .into_iter()
        .filter(|r| r.status == ReservationStatus::Paid)
        .collect();
    let Some(lead) = rows.first() else {
        return Ok(Vec::new());
    };
    let event = tx
        .event(lead.event_id)
        .await?
        .ok_or_else(|| MarketError::not_found(codes::EVENT_NOT_FOUND, "Event not found"))?;

    let mut owed: BTreeMap<UserId, Money> = BTreeMap::new();
    for row in &rows {
        let seller = match row.ticket_id {
            Some(ticket_id) => tx.ticket(ticket_id).await?.map_or(event.organizer_id, |t| t.seller_id),
            None => event.organizer_id,
        };
        let entry = owed.entry(seller).or_insert(Money::ZERO);
        *entry = entry.checked_add(row.subtotal).unwrap_or(*entry);
    }

    let mut created = Vec::new();
    for (seller_id, amount) in owed {
        if amount.is_zero() {
            continue;
        }
        let Some(account) = tx.account_for_user(seller_id).await? else {
            tracing::info!(seller_id = %seller_id, purchase_group_id = %group, "Seller has no connected account; no payout");
            continue;
        };
        let payout = Payout {
            id: PayoutId::new(),
            account_id: account.id,
            seller_id,
            purchase_group_id: Some(group),
            amount,
            currency: currency.to_string(),
            status: PayoutStatus::Pending,
            retries: 0,
            idempotency_key: Some(uuid::Uuid::new_v4().to_string()),
            external_id: None,
            external_status: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        tx.insert_payout(&payout).await?;
        tracing::info!(payout_id = %payout.id, seller_id = %seller_id, amount = %amount, "Payout scheduled");
        created.push(payout.id);
    }
    Ok(created)
}

async fn find_by_token(tx: &mut dyn StorageTx, token: &str) -> MarketResult<Payment> {
    tx.payment_by_token(token)
        .await?
        .ok_or_else(|| MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Payment not found"))
}

fn unchanged(payment: Payment) -> CommitOutcome {
    CommitOutcome {
        payment,
        settled: Vec::new(),
        payouts: Vec::new(),
    }
}

fn any_pending(rows: &[Reservation]) -> bool {
    rows.iter().any(|r| r.status == ReservationStatus::PendingPayment)
}

/// Earliest lapsed deadline among the group's pending rows.
fn stale_deadline(rows: &[Reservation], now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    rows.iter()
        .filter(|r| r.is_stale(now))
        .map(|r| r.expires_at.unwrap_or(now))
        .min()
}

fn gateway_token(payment: &Payment) -> MarketResult<String> {
    payment.token.clone().ok_or_else(|| {
        MarketError::state_guard(
            codes::INVALID_STATE_TRANSITION,
            "The payment never reached the gateway",
        )
    })
}

fn gateway_error(err: GatewayError) -> MarketError {
    match err {
        GatewayError::Unavailable(_) | GatewayError::Timeout => {
            MarketError::external_transient(codes::GATEWAY_UNAVAILABLE, "The payment gateway is unavailable")
                .with_source(err)
        }
        GatewayError::UnknownToken(_) => MarketError::not_found(codes::PAYMENT_NOT_FOUND, "Unknown payment token"),
        GatewayError::Rejected(reason) => {
            MarketError::external_terminal(codes::PAYMENT_DECLINED, "The gateway rejected the request")
                .with("reason", reason)
        }
    }
}

fn already_paid() -> MarketError {
    MarketError::conflict(codes::ALREADY_PAID, "The reservation has already been paid")
}

fn own_event() -> MarketError {
    MarketError::validation(codes::CANNOT_BUY_OWN_EVENT, "You cannot buy tickets for your own event")
}

fn not_pending() -> MarketError {
    MarketError::state_guard(
        codes::RESERVATION_NOT_PENDING,
        "The reservation is no longer pending payment",
    )
}

fn hold_expired(expired_at: DateTime<Utc>) -> MarketError {
    MarketError::state_guard(codes::RESERVATION_EXPIRED, "The reservation has expired").with("expiredAt", expired_at)
}
