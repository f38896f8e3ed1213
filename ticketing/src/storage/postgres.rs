//! `PostgreSQL` storage.
//!
//! Every unit of work runs at `SERIALIZABLE`; SQLSTATE `40001`
//! (serialization failure) and `40P01` (deadlock) surface as
//! [`StorageError::SerializationConflict`].

use super::{Storage, StorageError, StorageResult, StorageTx};
use crate::config::PostgresConfig;
use async_trait::async_trait;
use boxoffice_core::catalog::{ConnectedAccount, Event, Section, Ticket, UnknownVariant};
use boxoffice_core::money::Money;
use boxoffice_core::payment::Payment;
use boxoffice_core::payout::Payout;
use boxoffice_core::reservation::Reservation;
use boxoffice_core::types::{
    AccountId, EventId, PaymentId, PayoutId, PurchaseGroupId, ReservationId, SeatLabel, SectionId, TicketId,
    UserId,
};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

const RESERVATION_COLUMNS: &str = "id, event_id, section_id, buyer_id, quantity, subtotal, fee, amount, status, \
     expires_at, seat_assignment, purchase_group_id, ticket_id, paid_at, upload_deadline, cancel_reason, \
     created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, reservation_id, purchase_group_id, amount, status, token, buy_order, \
     session_id, refunded, authorization_code, response_code, card_last4, failure_reason, created_at, updated_at";

const PAYOUT_COLUMNS: &str = "id, account_id, seller_id, purchase_group_id, amount, currency, status, retries, \
     idempotency_key, external_id, external_status, failure_code, failure_message, paid_at, version, \
     created_at, updated_at";

fn db_error(err: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &err {
        // A unique violation under SERIALIZABLE is a lost race as well.
        if matches!(db.code().as_deref(), Some("40001" | "40P01" | "23505")) {
            return StorageError::SerializationConflict;
        }
    }
    StorageError::Database(err)
}

fn money(row: &PgRow, column: &str) -> StorageResult<Money> {
    let raw: i64 = row.try_get(column).map_err(db_error)?;
    u64::try_from(raw)
        .map(Money::new)
        .map_err(|_| StorageError::Corrupt(format!("{column} is negative: {raw}")))
}

fn count(row: &PgRow, column: &str) -> StorageResult<u32> {
    let raw: i32 = row.try_get(column).map_err(db_error)?;
    u32::try_from(raw).map_err(|_| StorageError::Corrupt(format!("{column} is negative: {raw}")))
}

fn parsed<T: FromStr<Err = UnknownVariant>>(row: &PgRow, column: &str) -> StorageResult<T> {
    let raw: String = row.try_get(column).map_err(db_error)?;
    raw.parse().map_err(|e: UnknownVariant| StorageError::Corrupt(e.to_string()))
}

fn opt_parsed<T: FromStr<Err = UnknownVariant>>(row: &PgRow, column: &str) -> StorageResult<Option<T>> {
    let raw: Option<String> = row.try_get(column).map_err(db_error)?;
    raw.map(|s| s.parse().map_err(|e: UnknownVariant| StorageError::Corrupt(e.to_string())))
        .transpose()
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> StorageResult<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(db_error)
}

fn db_money(value: Money) -> StorageResult<i64> {
    i64::try_from(value.units()).map_err(|_| StorageError::Corrupt(format!("amount out of range: {value}")))
}

fn db_count(value: u32) -> StorageResult<i32> {
    i32::try_from(value).map_err(|_| StorageError::Corrupt(format!("count out of range: {value}")))
}

fn labels(values: Vec<String>) -> Vec<SeatLabel> {
    values.into_iter().map(SeatLabel::new).collect()
}

fn label_strings(values: &[SeatLabel]) -> Vec<String> {
    values.iter().map(|s| s.as_str().to_string()).collect()
}

fn row_to_event(row: &PgRow) -> StorageResult<Event> {
    Ok(Event {
        id: EventId::from_uuid(get(row, "id")?),
        organizer_id: UserId::from_uuid(get(row, "organizer_id")?),
        kind: parsed(row, "kind")?,
        capacity: count(row, "capacity")?,
        price: money(row, "price")?,
        approved: get(row, "approved")?,
        disabled: get(row, "disabled")?,
        starts_at: get(row, "starts_at")?,
    })
}

fn row_to_section(row: &PgRow) -> StorageResult<Section> {
    let price: Option<i64> = get(row, "price")?;
    Ok(Section {
        id: SectionId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        name: get(row, "name")?,
        capacity: count(row, "capacity")?,
        price: price
            .map(|p| u64::try_from(p).map(Money::new))
            .transpose()
            .map_err(|_| StorageError::Corrupt("section price is negative".to_string()))?,
        seats: labels(get(row, "seats")?),
    })
}

fn row_to_ticket(row: &PgRow) -> StorageResult<Ticket> {
    let reservation_id: Option<Uuid> = get(row, "reservation_id")?;
    Ok(Ticket {
        id: TicketId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        seller_id: UserId::from_uuid(get(row, "seller_id")?),
        sold: get(row, "sold")?,
        reservation_id: reservation_id.map(ReservationId::from_uuid),
    })
}

fn row_to_reservation(row: &PgRow) -> StorageResult<Reservation> {
    let section_id: Option<Uuid> = get(row, "section_id")?;
    let ticket_id: Option<Uuid> = get(row, "ticket_id")?;
    Ok(Reservation {
        id: ReservationId::from_uuid(get(row, "id")?),
        event_id: EventId::from_uuid(get(row, "event_id")?),
        section_id: section_id.map(SectionId::from_uuid),
        buyer_id: UserId::from_uuid(get(row, "buyer_id")?),
        quantity: count(row, "quantity")?,
        subtotal: money(row, "subtotal")?,
        fee: money(row, "fee")?,
        amount: money(row, "amount")?,
        status: parsed(row, "status")?,
        expires_at: get(row, "expires_at")?,
        seat_assignment: labels(get(row, "seat_assignment")?),
        purchase_group_id: PurchaseGroupId::from_uuid(get(row, "purchase_group_id")?),
        ticket_id: ticket_id.map(TicketId::from_uuid),
        paid_at: get(row, "paid_at")?,
        upload_deadline: get(row, "upload_deadline")?,
        cancel_reason: opt_parsed(row, "cancel_reason")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn row_to_payment(row: &PgRow) -> StorageResult<Payment> {
    Ok(Payment {
        id: PaymentId::from_uuid(get(row, "id")?),
        reservation_id: ReservationId::from_uuid(get(row, "reservation_id")?),
        purchase_group_id: PurchaseGroupId::from_uuid(get(row, "purchase_group_id")?),
        amount: money(row, "amount")?,
        status: parsed(row, "status")?,
        token: get(row, "token")?,
        buy_order: get(row, "buy_order")?,
        session_id: get(row, "session_id")?,
        refunded: money(row, "refunded")?,
        authorization_code: get(row, "authorization_code")?,
        response_code: get(row, "response_code")?,
        card_last4: get(row, "card_last4")?,
        failure_reason: get(row, "failure_reason")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn row_to_account(row: &PgRow) -> StorageResult<ConnectedAccount> {
    Ok(ConnectedAccount {
        id: AccountId::from_uuid(get(row, "id")?),
        user_id: UserId::from_uuid(get(row, "user_id")?),
        payouts_enabled: get(row, "payouts_enabled")?,
        holder_name: get(row, "holder_name")?,
        holder_tax_id: get(row, "holder_tax_id")?,
        bank_name: get(row, "bank_name")?,
        account_type: get(row, "account_type")?,
        account_number: get(row, "account_number")?,
    })
}

fn row_to_payout(row: &PgRow) -> StorageResult<Payout> {
    let group: Option<Uuid> = get(row, "purchase_group_id")?;
    Ok(Payout {
        id: PayoutId::from_uuid(get(row, "id")?),
        account_id: AccountId::from_uuid(get(row, "account_id")?),
        seller_id: UserId::from_uuid(get(row, "seller_id")?),
        purchase_group_id: group.map(PurchaseGroupId::from_uuid),
        amount: money(row, "amount")?,
        currency: get(row, "currency")?,
        status: parsed(row, "status")?,
        retries: count(row, "retries")?,
        idempotency_key: get(row, "idempotency_key")?,
        external_id: get(row, "external_id")?,
        external_status: get(row, "external_status")?,
        failure_code: get(row, "failure_code")?,
        failure_message: get(row, "failure_message")?,
        paid_at: get(row, "paid_at")?,
        version: get(row, "version")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

fn limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// [`Storage`] on a `PgPool`.
#[derive(Clone)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Connect a pool.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if no connection can be made.
    pub async fn connect(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout))
            .connect(&config.url)
            .await
            .map_err(StorageError::Database)?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if a migration fails.
    pub async fn migrate(&self) -> StorageResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Database(sqlx::Error::Migrate(Box::new(e))))
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn reservations(&mut self, filter: &str, bind: Uuid) -> StorageResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations WHERE {filter} \
             AND status IN ('PENDING_PAYMENT', 'PAID') ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(bind)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn payment_where(&mut self, filter: &str, bind: &str) -> StorageResult<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {filter}");
        let row = sqlx::query(&sql)
            .bind(bind)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn write_reservation(&mut self, r: &Reservation, insert: bool) -> StorageResult<()> {
        let sql = if insert {
            format!(
                "INSERT INTO reservations ({RESERVATION_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
            )
        } else {
            "UPDATE reservations SET event_id = $2, section_id = $3, buyer_id = $4, quantity = $5, \
             subtotal = $6, fee = $7, amount = $8, status = $9, expires_at = $10, seat_assignment = $11, \
             purchase_group_id = $12, ticket_id = $13, paid_at = $14, upload_deadline = $15, \
             cancel_reason = $16, created_at = $17, updated_at = $18 WHERE id = $1"
                .to_string()
        };
        let result = sqlx::query(&sql)
            .bind(*r.id.as_uuid())
            .bind(*r.event_id.as_uuid())
            .bind(r.section_id.map(|s| *s.as_uuid()))
            .bind(*r.buyer_id.as_uuid())
            .bind(db_count(r.quantity)?)
            .bind(db_money(r.subtotal)?)
            .bind(db_money(r.fee)?)
            .bind(db_money(r.amount)?)
            .bind(r.status.as_str())
            .bind(r.expires_at)
            .bind(label_strings(&r.seat_assignment))
            .bind(*r.purchase_group_id.as_uuid())
            .bind(r.ticket_id.map(|t| *t.as_uuid()))
            .bind(r.paid_at)
            .bind(r.upload_deadline)
            .bind(r.cancel_reason.map(|c| c.as_str()))
            .bind(r.created_at)
            .bind(r.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Missing {
                entity: "reservation",
                id: r.id.to_string(),
            });
        }
        Ok(())
    }

    async fn write_payment(&mut self, p: &Payment, insert: bool) -> StorageResult<()> {
        let sql = if insert {
            format!(
                "INSERT INTO payments ({PAYMENT_COLUMNS}) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)"
            )
        } else {
            "UPDATE payments SET reservation_id = $2, purchase_group_id = $3, amount = $4, status = $5, \
             token = $6, buy_order = $7, session_id = $8, refunded = $9, authorization_code = $10, \
             response_code = $11, card_last4 = $12, failure_reason = $13, created_at = $14, updated_at = $15 \
             WHERE id = $1"
                .to_string()
        };
        let result = sqlx::query(&sql)
            .bind(*p.id.as_uuid())
            .bind(*p.reservation_id.as_uuid())
            .bind(*p.purchase_group_id.as_uuid())
            .bind(db_money(p.amount)?)
            .bind(p.status.as_str())
            .bind(p.token.as_deref())
            .bind(&p.buy_order)
            .bind(&p.session_id)
            .bind(db_money(p.refunded)?)
            .bind(p.authorization_code.as_deref())
            .bind(p.response_code)
            .bind(p.card_last4.as_deref())
            .bind(p.failure_reason.as_deref())
            .bind(p.created_at)
            .bind(p.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Missing {
                entity: "payment",
                id: p.id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageTx for PgTx {
    async fn event(&mut self, id: EventId) -> StorageResult<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, organizer_id, kind, capacity, price, approved, disabled, starts_at FROM events WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        row.as_ref().map(row_to_event).transpose()
    }

    async fn section(&mut self, id: SectionId) -> StorageResult<Option<Section>> {
        let row = sqlx::query("SELECT id, event_id, name, capacity, price, seats FROM sections WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_section).transpose()
    }

    async fn ticket(&mut self, id: TicketId) -> StorageResult<Option<Ticket>> {
        let row = sqlx::query("SELECT id, event_id, seller_id, sold, reservation_id FROM tickets WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_ticket).transpose()
    }

    async fn event_tickets(&mut self, event_id: EventId) -> StorageResult<Vec<Ticket>> {
        let rows = sqlx::query("SELECT id, event_id, seller_id, sold, reservation_id FROM tickets WHERE event_id = $1")
            .bind(*event_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_ticket).collect()
    }

    async fn event_reservations(&mut self, event_id: EventId) -> StorageResult<Vec<Reservation>> {
        self.reservations("event_id = $1", *event_id.as_uuid()).await
    }

    async fn section_reservations(&mut self, section_id: SectionId) -> StorageResult<Vec<Reservation>> {
        self.reservations("section_id = $1", *section_id.as_uuid()).await
    }

    async fn reservation(&mut self, id: ReservationId) -> StorageResult<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_reservation).transpose()
    }

    async fn group_reservations(&mut self, group: PurchaseGroupId) -> StorageResult<Vec<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE purchase_group_id = $1 ORDER BY created_at");
        let rows = sqlx::query(&sql)
            .bind(*group.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn open_holds(
        &mut self,
        buyer_id: UserId,
        event_id: EventId,
        now: DateTime<Utc>,
    ) -> StorageResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE buyer_id = $1 AND event_id = $2 AND status = 'PENDING_PAYMENT' AND expires_at > $3 \
             ORDER BY created_at"
        );
        let rows = sqlx::query(&sql)
            .bind(*buyer_id.as_uuid())
            .bind(*event_id.as_uuid())
            .bind(now)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn stale_reservations(&mut self, now: DateTime<Utc>, max: usize) -> StorageResult<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'PENDING_PAYMENT' AND expires_at <= $1 ORDER BY expires_at LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit(max))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_reservation).collect()
    }

    async fn insert_reservation(&mut self, reservation: &Reservation) -> StorageResult<()> {
        self.write_reservation(reservation, true).await
    }

    async fn update_reservation(&mut self, reservation: &Reservation) -> StorageResult<()> {
        self.write_reservation(reservation, false).await
    }

    async fn update_ticket(&mut self, ticket: &Ticket) -> StorageResult<()> {
        let result = sqlx::query("UPDATE tickets SET sold = $2, reservation_id = $3 WHERE id = $1")
            .bind(*ticket.id.as_uuid())
            .bind(ticket.sold)
            .bind(ticket.reservation_id.map(|r| *r.as_uuid()))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StorageError::Missing {
                entity: "ticket",
                id: ticket.id.to_string(),
            });
        }
        Ok(())
    }

    async fn payment(&mut self, id: PaymentId) -> StorageResult<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn payment_for_group(&mut self, group: PurchaseGroupId) -> StorageResult<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE purchase_group_id = $1");
        let row = sqlx::query(&sql)
            .bind(*group.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_payment).transpose()
    }

    async fn payment_by_token(&mut self, token: &str) -> StorageResult<Option<Payment>> {
        self.payment_where("token = $1", token).await
    }

    async fn payment_by_buy_order(&mut self, buy_order: &str) -> StorageResult<Option<Payment>> {
        self.payment_where("buy_order = $1", buy_order).await
    }

    async fn insert_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        self.write_payment(payment, true).await
    }

    async fn update_payment(&mut self, payment: &Payment) -> StorageResult<()> {
        self.write_payment(payment, false).await
    }

    async fn orphaned_payments(&mut self, max: usize) -> StorageResult<Vec<Payment>> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments p \
             WHERE p.status IN ('AUTHORIZED', 'CAPTURED', 'COMMITTED') AND p.refunded < p.amount \
             AND NOT EXISTS (SELECT 1 FROM reservations r \
                             WHERE r.purchase_group_id = p.purchase_group_id AND r.status = 'PAID') \
             ORDER BY p.updated_at LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit(max))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_payment).collect()
    }

    async fn account_for_user(&mut self, user_id: UserId) -> StorageResult<Option<ConnectedAccount>> {
        let row = sqlx::query(
            "SELECT id, user_id, payouts_enabled, holder_name, holder_tax_id, bank_name, account_type, \
             account_number FROM connected_accounts WHERE user_id = $1",
        )
        .bind(*user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(db_error)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn insert_payout(&mut self, p: &Payout) -> StorageResult<()> {
        let sql = format!(
            "INSERT INTO payouts ({PAYOUT_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&sql)
            .bind(*p.id.as_uuid())
            .bind(*p.account_id.as_uuid())
            .bind(*p.seller_id.as_uuid())
            .bind(p.purchase_group_id.map(|g| *g.as_uuid()))
            .bind(db_money(p.amount)?)
            .bind(&p.currency)
            .bind(p.status.as_str())
            .bind(db_count(p.retries)?)
            .bind(p.idempotency_key.as_deref())
            .bind(p.external_id.as_deref())
            .bind(p.external_status.as_deref())
            .bind(p.failure_code.as_deref())
            .bind(p.failure_message.as_deref())
            .bind(p.paid_at)
            .bind(p.version)
            .bind(p.created_at)
            .bind(p.updated_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StorageResult<()> {
        self.tx.commit().await.map_err(db_error)
    }
}

#[async_trait]
impl Storage for PgStorage {
    async fn begin(&self) -> StorageResult<Box<dyn StorageTx>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn account(&self, id: AccountId) -> StorageResult<Option<ConnectedAccount>> {
        let row = sqlx::query(
            "SELECT id, user_id, payouts_enabled, holder_name, holder_tax_id, bank_name, account_type, \
             account_number FROM connected_accounts WHERE id = $1",
        )
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(row_to_account).transpose()
    }

    async fn payout(&self, id: PayoutId) -> StorageResult<Option<Payout>> {
        let sql = format!("SELECT {PAYOUT_COLUMNS} FROM payouts WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_payout).transpose()
    }

    async fn payout_by_external_id(&self, external_id: &str) -> StorageResult<Option<Payout>> {
        let sql = format!("SELECT {PAYOUT_COLUMNS} FROM payouts WHERE external_id = $1");
        let row = sqlx::query(&sql)
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_payout).transpose()
    }

    async fn dispatchable_payouts(&self, max_retries: u32, max: usize) -> StorageResult<Vec<Payout>> {
        let sql = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts \
             WHERE status IN ('PENDING', 'FAILED') AND retries < $1 ORDER BY updated_at LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(max_retries))
            .bind(limit(max))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_payout).collect()
    }

    async fn in_flight_payouts(&self, max: usize) -> StorageResult<Vec<Payout>> {
        let sql = format!(
            "SELECT {PAYOUT_COLUMNS} FROM payouts \
             WHERE status IN ('SCHEDULED', 'IN_TRANSIT') AND external_id IS NOT NULL \
             ORDER BY updated_at LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit(max))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(row_to_payout).collect()
    }

    async fn update_payout(&self, p: &Payout, expected_version: i64) -> StorageResult<bool> {
        let result = sqlx::query(
            "UPDATE payouts SET status = $3, retries = $4, idempotency_key = $5, external_id = $6, \
             external_status = $7, failure_code = $8, failure_message = $9, paid_at = $10, \
             updated_at = $11, version = $2 + 1 \
             WHERE id = $1 AND version = $2",
        )
        .bind(*p.id.as_uuid())
        .bind(expected_version)
        .bind(p.status.as_str())
        .bind(db_count(p.retries)?)
        .bind(p.idempotency_key.as_deref())
        .bind(p.external_id.as_deref())
        .bind(p.external_status.as_deref())
        .bind(p.failure_code.as_deref())
        .bind(p.failure_message.as_deref())
        .bind(p.paid_at)
        .bind(p.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn business_settings(&self) -> StorageResult<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM business_settings")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter()
            .map(|row| Ok((get::<String>(row, "key")?, get::<String>(row, "value")?)))
            .collect()
    }
}
