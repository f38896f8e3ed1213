//! Ticketing marketplace backend: inventory holds, payment orchestration and
//! seller payouts.
//!
//! # Architecture
//!
//! ```text
//!   HTTP (axum)
//!       │
//!       ▼
//! ┌──────────────┐  ┌────────────────┐  ┌────────────────┐
//! │ HoldManager  │  │ PaymentService │  │ PayoutService  │◀── retry / reconcile jobs
//! └──────────────┘  └────────────────┘  └────────────────┘
//!       │   ▲              │    │              │
//!       │   └─ expiry job  │    ▼              ▼
//!       │                  │  PaymentGateway  PayoutProvider (simulated | HTTP)
//!       ▼                  ▼
//!   ┌──────────────────────────────┐
//!   │ Storage (memory | PostgreSQL)│  serializable units of work, CAS on payouts
//!   └──────────────────────────────┘
//! ```
//!
//! State transitions live in the pure reducers of `boxoffice-core`; the
//! services here load rows, run a reducer, persist the result and perform the
//! side effects the reducer asked for.
//!
//! ## Concurrency
//!
//! Two buyers racing for the last unit both run in a serializable unit of
//! work. One commits; the other sees a serialization conflict, which is
//! reported as the domain conflict of its request (`INSUFFICIENT_STOCK`,
//! `SEATS_ALREADY_RESERVED` or `TICKET_ALREADY_SOLD`).
//!
//! ## Payouts
//!
//! One payout per seller is created when a purchase settles. Dispatch carries
//! an idempotency key that is assigned once and never changes, so retries
//! and reconciliations can never pay a seller twice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alerts;
pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod gateway;
pub mod holds;
pub mod identity;
pub mod jobs;
pub mod ledger;
pub mod limits;
pub mod metrics;
pub mod payments;
pub mod payouts;
pub mod server;
pub mod settlement;
pub mod storage;

pub use app::{AppError, Components, TicketingApp};
pub use config::Config;
pub use error::{MarketError, MarketResult};
