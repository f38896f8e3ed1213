//! Shared fixtures for the integration tests.
//!
//! [`Harness`] wires a [`TicketingApp`] over in-memory storage, a manual
//! clock, the mock gateway and recording sinks, and seeds catalog rows.

#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use boxoffice_core::catalog::{ConnectedAccount, Event, EventKind, Section, Ticket};
use boxoffice_core::environment::Clock;
use boxoffice_core::money::Money;
use boxoffice_core::payout::{Payout, PayoutStatus};
use boxoffice_core::types::{AccountId, EventId, PayoutId, SeatLabel, SectionId, TicketId, UserId};
use boxoffice_testing::{ManualClock, test_clock};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use ticketing::alerts::RecordingAlertSink;
use ticketing::gateway::MockPaymentGateway;
use ticketing::holds::{Hold, HoldItem, HoldRequest};
use ticketing::payouts::{PayoutProvider, SimulatedProvider};
use ticketing::server::AppState;
use ticketing::settlement::RecordingPublisher;
use ticketing::storage::MemoryStorage;
use ticketing::{Components, Config, TicketingApp};

/// Secret the simulated provider verifies webhooks with
pub const WEBHOOK_SECRET: &str = "whsec_test";

/// Configuration with defaults plus `overrides`.
pub fn config(overrides: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = overrides
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// A fully wired app with handles on every double.
pub struct Harness {
    pub app: TicketingApp,
    pub state: AppState,
    pub storage: MemoryStorage,
    pub clock: Arc<ManualClock>,
    pub gateway: MockPaymentGateway,
    pub alerts: Arc<RecordingAlertSink>,
    pub publisher: Arc<RecordingPublisher>,
}

impl Harness {
    /// Immediate capture, simulated payouts
    pub fn new() -> Self {
        Self::build(config(&[]), |clock| {
            Arc::new(SimulatedProvider::new(clock, Some(WEBHOOK_SECRET.to_string())))
        })
    }

    /// Custom configuration and payout provider
    pub fn build(config: Config, provider: impl FnOnce(Arc<dyn Clock>) -> Arc<dyn PayoutProvider>) -> Self {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(test_clock().now()));
        let gateway = MockPaymentGateway::new();
        let alerts = Arc::new(RecordingAlertSink::new());
        let publisher = Arc::new(RecordingPublisher::new());

        let app = TicketingApp::assemble(
            config,
            Components {
                storage: Arc::new(storage.clone()),
                clock: clock.clone(),
                gateway: Arc::new(gateway.clone()),
                provider: provider(clock.clone()),
                alerts: alerts.clone(),
                publisher: publisher.clone(),
            },
        );
        let state = app.state();
        Self {
            app,
            state,
            storage,
            clock,
            gateway,
            alerts,
            publisher,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Approved OWN event starting in 30 days
    pub fn own_event(&self, organizer: UserId, capacity: u32, price: u64) -> Event {
        let event = Event {
            id: EventId::new(),
            organizer_id: organizer,
            kind: EventKind::Own,
            capacity,
            price: Money::new(price),
            approved: true,
            disabled: false,
            starts_at: self.now() + Duration::days(30),
        };
        self.storage.put_event(event.clone());
        event
    }

    /// Approved RESALE event starting in 30 days
    pub fn resale_event(&self, organizer: UserId, price: u64) -> Event {
        let event = Event {
            kind: EventKind::Resale,
            ..self.own_event(organizer, 100, price)
        };
        self.storage.put_event(event.clone());
        event
    }

    /// Seated section with the given labels
    pub fn seated_section(&self, event: &Event, seats: &[&str]) -> Section {
        let section = Section {
            id: SectionId::new(),
            event_id: event.id,
            name: "Platea".to_string(),
            capacity: u32::try_from(seats.len()).unwrap(),
            price: None,
            seats: seats.iter().map(|s| SeatLabel::new(*s)).collect(),
        };
        self.storage.put_section(section.clone());
        section
    }

    /// Unsold resale ticket
    pub fn ticket(&self, event: &Event, seller: UserId) -> Ticket {
        let ticket = Ticket {
            id: TicketId::new(),
            event_id: event.id,
            seller_id: seller,
            sold: false,
            reservation_id: None,
        };
        self.storage.put_ticket(ticket.clone());
        ticket
    }

    /// Connected account with every banking field filled in
    pub fn ready_account(&self, user: UserId) -> ConnectedAccount {
        let account = ConnectedAccount {
            id: AccountId::new(),
            user_id: user,
            payouts_enabled: true,
            holder_name: Some("Ana Pérez".to_string()),
            holder_tax_id: Some("11.111.111-1".to_string()),
            bank_name: Some("Banco Estado".to_string()),
            account_type: Some("checking".to_string()),
            account_number: Some("000123456".to_string()),
        };
        self.storage.put_account(account.clone());
        account
    }

    /// `PENDING` payout for `account`, never attempted
    pub fn pending_payout(&self, account: &ConnectedAccount, amount: u64) -> Payout {
        let payout = Payout {
            id: PayoutId::new(),
            account_id: account.id,
            seller_id: account.user_id,
            purchase_group_id: None,
            amount: Money::new(amount),
            currency: "CLP".to_string(),
            status: PayoutStatus::Pending,
            retries: 0,
            idempotency_key: None,
            external_id: None,
            external_status: None,
            failure_code: None,
            failure_message: None,
            paid_at: None,
            version: 0,
            created_at: self.now(),
            updated_at: self.now(),
        };
        self.storage.put_payout(payout.clone());
        payout
    }

    pub fn payout(&self, id: PayoutId) -> Payout {
        self.storage.payouts().into_iter().find(|p| p.id == id).unwrap()
    }

    /// Hold `quantity` general-admission units
    pub async fn hold(&self, buyer: UserId, event: &Event, quantity: u32) -> Hold {
        self.state
            .holds
            .hold(buyer, general_admission(event.id, quantity))
            .await
            .unwrap()
    }

    /// Hold, pay and commit; returns the gateway token
    pub async fn buy(&self, buyer: UserId, event: &Event, quantity: u32) -> String {
        let hold = self.hold(buyer, event, quantity).await;
        let session = self
            .state
            .payments
            .create_or_reuse_payment(buyer, hold.reservations[0].id)
            .await
            .unwrap();
        self.state.payments.commit(&session.token).await.unwrap();
        session.token
    }
}

pub fn general_admission(event_id: EventId, quantity: u32) -> HoldRequest {
    HoldRequest {
        event_id,
        items: vec![HoldItem {
            quantity,
            ..HoldItem::default()
        }],
    }
}
