//! Catalog records the pipeline reads but never owns.
//!
//! Events, sections and resale tickets are maintained by the CRUD side of the
//! marketplace. The hold manager only reads them (and flips the `sold` /
//! `reservation_id` fields of a resale ticket); connected accounts are read
//! by the payout engine.

use crate::money::Money;
use crate::types::{AccountId, EventId, ReservationId, SeatLabel, SectionId, TicketId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How an event's inventory is tracked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Organizer-run event, sold against a capacity counter.
    Own,
    /// Second-hand event, sold against individually tracked tickets.
    Resale,
}

impl EventKind {
    /// Database representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Own => "OWN",
            Self::Resale => "RESALE",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OWN" => Ok(Self::Own),
            "RESALE" => Ok(Self::Resale),
            other => Err(UnknownVariant::new("EventKind", other)),
        }
    }
}

/// A stored string did not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    /// Enum being parsed
    pub kind: &'static str,
    /// The offending value
    pub value: String,
}

impl UnknownVariant {
    /// Creates the error
    #[must_use]
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// An event listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event ID
    pub id: EventId,
    /// Organizer who owns the listing
    pub organizer_id: UserId,
    /// Inventory model
    pub kind: EventKind,
    /// Total sellable units (OWN events)
    pub capacity: u32,
    /// Unit price
    pub price: Money,
    /// Passed organizer review
    pub approved: bool,
    /// Taken down by an administrator
    pub disabled: bool,
    /// Doors open
    pub starts_at: DateTime<Utc>,
}

impl Event {
    /// Whether the event has started as of `now`
    #[must_use]
    pub fn has_started(&self, now: DateTime<Utc>) -> bool {
        self.starts_at <= now
    }
}

/// Sub-inventory of an OWN event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Section ID
    pub id: SectionId,
    /// Parent event
    pub event_id: EventId,
    /// Display name
    pub name: String,
    /// Units in this section
    pub capacity: u32,
    /// Overrides the event price when set
    pub price: Option<Money>,
    /// Named seats; empty means capacity-only accounting
    pub seats: Vec<SeatLabel>,
}

impl Section {
    /// Whether this section sells named seats
    #[must_use]
    pub fn is_seated(&self) -> bool {
        !self.seats.is_empty()
    }

    /// Effective unit price
    #[must_use]
    pub fn unit_price(&self, event: &Event) -> Money {
        self.price.unwrap_or(event.price)
    }
}

/// One physical resale ticket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket ID
    pub id: TicketId,
    /// Event it admits to
    pub event_id: EventId,
    /// Owner reselling it
    pub seller_id: UserId,
    /// Settled to a buyer
    pub sold: bool,
    /// Active reservation holding it, if any
    pub reservation_id: Option<ReservationId>,
}

impl Ticket {
    /// Unsold and not linked to any reservation
    #[must_use]
    pub const fn is_available(&self) -> bool {
        !self.sold && self.reservation_id.is_none()
    }
}

/// A seller's registered payout destination.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedAccount {
    /// Account ID
    pub id: AccountId,
    /// Seller owning the account
    pub user_id: UserId,
    /// Administrator enabled disbursements
    pub payouts_enabled: bool,
    /// Account holder's legal name
    pub holder_name: Option<String>,
    /// Account holder's tax id (RUT)
    pub holder_tax_id: Option<String>,
    /// Bank name
    pub bank_name: Option<String>,
    /// Checking / savings / ...
    pub account_type: Option<String>,
    /// Account number
    pub account_number: Option<String>,
}

/// Complete banking destination, extracted from a ready account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    /// Bank name
    pub bank_name: String,
    /// Account type
    pub account_type: String,
    /// Account number
    pub account_number: String,
    /// Holder name
    pub holder_name: String,
    /// Holder tax id
    pub holder_tax_id: String,
}

impl ConnectedAccount {
    /// Names of required banking fields that are missing or blank.
    #[must_use]
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let fields = [
            ("holderName", &self.holder_name),
            ("holderTaxId", &self.holder_tax_id),
            ("bankName", &self.bank_name),
            ("accountType", &self.account_type),
            ("accountNumber", &self.account_number),
        ];
        fields
            .iter()
            .filter(|(_, value)| value.as_deref().is_none_or(|v| v.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect()
    }

    /// The payout destination, if the account is enabled and complete.
    #[must_use]
    pub fn destination(&self) -> Option<Destination> {
        if !self.payouts_enabled {
            return None;
        }
        Some(Destination {
            bank_name: non_blank(self.bank_name.as_deref())?,
            account_type: non_blank(self.account_type.as_deref())?,
            account_number: non_blank(self.account_number.as_deref())?,
            holder_name: non_blank(self.holder_name.as_deref())?,
            holder_tax_id: non_blank(self.holder_tax_id.as_deref())?,
        })
    }

    /// Enabled and every banking field present
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.destination().is_some()
    }
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
