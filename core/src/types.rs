//! Strongly-typed identifiers.
//!
//! Every row in the marketplace is keyed by a UUID. Wrapping each one in its own
//! newtype keeps a `TicketId` from ever being passed where a `ReservationId` is
//! expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for an event
    EventId
);
uuid_id!(
    /// Unique identifier for a section of an OWN event
    SectionId
);
uuid_id!(
    /// Unique identifier for a physical resale ticket
    TicketId
);
uuid_id!(
    /// Unique identifier for a reservation row
    ReservationId
);
uuid_id!(
    /// Correlates the reservation rows created by one multi-section purchase
    PurchaseGroupId
);
uuid_id!(
    /// Unique identifier for a payment row
    PaymentId
);
uuid_id!(
    /// Unique identifier for a payout
    PayoutId
);
uuid_id!(
    /// Unique identifier for a user (buyer, organizer, seller or admin)
    UserId
);
uuid_id!(
    /// Unique identifier for a seller's connected payout account
    AccountId
);

/// Named seat inside a section (e.g. `"A-12"`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeatLabel(String);

impl SeatLabel {
    /// Creates a seat label
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    /// Returns the label as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SeatLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SeatLabel {
    fn from(label: &str) -> Self {
        Self(label.to_string())
    }
}
