//! Transition errors raised by the state-machine reducers.

use crate::money::Money;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a reducer refused an action.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The action is not allowed from the current status.
    #[error("{entity} cannot {action} from {from}")]
    Invalid {
        /// Kind of row (`reservation`, `payment`, `payout`)
        entity: &'static str,
        /// Current status
        from: &'static str,
        /// Attempted action
        action: &'static str,
    },

    /// The hold deadline passed before settlement.
    #[error("hold expired at {expired_at}")]
    HoldExpired {
        /// Deadline that was missed
        expired_at: DateTime<Utc>,
    },

    /// The hold is still live, so it cannot be swept.
    #[error("hold is active until {expires_at}")]
    HoldActive {
        /// Current deadline
        expires_at: DateTime<Utc>,
    },

    /// Refund asks for more than is left.
    #[error("refund of {requested} exceeds refundable balance {refundable}")]
    RefundExceedsBalance {
        /// Amount requested
        requested: Money,
        /// `amount - refunded`
        refundable: Money,
    },

    /// Refund amount of zero.
    #[error("refund amount must be positive")]
    NonPositiveRefund,
}

impl TransitionError {
    /// Shorthand for [`TransitionError::Invalid`]
    #[must_use]
    pub const fn invalid(entity: &'static str, from: &'static str, action: &'static str) -> Self {
        Self::Invalid {
            entity,
            from,
            action,
        }
    }
}
