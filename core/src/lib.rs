//! # Boxoffice Core
//!
//! Functional core of the ticket marketplace.
//!
//! This crate holds everything about the hold/payment/payout pipeline that can be
//! expressed without I/O:
//!
//! - **Identifiers and money**: strongly-typed ids and an integer `Money` value
//! - **Catalog records**: events, sections, resale tickets, connected accounts
//! - **State machines**: reservations, payments and payouts, each driven by a
//!   [`reducer::Reducer`] that validates a transition, mutates the row in place and
//!   returns the effects the imperative shell must carry out
//! - **Pure math**: remaining stock, seat conflicts, fee quotes and payout backoff
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//! - Closed status enums, exhaustively matched
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_core::payment::{PaymentAction, PaymentReducer, PaymentEnvironment};
//! use boxoffice_core::reducer::Reducer;
//!
//! let effects = PaymentReducer.reduce(&mut payment, PaymentAction::Abort, &env)?;
//! for effect in effects {
//!     // release the purchase group, publish facts, ...
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod catalog;
pub mod error;
pub mod inventory;
pub mod money;
pub mod payment;
pub mod payout;
pub mod pricing;
pub mod reservation;
pub mod types;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use error::TransitionError;
pub use money::Money;
pub use smallvec::{smallvec, SmallVec};

/// Reducer module - The core trait for state-machine logic
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Effects>`
///
/// They contain all transition rules and are deterministic and testable.
pub mod reducer {
    use smallvec::SmallVec;

    /// Effects returned by a single reduction.
    ///
    /// Four inline slots cover every transition in this crate without allocating.
    pub type Effects<E> = SmallVec<[E; 4]>;

    /// The Reducer trait - core abstraction for transition rules
    ///
    /// # Type Parameters
    ///
    /// - `State`: The row this reducer operates on
    /// - `Action`: The inputs this reducer accepts
    /// - `Effect`: Descriptions of the side effects the caller must perform
    /// - `Error`: Why an action was refused
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for PayoutReducer {
    ///     type State = Payout;
    ///     type Action = PayoutAction;
    ///     type Effect = PayoutEffect;
    ///     type Error = TransitionError;
    ///     type Environment = PayoutEnvironment;
    ///
    ///     fn reduce(&self, state: &mut Payout, action: PayoutAction, env: &PayoutEnvironment)
    ///         -> Result<Effects<PayoutEffect>, TransitionError>
    ///     {
    ///         // Transition rules here
    ///         Ok(Effects::new())
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The effect descriptions this reducer emits
        type Effect;

        /// The rejection type for invalid actions
        type Error;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place (only when the action is accepted)
        /// 3. Returns effect descriptions to be executed
        ///
        /// An action whose target equals the current state is accepted as a
        /// no-op and returns no effects, so duplicate callbacks are harmless.
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action is not permitted in the
        /// current state. The state is left untouched in that case.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<Effects<Self::Effect>, Self::Error>;
    }
}

/// Environment module - Dependency injection traits
///
/// All time reads go through [`environment::Clock`] so that reducers and
/// services can be driven deterministically in tests.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
