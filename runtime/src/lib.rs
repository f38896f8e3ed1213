//! # Boxoffice Runtime
//!
//! Imperative-shell helpers shared by the marketplace services.
//!
//! ## Components
//!
//! - **Retry**: [`retry::RetryPolicy`] (exponential backoff with jitter) and
//!   [`retry::retry_with_hint`], which honors server-supplied `Retry-After`
//!   hints and stops on terminal failures
//! - **Jobs**: [`job::PeriodicJob`] and [`job::JobRunner`], an interval loop with
//!   random startup jitter, an overlap guard and a shutdown signal
//!
//! ## Example
//!
//! ```ignore
//! use boxoffice_runtime::{JobRunner, PeriodicJob};
//!
//! let handle = JobRunner::new(reconcile_job, Duration::from_secs(600))
//!     .with_startup_jitter(Duration::from_secs(15))
//!     .spawn(shutdown_rx);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Retry logic with exponential backoff
pub mod retry;

/// Periodic background jobs with an overlap guard
pub mod job;

pub use job::{JobRunner, PeriodicJob, RunOutcome};
pub use retry::{Attempt, RetryPolicy, retry_with_hint};
