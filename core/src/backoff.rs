//! Payout retry backoff.
//!
//! The retry scheduler waits `delay(retries)` after a payout's last update
//! before dispatching it again. The delay indexes an ordered schedule by the
//! number of failed attempts so far, clamping to the last entry once the
//! schedule runs out.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

/// Default schedule in seconds: 1m, 5m, 30m, 3h, 24h.
pub const DEFAULT_SCHEDULE_SECS: [u64; 5] = [60, 300, 1_800, 10_800, 86_400];

/// Delay before attempt `retries + 1`.
///
/// Clamps to the last entry for retry counts past the end of the schedule. An
/// empty schedule means no delay.
#[must_use]
pub fn backoff_delay(retries: u32, schedule: &[Duration]) -> Duration {
    let index = usize::try_from(retries).unwrap_or(usize::MAX);
    schedule
        .get(index)
        .or_else(|| schedule.last())
        .copied()
        .unwrap_or(Duration::ZERO)
}

/// Ordered list of retry delays.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackoffSchedule {
    delays: Vec<Duration>,
}

/// A schedule entry was not a whole number of seconds.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid backoff entry {entry:?}: expected whole seconds")]
pub struct InvalidSchedule {
    /// Offending entry
    pub entry: String,
}

impl BackoffSchedule {
    /// Builds a schedule from explicit delays.
    #[must_use]
    pub const fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// Parses comma-separated seconds (`"60,300,1800"`).
    ///
    /// Blank input yields the default schedule.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidSchedule`] on the first entry that is not an unsigned
    /// integer.
    pub fn parse(raw: &str) -> Result<Self, InvalidSchedule> {
        let entries: Vec<&str> = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect();
        if entries.is_empty() {
            return Ok(Self::default());
        }
        entries
            .into_iter()
            .map(|entry| {
                entry
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| InvalidSchedule {
                        entry: entry.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::new)
    }

    /// Delays in order.
    #[must_use]
    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// See [`backoff_delay`].
    #[must_use]
    pub fn delay(&self, retries: u32) -> Duration {
        backoff_delay(retries, &self.delays)
    }

    /// Whether a payout last touched at `last_update` may be retried at `now`.
    #[must_use]
    pub fn is_due(&self, retries: u32, last_update: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let wait = ChronoDuration::from_std(self.delay(retries)).unwrap_or(ChronoDuration::MAX);
        now.signed_duration_since(last_update) >= wait
    }
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE_SECS.iter().copied().map(Duration::from_secs).collect())
    }
}
