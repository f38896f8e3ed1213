//! Runtime-tunable business limits.
//!
//! Defaults come from the environment; an operator can override individual
//! values through the `business_settings` table without a restart. The Hold
//! Manager and Payment Service read an immutable [`BusinessLimits`] snapshot
//! from a shared [`LimitsCache`], which refreshes it on a TTL.

use async_trait::async_trait;
use boxoffice_core::catalog::EventKind;
use boxoffice_core::environment::Clock;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Setting keys understood by [`BusinessLimits::with_overrides`].
pub mod keys {
    /// Hold duration in minutes
    pub const HOLD_MINUTES: &str = "hold_minutes";
    /// Maximum units per purchase, OWN events
    pub const MAX_PER_PURCHASE_OWN: &str = "max_per_purchase_own";
    /// Maximum units per purchase, RESALE events
    pub const MAX_PER_PURCHASE_RESALE: &str = "max_per_purchase_resale";
    /// Platform fee in basis points
    pub const PLATFORM_FEE_BPS: &str = "platform_fee_bps";
    /// Seller upload deadline in hours
    pub const UPLOAD_DEADLINE_HOURS: &str = "upload_deadline_hours";
}

/// Snapshot of the tunables the hold and payment paths consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessLimits {
    /// Minutes a hold lasts
    pub hold_minutes: u32,
    /// Max units per purchase for OWN events
    pub max_per_purchase_own: u32,
    /// Max units per purchase for RESALE events
    pub max_per_purchase_resale: u32,
    /// Platform fee in basis points
    pub platform_fee_bps: u32,
    /// Hours a seller has to upload the ticket after settlement
    pub upload_deadline_hours: u32,
}

impl Default for BusinessLimits {
    fn default() -> Self {
        Self {
            hold_minutes: 15,
            max_per_purchase_own: 10,
            max_per_purchase_resale: 1,
            platform_fee_bps: 0,
            upload_deadline_hours: 48,
        }
    }
}

impl BusinessLimits {
    /// Per-purchase maximum for an event kind
    #[must_use]
    pub const fn max_per_purchase(&self, kind: EventKind) -> u32 {
        match kind {
            EventKind::Own => self.max_per_purchase_own,
            EventKind::Resale => self.max_per_purchase_resale,
        }
    }

    /// Hold length as a duration
    #[must_use]
    pub fn hold_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.hold_minutes))
    }

    /// Apply stored overrides on top of `self`.
    ///
    /// Unknown keys and unparsable values are ignored and logged.
    #[must_use]
    pub fn with_overrides(mut self, overrides: &HashMap<String, String>) -> Self {
        for (key, raw) in overrides {
            let slot = match key.as_str() {
                keys::HOLD_MINUTES => &mut self.hold_minutes,
                keys::MAX_PER_PURCHASE_OWN => &mut self.max_per_purchase_own,
                keys::MAX_PER_PURCHASE_RESALE => &mut self.max_per_purchase_resale,
                keys::PLATFORM_FEE_BPS => &mut self.platform_fee_bps,
                keys::UPLOAD_DEADLINE_HOURS => &mut self.upload_deadline_hours,
                _ => {
                    tracing::debug!(key = %key, "Ignoring unknown business setting");
                    continue;
                }
            };
            match raw.trim().parse::<u32>() {
                Ok(value) => *slot = value,
                Err(_) => tracing::warn!(key = %key, value = %raw, "Ignoring unparsable business setting"),
            }
        }
        self
    }
}

/// Supplies stored overrides.
#[async_trait]
pub trait LimitsSource: Send + Sync {
    /// Current key/value overrides.
    ///
    /// # Errors
    ///
    /// Any error keeps the previous snapshot in place.
    async fn limit_overrides(&self) -> Result<HashMap<String, String>, anyhow::Error>;
}

/// When to reload overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Age after which a snapshot is reloaded
    pub ttl: Duration,
}

impl RefreshPolicy {
    /// Reload every `ttl`
    #[must_use]
    pub const fn every(ttl: Duration) -> Self {
        Self { ttl }
    }
}

struct Cached {
    limits: BusinessLimits,
    loaded_at: Option<DateTime<Utc>>,
}

/// TTL cache of [`BusinessLimits`] over a [`LimitsSource`].
pub struct LimitsCache {
    defaults: BusinessLimits,
    source: Option<Arc<dyn LimitsSource>>,
    policy: RefreshPolicy,
    clock: Arc<dyn Clock>,
    cached: RwLock<Cached>,
}

impl LimitsCache {
    /// Cache that refreshes from `source` every `policy.ttl`.
    #[must_use]
    pub fn new(
        defaults: BusinessLimits,
        source: Arc<dyn LimitsSource>,
        policy: RefreshPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            defaults,
            source: Some(source),
            policy,
            clock,
            cached: RwLock::new(Cached {
                limits: defaults,
                loaded_at: None,
            }),
        }
    }

    /// Cache that always returns `limits`.
    #[must_use]
    pub fn fixed(limits: BusinessLimits) -> Self {
        Self {
            defaults: limits,
            source: None,
            policy: RefreshPolicy::every(Duration::MAX),
            clock: Arc::new(boxoffice_core::environment::SystemClock),
            cached: RwLock::new(Cached {
                limits,
                loaded_at: None,
            }),
        }
    }

    /// Current limits, reloading first if the snapshot is stale.
    pub async fn snapshot(&self) -> BusinessLimits {
        if self.source.is_none() {
            return self.cached.read().await.limits;
        }
        let now = self.clock.now();
        {
            let cached = self.cached.read().await;
            if cached.loaded_at.is_some_and(|at| now.signed_duration_since(at) < self.policy.ttl) {
                return cached.limits;
            }
        }
        self.refresh().await
    }

    /// Reload overrides now.
    ///
    /// On failure the previous snapshot is kept and returned.
    pub async fn refresh(&self) -> BusinessLimits {
        let Some(source) = &self.source else {
            return self.cached.read().await.limits;
        };
        let now = self.clock.now();
        match source.limit_overrides().await {
            Ok(overrides) => {
                let limits = self.defaults.with_overrides(&overrides);
                let mut cached = self.cached.write().await;
                if cached.limits != limits {
                    tracing::info!(?limits, "Business limits updated");
                }
                cached.limits = limits;
                cached.loaded_at = Some(now);
                limits
            }
            Err(error) => {
                tracing::warn!(error = %error, "Failed to refresh business limits, keeping last snapshot");
                self.cached.read().await.limits
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use boxoffice_testing::ManualClock;
    use std::sync::Mutex;

    struct ScriptedSource {
        responses: Mutex<Vec<Result<HashMap<String, String>, String>>>,
    }

    #[async_trait]
    impl LimitsSource for ScriptedSource {
        async fn limit_overrides(&self) -> Result<HashMap<String, String>, anyhow::Error> {
            let next = self.responses.lock().unwrap().remove(0);
            next.map_err(anyhow::Error::msg)
        }
    }

    fn overrides(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn overrides_apply_only_known_parsable_keys() {
        let limits = BusinessLimits::default().with_overrides(&overrides(&[
            (keys::HOLD_MINUTES, "5"),
            (keys::PLATFORM_FEE_BPS, "not-a-number"),
            ("unrelated", "1"),
        ]));
        assert_eq!(limits.hold_minutes, 5);
        assert_eq!(limits.platform_fee_bps, 0);
        assert_eq!(limits.max_per_purchase(EventKind::Resale), 1);
    }

    #[tokio::test]
    async fn refreshes_after_ttl_and_keeps_last_good_snapshot() {
        let clock = Arc::new(ManualClock::new(boxoffice_testing::test_clock().now()));
        let source = Arc::new(ScriptedSource {
            responses: Mutex::new(vec![
                Ok(overrides(&[(keys::HOLD_MINUTES, "20")])),
                Err("database down".to_string()),
            ]),
        });
        let cache = LimitsCache::new(
            BusinessLimits::default(),
            source,
            RefreshPolicy::every(Duration::seconds(60)),
            clock.clone(),
        );

        assert_eq!(cache.snapshot().await.hold_minutes, 20);
        // Within the TTL the source is not consulted again.
        assert_eq!(cache.snapshot().await.hold_minutes, 20);

        clock.advance(Duration::seconds(61));
        assert_eq!(cache.snapshot().await.hold_minutes, 20);
    }

    #[tokio::test]
    async fn fixed_cache_never_changes() {
        let limits = BusinessLimits {
            platform_fee_bps: 250,
            ..BusinessLimits::default()
        };
        let cache = LimitsCache::fixed(limits);
        assert_eq!(cache.snapshot().await, limits);
        assert_eq!(cache.refresh().await, limits);
    }
}
