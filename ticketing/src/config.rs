//! Configuration management for the ticketing service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! [`Config::from_lookup`] takes the variable source as a closure so tests can
//! feed a map instead of mutating the process environment.

use crate::limits::BusinessLimits;
use boxoffice_core::backoff::BackoffSchedule;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Configuration could not be assembled.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable required by the chosen mode is unset
    #[error("missing required environment variable {key}")]
    Missing {
        /// Variable name
        key: &'static str,
    },
    /// A variable is set to an unusable value
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP and metrics listeners
    pub server: ServerConfig,
    /// Persistence backend
    pub storage: StorageConfig,
    /// Payment gateway
    pub gateway: GatewayConfig,
    /// Payout provider and schedulers
    pub payouts: PayoutConfig,
    /// Expired-hold sweep
    pub sweep: SweepConfig,
    /// Business limit defaults and refresh cadence
    pub limits: LimitsConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout: u64,
}

/// Which [`crate::storage::Storage`] implementation to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageConfig {
    /// Process-local state, lost on restart
    Memory,
    /// `PostgreSQL`
    Postgres(PostgresConfig),
}

/// `PostgreSQL` configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    /// `PostgreSQL` connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
    /// Minimum number of idle connections in the pool
    pub min_connections: u32,
    /// Connection timeout in seconds
    pub connect_timeout: u64,
}

/// Payment gateway configuration
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Where the gateway sends the buyer back after the card form
    pub return_url: String,
    /// Authorize on commit and capture later instead of capturing at once
    pub deferred_capture: bool,
}

/// Payout provider selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayoutProviderConfig {
    /// Resolve every payout immediately with a synthetic id
    Simulated,
    /// Post to an external adapter
    Http {
        /// Adapter base URL
        base_url: String,
        /// Bearer token
        api_key: String,
    },
}

/// Payout configuration
#[derive(Debug, Clone)]
pub struct PayoutConfig {
    /// Provider
    pub provider: PayoutProviderConfig,
    /// Shared secret for webhook signatures
    pub webhook_secret: Option<String>,
    /// Per-request timeout for provider calls
    pub request_timeout: Duration,
    /// In-process attempts per provider call
    pub http_max_attempts: u32,
    /// Backoff between scheduler attempts
    pub retry_schedule: BackoffSchedule,
    /// Retry ceiling
    pub max_retries: u32,
    /// Retry scheduler tick
    pub retry_interval: Duration,
    /// Reconciliation scheduler tick
    pub reconcile_interval: Duration,
    /// Payouts considered per retry run
    pub retry_batch: usize,
    /// Payouts polled per reconciliation run
    pub reconcile_batch: usize,
    /// Currency of created payouts
    pub currency: String,
    /// Upper bound of the random delay before a scheduler's first run
    pub startup_jitter: Duration,
}

/// Expiry sweep configuration
#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// Tick
    pub interval: Duration,
    /// Reservations expired per run
    pub batch: usize,
}

/// Business limits configuration
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Values used when no override is stored
    pub defaults: BusinessLimits,
    /// Override reload interval
    pub refresh: Duration,
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn string_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    lookup(key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key).filter(|s| !s.trim().is_empty())
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::from_lookup`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// Numeric values that fail to parse fall back to their defaults. The
    /// storage mode, provider mode and retry schedule are validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a mode names an unknown backend, a backend
    /// is selected without its required URL, or the retry schedule has a
    /// malformed entry.
    #[allow(clippy::too_many_lines)] // Config loading is naturally long but simple
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = non_empty(&lookup, "DATABASE_URL");
        let storage_mode = non_empty(&lookup, "STORAGE").map(|s| s.trim().to_ascii_lowercase());
        let storage = match (storage_mode.as_deref(), database_url) {
            (Some("memory"), _) | (None, None) => StorageConfig::Memory,
            (Some("postgres") | None, Some(url)) => StorageConfig::Postgres(PostgresConfig {
                url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parse_or(&lookup, "DATABASE_MIN_CONNECTIONS", 2),
                connect_timeout: parse_or(&lookup, "DATABASE_CONNECT_TIMEOUT", 30),
            }),
            (Some("postgres"), None) => return Err(ConfigError::Missing { key: "DATABASE_URL" }),
            (Some(other), _) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE",
                    value: other.to_string(),
                    reason: "expected memory or postgres".to_string(),
                });
            }
        };

        let base_url = non_empty(&lookup, "PAYOUT_BASE_URL");
        let provider_mode = non_empty(&lookup, "PAYOUT_PROVIDER").map(|s| s.trim().to_ascii_lowercase());
        let provider = match (provider_mode.as_deref(), base_url) {
            (Some("simulated"), _) | (None, None) => PayoutProviderConfig::Simulated,
            (Some("http") | None, Some(base_url)) => PayoutProviderConfig::Http {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: lookup("PAYOUT_API_KEY").unwrap_or_default(),
            },
            (Some("http"), None) => return Err(ConfigError::Missing { key: "PAYOUT_BASE_URL" }),
            (Some(other), _) => {
                return Err(ConfigError::Invalid {
                    key: "PAYOUT_PROVIDER",
                    value: other.to_string(),
                    reason: "expected simulated or http".to_string(),
                });
            }
        };

        let raw_schedule = lookup("PAYOUT_RETRY_SCHEDULE").unwrap_or_default();
        let retry_schedule = BackoffSchedule::parse(&raw_schedule).map_err(|e| ConfigError::Invalid {
            key: "PAYOUT_RETRY_SCHEDULE",
            value: raw_schedule.clone(),
            reason: e.to_string(),
        })?;

        let defaults = BusinessLimits::default();

        Ok(Self {
            server: ServerConfig {
                host: string_or(&lookup, "HOST", "0.0.0.0"),
                port: parse_or(&lookup, "PORT", 8080),
                metrics_host: string_or(&lookup, "METRICS_HOST", "0.0.0.0"),
                metrics_port: parse_or(&lookup, "METRICS_PORT", 9090),
                shutdown_timeout: parse_or(&lookup, "SHUTDOWN_TIMEOUT", 30),
            },
            storage,
            gateway: GatewayConfig {
                return_url: string_or(&lookup, "GATEWAY_RETURN_URL", "http://localhost:8080/api/payments/return"),
                deferred_capture: parse_or(&lookup, "GATEWAY_DEFERRED_CAPTURE", false),
            },
            payouts: PayoutConfig {
                provider,
                webhook_secret: non_empty(&lookup, "PAYOUT_WEBHOOK_SECRET"),
                request_timeout: Duration::from_secs(parse_or(&lookup, "PAYOUT_REQUEST_TIMEOUT_SECS", 10)),
                http_max_attempts: parse_or(&lookup, "PAYOUT_HTTP_MAX_ATTEMPTS", 3),
                retry_schedule,
                max_retries: parse_or(&lookup, "PAYOUT_MAX_RETRIES", 5),
                retry_interval: Duration::from_secs(parse_or(&lookup, "PAYOUT_RETRY_INTERVAL_SECS", 300)),
                reconcile_interval: Duration::from_secs(parse_or(&lookup, "PAYOUT_RECONCILE_INTERVAL_SECS", 600)),
                retry_batch: parse_or(&lookup, "PAYOUT_RETRY_BATCH", 50),
                reconcile_batch: parse_or(&lookup, "PAYOUT_RECONCILE_BATCH", 100),
                currency: string_or(&lookup, "PAYOUT_CURRENCY", "CLP"),
                startup_jitter: Duration::from_secs(parse_or(&lookup, "SCHEDULER_STARTUP_JITTER_SECS", 10)),
            },
            sweep: SweepConfig {
                interval: Duration::from_secs(parse_or(&lookup, "SWEEP_INTERVAL_SECS", 60)),
                batch: parse_or(&lookup, "SWEEP_BATCH", 200),
            },
            limits: LimitsConfig {
                defaults: BusinessLimits {
                    hold_minutes: parse_or(&lookup, "HOLD_MINUTES", defaults.hold_minutes),
                    max_per_purchase_own: parse_or(&lookup, "MAX_PER_PURCHASE_OWN", defaults.max_per_purchase_own),
                    max_per_purchase_resale: parse_or(
                        &lookup,
                        "MAX_PER_PURCHASE_RESALE",
                        defaults.max_per_purchase_resale,
                    ),
                    platform_fee_bps: parse_or(&lookup, "PLATFORM_FEE_BPS", defaults.platform_fee_bps),
                    upload_deadline_hours: parse_or(&lookup, "UPLOAD_DEADLINE_HOURS", defaults.upload_deadline_hours),
                },
                refresh: Duration::from_secs(parse_or(&lookup, "LIMITS_REFRESH_SECS", 60)),
            },
        })
    }

    /// `host:port` of the HTTP listener
    #[must_use]
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// `host:port` of the metrics listener
    #[must_use]
    pub fn metrics_addr(&self) -> String {
        format!("{}:{}", self.server.metrics_host, self.server.metrics_port)
    }
}
