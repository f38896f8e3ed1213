//! Application wiring.
//!
//! [`TicketingApp`] owns the three services and knows how to start them:
//! - Storage (memory or `PostgreSQL`, migrated on startup)
//! - Business limits cache over the `business_settings` table
//! - Payment gateway and payout provider
//! - Hold manager, payment service and payout service
//! - HTTP router and the background schedulers

mod lifecycle;

use crate::alerts::{AlertSink, LogAlertSink};
use crate::config::{Config, PayoutProviderConfig, StorageConfig};
use crate::gateway::{MockPaymentGateway, PaymentGateway};
use crate::holds::HoldManager;
use crate::jobs::{ExpirySweepJob, PayoutReconcileJob, PayoutRetryJob};
use crate::limits::{LimitsCache, RefreshPolicy};
use crate::payments::{PaymentService, PaymentSettings};
use crate::payouts::{
    HttpPayoutProvider, HttpProviderConfig, PayoutEngine, PayoutProvider, PayoutService, PayoutSettings,
    ProviderError, SimulatedProvider,
};
use crate::server::{AppState, build_router};
use crate::settlement::{LogSettlementPublisher, SettlementPublisher};
use crate::storage::{MemoryStorage, PgStorage, Storage, StorageError, StoredLimits};
use boxoffice_core::environment::{Clock, SystemClock};
use boxoffice_runtime::{JobRunner, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use lifecycle::shutdown_signal;

/// Application errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Storage connection or migration failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Payout provider could not be built
    #[error("payout provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Metrics exporter could not be started
    #[error("metrics error: {0}")]
    Metrics(#[from] crate::metrics::MetricsError),

    /// Listener bind or server failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// External collaborators of the services.
///
/// [`TicketingApp::new`] builds these from [`Config`]; tests hand in doubles
/// through [`TicketingApp::assemble`].
pub struct Components {
    /// Persistence
    pub storage: Arc<dyn Storage>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Card gateway
    pub gateway: Arc<dyn PaymentGateway>,
    /// Payout provider
    pub provider: Arc<dyn PayoutProvider>,
    /// Operational alerts
    pub alerts: Arc<dyn AlertSink>,
    /// Settlement facts
    pub publisher: Arc<dyn SettlementPublisher>,
}

/// Main ticketing application.
pub struct TicketingApp {
    config: Config,
    limits: Arc<LimitsCache>,
    holds: Arc<HoldManager>,
    payments: Arc<PaymentService>,
    payouts: Arc<PayoutService>,
}

impl TicketingApp {
    /// Connect to storage and build every service from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if the database is unreachable, migrations fail or
    /// the payout provider cannot be configured.
    pub async fn new(config: Config) -> Result<Self, AppError> {
        let storage: Arc<dyn Storage> = match &config.storage {
            StorageConfig::Memory => {
                tracing::warn!("Using in-memory storage; state is lost on restart");
                Arc::new(MemoryStorage::new())
            }
            StorageConfig::Postgres(pg) => {
                let storage = PgStorage::connect(pg).await?;
                storage.migrate().await?;
                tracing::info!("Database migrations applied");
                Arc::new(storage)
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // TODO: swap for the card gateway client once its credentials are provisioned.
        tracing::warn!("Using the mock payment gateway; no real charges are made");
        let gateway = MockPaymentGateway::shared();

        let provider: Arc<dyn PayoutProvider> = match &config.payouts.provider {
            PayoutProviderConfig::Simulated => {
                tracing::warn!("Using the simulated payout provider");
                Arc::new(SimulatedProvider::new(
                    Arc::clone(&clock),
                    config.payouts.webhook_secret.clone(),
                ))
            }
            PayoutProviderConfig::Http { base_url, api_key } => {
                let retry = RetryPolicy::builder()
                    .max_attempts(config.payouts.http_max_attempts.max(1))
                    .initial_delay(Duration::from_millis(500))
                    .max_delay(Duration::from_secs(10))
                    .build();
                Arc::new(HttpPayoutProvider::new(HttpProviderConfig {
                    base_url: base_url.clone(),
                    api_key: api_key.clone(),
                    timeout: config.payouts.request_timeout,
                    retry,
                    webhook_secret: config.payouts.webhook_secret.clone(),
                })?)
            }
        };
        tracing::info!(provider = provider.name(), "Payout provider configured");

        Ok(Self::assemble(
            config,
            Components {
                storage,
                clock,
                gateway,
                provider,
                alerts: Arc::new(LogAlertSink),
                publisher: Arc::new(LogSettlementPublisher),
            },
        ))
    }

    /// Build the services around already-constructed collaborators.
    #[must_use]
    pub fn assemble(config: Config, components: Components) -> Self {
        let Components {
            storage,
            clock,
            gateway,
            provider,
            alerts,
            publisher,
        } = components;

        let refresh = chrono::Duration::from_std(config.limits.refresh).unwrap_or(chrono::Duration::MAX);
        let limits = Arc::new(LimitsCache::new(
            config.limits.defaults,
            Arc::new(StoredLimits(Arc::clone(&storage))),
            RefreshPolicy::every(refresh),
            Arc::clone(&clock),
        ));

        let holds = Arc::new(HoldManager::new(
            Arc::clone(&storage),
            Arc::clone(&limits),
            Arc::clone(&clock),
            Arc::clone(&gateway),
            Arc::clone(&alerts),
        ));

        let payments = Arc::new(PaymentService::new(
            Arc::clone(&storage),
            Arc::clone(&limits),
            Arc::clone(&clock),
            gateway,
            publisher,
            PaymentSettings {
                return_url: config.gateway.return_url.clone(),
                deferred_capture: config.gateway.deferred_capture,
                payout_currency: config.payouts.currency.clone(),
            },
        ));

        let payouts = Arc::new(PayoutService::new(
            storage,
            PayoutEngine::new(provider),
            alerts,
            clock,
            PayoutSettings {
                schedule: config.payouts.retry_schedule.clone(),
                max_retries: config.payouts.max_retries,
                retry_batch: config.payouts.retry_batch,
                reconcile_batch: config.payouts.reconcile_batch,
            },
        ));

        Self {
            config,
            limits,
            holds,
            payments,
            payouts,
        }
    }

    /// Configuration the app was built with
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Shared business limits
    #[must_use]
    pub fn limits(&self) -> Arc<LimitsCache> {
        Arc::clone(&self.limits)
    }

    /// Handler state
    #[must_use]
    pub fn state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.holds),
            Arc::clone(&self.payments),
            Arc::clone(&self.payouts),
        )
    }

    /// HTTP router over [`TicketingApp::state`]
    #[must_use]
    pub fn router(&self) -> axum::Router {
        build_router(self.state())
    }

    /// Start the expiry sweep and both payout schedulers.
    ///
    /// Each loop stops once `shutdown` flips to `true`.
    #[must_use]
    pub fn spawn_jobs(&self, shutdown: &watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let jitter = self.config.payouts.startup_jitter;
        vec![
            JobRunner::new(
                ExpirySweepJob {
                    holds: Arc::clone(&self.holds),
                    batch: self.config.sweep.batch,
                },
                self.config.sweep.interval,
            )
            .with_startup_jitter(jitter)
            .spawn(shutdown.clone()),
            JobRunner::new(PayoutRetryJob(Arc::clone(&self.payouts)), self.config.payouts.retry_interval)
                .with_startup_jitter(jitter)
                .spawn(shutdown.clone()),
            JobRunner::new(
                PayoutReconcileJob(Arc::clone(&self.payouts)),
                self.config.payouts.reconcile_interval,
            )
            .with_startup_jitter(jitter)
            .spawn(shutdown.clone()),
        ]
    }
}
