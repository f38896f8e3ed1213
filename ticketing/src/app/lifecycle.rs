//! Serving and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. HTTP server stops accepting new connections and drains in-flight requests
//! 2. Shutdown flag flips for every scheduler loop
//! 3. Each loop gets `SHUTDOWN_TIMEOUT` seconds to finish its current run

use super::{AppError, TicketingApp};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

impl TicketingApp {
    /// Serve HTTP and run the schedulers until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns [`AppError`] if a listener cannot be bound, the metrics
    /// exporter fails to install, or the server exits with an I/O error.
    pub async fn run(self) -> Result<(), AppError> {
        let metrics_addr: SocketAddr = self
            .config
            .metrics_addr()
            .parse()
            .map_err(|e| AppError::Config(format!("invalid metrics address: {e}")))?;
        crate::metrics::install_exporter(metrics_addr)?;

        let listener = tokio::net::TcpListener::bind(self.config.http_addr()).await?;
        info!(address = %listener.local_addr()?, "HTTP server listening");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let jobs = self.spawn_jobs(&shutdown_rx);
        info!(job_count = jobs.len(), "Background jobs started");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, stopping background jobs");
        let _ = shutdown_tx.send(true);
        await_jobs(jobs, Duration::from_secs(self.config.server.shutdown_timeout)).await;

        info!("Graceful shutdown complete");
        Ok(())
    }
}

async fn await_jobs(handles: Vec<JoinHandle<()>>, timeout: Duration) {
    for (idx, handle) in handles.into_iter().enumerate() {
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => info!(job = idx, "Job stopped gracefully"),
            Ok(Err(e)) => warn!(job = idx, error = %e, "Job task failed"),
            Err(_) => warn!(job = idx, "Job shutdown timed out"),
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// A handler that cannot be installed is logged and never fires.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
