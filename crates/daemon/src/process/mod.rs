pub mod utils;

use std::sync::Arc;
use std::time::Duration;

use common::error::ExportError;
use common::export::{Export, ExportConfig, Registry};
use common::upcall::{
    ChannelConsumer, DaemonHandle, InvalidationDaemon, ShutdownOutcome, Upcall, UpstreamConsumer,
};
use s3ns_store::{BucketStatus, StoreError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{Config, ConfigError};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("export '{name}': {source}")]
    Export {
        name: String,
        #[source]
        source: ExportError,
    },

    #[error("failed to install signal handlers: {0}")]
    Signal(#[from] std::io::Error),

    #[error("failed to initialize logging: {0}")]
    Logging(String),
}

/// What happened while the service shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `None` when the invalidation daemon was disabled
    pub daemon: Option<ShutdownOutcome>,
    pub released_handles: usize,
    pub upcalls_logged: usize,
}

/// Handle for gracefully shutting down the service.
pub struct ShutdownHandle {
    graceful_waiter: JoinHandle<()>,
    shutdown_tx: watch::Sender<()>,
    registry: Arc<Registry>,
    daemon: Option<DaemonHandle>,
    drain: JoinHandle<usize>,
    grace: Duration,
}

impl ShutdownHandle {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Block until a shutdown signal arrives, then stop the daemon and
    /// release every export.
    pub async fn wait(self) -> ShutdownReport {
        let _ = self.graceful_waiter.await;

        let daemon = match self.daemon {
            Some(daemon) => Some(daemon.shutdown(self.grace).await),
            None => None,
        };
        let released_handles = self.registry.release_all();
        drop(self.registry);

        // The drain ends once the last export, and with it the last sender,
        // is gone.
        let upcalls_logged = match timeout(FINAL_SHUTDOWN_TIMEOUT, self.drain).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "upcall drain failed");
                0
            }
            Err(_) => {
                tracing::error!(
                    "upcall drain did not finish within {} seconds",
                    FINAL_SHUTDOWN_TIMEOUT.as_secs()
                );
                0
            }
        };

        tracing::info!(
            released_handles,
            upcalls_logged,
            daemon = ?daemon,
            "service stopped"
        );
        ShutdownReport {
            daemon,
            released_handles,
            upcalls_logged,
        }
    }
}

/// Initialize logging and the panic handler.
/// Returns guards that must be kept alive for the duration of the program.
pub fn init_logging(
    config: &Config,
) -> Result<Vec<tracing_appender::non_blocking::WorkerGuard>, ServiceError> {
    use tracing_subscriber::fmt::format::FmtSpan;

    let level = config.level()?;
    let mut guards = Vec::new();

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(stdout_guard);

    let stdout_env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(stdout_env_filter);

    let installed = if let Some(log_dir) = &config.log_dir {
        if let Err(e) = std::fs::create_dir_all(log_dir) {
            eprintln!(
                "Warning: Failed to create log directory {:?}: {}",
                log_dir, e
            );
        }

        let file_appender = tracing_appender::rolling::daily(log_dir, "s3ns.log");
        let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
        guards.push(file_guard);

        let file_env_filter = EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy();

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_writer)
            .with_ansi(false)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(file_env_filter);

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(file_layer)
            .try_init()
    } else {
        tracing_subscriber::registry().with(stdout_layer).try_init()
    };
    installed.map_err(|e| ServiceError::Logging(e.to_string()))?;

    utils::register_panic_logger();
    utils::report_build_info();

    Ok(guards)
}

/// Create one export per config entry. On failure every export created so
/// far is released again.
pub fn build_registry(
    exports: &[ExportConfig],
    upstream: Arc<dyn UpstreamConsumer>,
) -> Result<Arc<Registry>, ServiceError> {
    let registry = Arc::new(Registry::new());
    for config in exports {
        if let Err(source) = registry.create_export(config.clone(), upstream.clone()) {
            registry.release_all();
            return Err(ServiceError::Export {
                name: config.display_name().to_string(),
                source,
            });
        }
    }
    Ok(registry)
}

/// Probe every export's bucket, logging the outcome. Never fails.
pub async fn probe_exports(
    registry: &Registry,
) -> Vec<(Arc<Export>, Result<BucketStatus, StoreError>)> {
    let mut results = Vec::new();
    for export in registry.exports() {
        let status = export.probe().await;
        match &status {
            Ok(BucketStatus::Exists { .. }) => {
                tracing::info!(export = %export.name(), bucket = %export.bucket(), "bucket exists")
            }
            Ok(status) => {
                tracing::warn!(export = %export.name(), bucket = %export.bucket(), %status, "bucket unusable")
            }
            Err(e) => {
                tracing::warn!(export = %export.name(), bucket = %export.bucket(), error = %e, "bucket probe failed")
            }
        }
        results.push((export, status));
    }
    results
}

/// Log every upcall until all senders are gone. Resolves to the count seen.
pub fn spawn_upcall_drain(upcalls: flume::Receiver<Upcall>) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut seen = 0;
        while let Ok(upcall) = upcalls.recv_async().await {
            seen += 1;
            tracing::debug!(%upcall, "upcall");
        }
        seen
    })
}

/// Run the background side of an already populated registry: the upcall
/// drain, the invalidation daemon and the signal listener.
pub fn start(
    registry: Arc<Registry>,
    upcalls: flume::Receiver<Upcall>,
    config: &Config,
) -> Result<ShutdownHandle, ServiceError> {
    let (graceful_waiter, shutdown_tx, _) = utils::graceful_shutdown_blocker()?;
    let drain = spawn_upcall_drain(upcalls);
    let daemon = InvalidationDaemon::new(registry.clone(), config.up_interval()).spawn();

    tracing::info!(
        exports = registry.len(),
        up_interval_secs = config.up_interval_secs,
        "service running"
    );

    Ok(ShutdownHandle {
        graceful_waiter,
        shutdown_tx,
        registry,
        daemon,
        drain,
        grace: config.shutdown_grace(),
    })
}

/// Create every configured export, probe its bucket and start the
/// background tasks.
pub async fn start_service(config: &Config) -> Result<ShutdownHandle, ServiceError> {
    let (consumer, upcalls) = ChannelConsumer::unbounded();
    let registry = build_registry(&config.exports, Arc::new(consumer))?;
    probe_exports(&registry).await;
    start(registry, upcalls, config)
}

/// Runs the service until a shutdown signal is received. Use for CLI
/// binary usage.
pub async fn spawn_service(config: &Config) -> Result<ShutdownReport, ServiceError> {
    let _guards = init_logging(config)?;
    let handle = start_service(config).await?;
    Ok(handle.wait().await)
}
