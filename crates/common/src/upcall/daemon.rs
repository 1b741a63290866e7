//! Periodic invalidation daemon.
//!
//! Every period, each live export gets three randomly sampled handles: one
//! is touched and reported with an `update`, one gets an `invalidate`, one
//! an `invalidate_close`. Upcall failures are logged and never stop the
//! loop.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::UpcallError;
use crate::export::{Export, Registry};

/// How long a stop request waits for the daemon before aborting it.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Update,
    Invalidate,
    InvalidateClose,
}

const ACTIONS: [Action; 3] = [Action::Update, Action::Invalidate, Action::InvalidateClose];

/// Counts from one pass over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub exports: usize,
    pub updates: usize,
    pub invalidates: usize,
    pub invalidate_closes: usize,
    pub failures: usize,
}

impl TickReport {
    pub fn upcalls(&self) -> usize {
        self.updates + self.invalidates + self.invalidate_closes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// The task saw the stop request and exited within the grace period
    Stopped,
    /// The task was still busy when the grace period ran out and was aborted
    Cancelled,
}

#[derive(Debug)]
pub struct InvalidationDaemon {
    registry: Arc<Registry>,
    period: Duration,
}

impl InvalidationDaemon {
    pub fn new(registry: Arc<Registry>, period: Duration) -> Self {
        Self { registry, period }
    }

    /// Start the daemon. A zero period disables it and nothing is spawned.
    pub fn spawn(self) -> Option<DaemonHandle> {
        if self.period.is_zero() {
            tracing::info!("invalidation daemon disabled");
            return None;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tracing::info!(period_ms = self.period.as_millis() as u64, "starting invalidation daemon");
        let task = tokio::spawn(self.run(shutdown_rx));

        Some(DaemonHandle { shutdown_tx, task })
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut rng = StdRng::from_os_rng();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the first pass waits a period.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let report = Self::tick(&self.registry, &mut rng).await;
                    tracing::debug!(
                        exports = report.exports,
                        upcalls = report.upcalls(),
                        failures = report.failures,
                        "invalidation pass complete"
                    );
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("invalidation daemon stopping");
                    break;
                }
            }
        }
    }

    /// One pass over every live export.
    pub async fn tick<R: Rng + Send>(registry: &Registry, rng: &mut R) -> TickReport {
        let mut report = TickReport::default();
        for export in registry.exports() {
            report.exports += 1;
            for action in ACTIONS {
                let Some(id) = export.sample_handle(rng) else {
                    break;
                };
                match Self::perform(&export, id, action).await {
                    Ok(true) => match action {
                        Action::Update => report.updates += 1,
                        Action::Invalidate => report.invalidates += 1,
                        Action::InvalidateClose => report.invalidate_closes += 1,
                    },
                    Ok(false) => {}
                    Err(e) => {
                        report.failures += 1;
                        tracing::warn!(
                            export = %export.name(),
                            handle = %id,
                            action = ?action,
                            error = %e,
                            "upcall failed"
                        );
                    }
                }
            }
        }
        report
    }

    /// Returns `Ok(false)` when the handle vanished between sampling and the
    /// upcall.
    async fn perform(
        export: &Export,
        id: crate::graph::HandleId,
        action: Action,
    ) -> Result<bool, UpcallError> {
        let upstream = export.upstream();
        match action {
            Action::Update => {
                let Some((key, changed)) = export.touch(id) else {
                    return Ok(false);
                };
                upstream.update(&key, &changed).await?;
            }
            Action::Invalidate => {
                let Ok(key) = export.handle_key(id) else {
                    return Ok(false);
                };
                upstream.invalidate(&key).await?;
            }
            Action::InvalidateClose => {
                let Ok(key) = export.handle_key(id) else {
                    return Ok(false);
                };
                upstream.invalidate_close(&key).await?;
            }
        }
        Ok(true)
    }
}

/// Owner of a running daemon.
#[derive(Debug)]
pub struct DaemonHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DaemonHandle {
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Ask the daemon to stop and wait up to `grace` for it; abort it if it
    /// does not exit in time.
    pub async fn shutdown(self, grace: Duration) -> ShutdownOutcome {
        let _ = self.shutdown_tx.send(true);
        let mut task = self.task;

        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => ShutdownOutcome::Stopped,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "invalidation daemon exited abnormally");
                ShutdownOutcome::Stopped
            }
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "invalidation daemon did not stop in time, cancelling"
                );
                task.abort();
                ShutdownOutcome::Cancelled
            }
        }
    }
}
