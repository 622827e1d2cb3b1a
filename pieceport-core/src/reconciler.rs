use crate::PieceManager;
use crate::operations::ReconcileReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Background worker that periodically reconciles pending pieces with the
/// ledger.
pub struct TransactionReconciler {
    manager: Arc<PieceManager>,
    interval: Duration,
}

pub struct ReconcilerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TransactionReconciler {
    pub fn new(manager: Arc<PieceManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    pub fn spawn(self) -> ReconcilerHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        ReconcilerHandle { shutdown, task }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval = ?self.interval, "transaction reconciler started");

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // A closed channel means the handle is gone; stop as well.
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {}
            }

            // The tick runs outside select! so shutdown never interrupts it.
            self.tick().await;
        }

        tracing::info!("transaction reconciler stopped");
    }

    pub async fn tick(&self) -> Option<ReconcileReport> {
        match self.manager.reconcile_pending().await {
            Ok(report) => {
                if report.examined > 0 {
                    tracing::info!(
                        examined = report.examined,
                        added = report.added,
                        failed = report.failed,
                        still_pending = report.still_pending,
                        errors = report.errors,
                        "reconciliation tick finished"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "abandoning reconciliation tick");
                None
            }
        }
    }
}

impl ReconcilerHandle {
    /// Signal the worker and wait for it to exit. An in-flight tick is
    /// allowed to finish; no new tick starts afterwards.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "reconciler task ended abnormally");
        }
    }
}
