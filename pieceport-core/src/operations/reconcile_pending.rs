use super::monitor_transaction::{MonitorTransactionOperation, ReconcileOutcome};
use crate::{PieceStatus, PieceStore, Result};
use serde::Serialize;
use std::sync::Arc;

/// One reconciliation pass over every piece awaiting confirmation.
#[derive(Clone)]
pub struct ReconcilePendingOperation {
    store: Arc<PieceStore>,
    monitor: MonitorTransactionOperation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub added: usize,
    pub failed: usize,
    pub still_pending: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Added => self.added += 1,
            ReconcileOutcome::Failed => self.failed += 1,
            ReconcileOutcome::NotIndexed | ReconcileOutcome::StillPending => {
                self.still_pending += 1
            }
            ReconcileOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn resolved(&self) -> usize {
        self.added + self.failed
    }
}

impl ReconcilePendingOperation {
    pub fn new(store: Arc<PieceStore>, monitor: MonitorTransactionOperation) -> Self {
        Self { store, monitor }
    }

    /// Errors for individual pieces are logged and counted; only failing to
    /// list pending pieces aborts the pass.
    pub async fn run(&self) -> Result<ReconcileReport> {
        let pending = self.store.list_by_status(PieceStatus::PendingConfirmation)?;
        let mut report = ReconcileReport::default();

        for piece in pending {
            report.examined += 1;
            match self.monitor.run_in_background(&piece.id).await {
                Ok(result) => report.record(result.outcome),
                Err(e) => {
                    report.errors += 1;
                    tracing::warn!(
                        piece_id = %piece.id,
                        tx_hash = ?piece.transaction_ref,
                        error = %e,
                        "failed to reconcile piece"
                    );
                }
            }
        }

        Ok(report)
    }
}
