use crate::ledger::{LedgerService, TransactionRecord, TransactionStatus};
use crate::{Piece, PieceError, PieceLocks, PieceStatus, PieceStore, Result};
use serde::Serialize;
use std::sync::Arc;

/// Reconciles one pending piece against the ledger. Shared by the manual
/// monitor call and the background tick.
#[derive(Clone)]
pub struct MonitorTransactionOperation {
    store: Arc<PieceStore>,
    ledger: Arc<dyn LedgerService>,
    locks: Arc<PieceLocks>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The ledger has not indexed the transaction yet.
    NotIndexed,
    StillPending,
    Added,
    Failed,
    /// Nothing to do: the piece is not pending or has no transaction.
    Skipped,
}

#[derive(Debug, Clone)]
pub struct MonitorTransactionOperationResult {
    pub piece: Piece,
    pub outcome: ReconcileOutcome,
}

impl MonitorTransactionOperation {
    pub fn new(
        store: Arc<PieceStore>,
        ledger: Arc<dyn LedgerService>,
        locks: Arc<PieceLocks>,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
        }
    }

    /// Manual reconciliation. Fails unless the piece is awaiting confirmation.
    pub async fn run(&self, piece_id: &str) -> Result<MonitorTransactionOperationResult> {
        self.reconcile(piece_id, true).await
    }

    /// Reconciliation on behalf of the background tick, which tolerates
    /// pieces that moved on or were never given a transaction.
    pub(crate) async fn run_in_background(
        &self,
        piece_id: &str,
    ) -> Result<MonitorTransactionOperationResult> {
        self.reconcile(piece_id, false).await
    }

    async fn reconcile(&self, piece_id: &str, strict: bool) -> Result<MonitorTransactionOperationResult> {
        let _guard = self.locks.lock(piece_id).await;

        // Re-read under the lock; another writer may have resolved it.
        let mut piece = self
            .store
            .get(piece_id)?
            .ok_or_else(|| PieceError::PieceNotFound(piece_id.to_string()))?;

        if piece.status != PieceStatus::PendingConfirmation {
            if strict {
                return Err(piece.invalid_state("monitor transaction of"));
            }
            return Ok(MonitorTransactionOperationResult {
                piece,
                outcome: ReconcileOutcome::Skipped,
            });
        }

        let Some(tx_hash) = piece.transaction_ref.clone() else {
            tracing::warn!(piece_id = %piece.id, "pending piece has no transaction reference");
            if strict {
                return Err(PieceError::TransactionNotFound(format!(
                    "piece {} has no transaction reference",
                    piece.id
                )));
            }
            return Ok(MonitorTransactionOperationResult {
                piece,
                outcome: ReconcileOutcome::Skipped,
            });
        };

        let Some(record) = self.ledger.get_transaction(&tx_hash).await? else {
            tracing::debug!(piece_id = %piece.id, tx_hash = %tx_hash, "transaction not indexed yet");
            return Ok(MonitorTransactionOperationResult {
                piece,
                outcome: ReconcileOutcome::NotIndexed,
            });
        };

        let outcome = apply_transaction_record(&mut piece, &record)?;
        if matches!(outcome, ReconcileOutcome::Added | ReconcileOutcome::Failed) {
            if !self.store.update(&piece, PieceStatus::PendingConfirmation)? {
                return Err(PieceError::Conflict(format!(
                    "piece {} changed during reconciliation",
                    piece.id
                )));
            }

            tracing::info!(
                piece_id = %piece.id,
                tx_hash = %tx_hash,
                status = %piece.status,
                block = ?piece.confirmed_block,
                "reconciled piece transaction"
            );
        }

        Ok(MonitorTransactionOperationResult { piece, outcome })
    }
}

/// Fold a ledger record into a pending piece. Only confirmed or failed
/// records change the piece.
pub fn apply_transaction_record(
    piece: &mut Piece,
    record: &TransactionRecord,
) -> Result<ReconcileOutcome> {
    match record.status {
        TransactionStatus::Pending => Ok(ReconcileOutcome::StillPending),
        TransactionStatus::Confirmed => {
            copy_confirmation(piece, record);
            if record.success == Some(true) {
                piece.transition(PieceStatus::AddedToProofSet, "confirm")?;
                Ok(ReconcileOutcome::Added)
            } else {
                let block = record
                    .confirmed_block
                    .map(|b| format!(" in block {}", b))
                    .unwrap_or_default();
                piece.error_message = Some(format!(
                    "transaction {} failed on chain{}",
                    record.hash, block
                ));
                piece.transition(PieceStatus::TransactionFailed, "confirm")?;
                Ok(ReconcileOutcome::Failed)
            }
        }
        TransactionStatus::Failed => {
            copy_confirmation(piece, record);
            piece.error_message = Some(format!(
                "transaction {} was dropped by the ledger",
                record.hash
            ));
            piece.transition(PieceStatus::TransactionFailed, "confirm")?;
            Ok(ReconcileOutcome::Failed)
        }
    }
}

fn copy_confirmation(piece: &mut Piece, record: &TransactionRecord) {
    piece.tx_success = record.success;
    piece.confirmed_block = record.confirmed_block;
    piece.confirmed_tx_hash = record.confirmed_tx_hash.clone();
    piece.receipt = record.receipt.clone();
}
