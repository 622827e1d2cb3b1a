//! Piece lifecycle manager.
//!
//! `PieceManager` is the single entry point for every piece state change:
//! `Prepared -> Uploaded -> PendingConfirmation -> AddedToProofSet |
//! TransactionFailed`, with `Error` reachable from `Uploaded` and
//! `PendingConfirmation`. Each mutation runs under the piece's lock and
//! persists with a conditional update, so the background reconciler and
//! foreground calls never apply a transition twice.

use crate::ledger::LedgerService;
use crate::operations::{
    AddPieceToProofSetOperation, AddPieceToProofSetOperationRequest,
    MonitorTransactionOperation, MonitorTransactionOperationResult, PieceSource,
    PreparePieceOperation, PreparePieceOperationRequest, ReconcilePendingOperation,
    ReconcileReport, UploadPieceOperation, UploadPieceOperationRequest,
};
use crate::{FileBlobStore, Piece, PieceError, PieceLocks, PieceStore, Result};
use bytes::Bytes;
use std::sync::Arc;

/// 64 GiB, the largest sector size in use.
pub const DEFAULT_SECTOR_SIZE: u64 = 64 << 30;

pub const DEFAULT_LIST_LIMIT: usize = 1000;

#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Sector size the unsealed root is computed against.
    pub sector_size: u64,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

pub struct PieceManager {
    store: Arc<PieceStore>,
    blobs: Arc<FileBlobStore>,
    prepare: PreparePieceOperation,
    upload: UploadPieceOperation,
    add_to_proof_set: AddPieceToProofSetOperation,
    monitor: MonitorTransactionOperation,
    reconcile: ReconcilePendingOperation,
}

impl PieceManager {
    pub fn new(
        store: Arc<PieceStore>,
        blobs: Arc<FileBlobStore>,
        ledger: Arc<dyn LedgerService>,
        options: LifecycleOptions,
    ) -> Result<Self> {
        let sector_size = options.sector_size;
        if !sector_size.is_power_of_two() || sector_size < crate::commitment::MIN_PIECE_SIZE {
            return Err(PieceError::Config(format!(
                "sector size {} must be a power of two of at least {} bytes",
                sector_size,
                crate::commitment::MIN_PIECE_SIZE
            )));
        }

        let locks = Arc::new(PieceLocks::new());
        let monitor = MonitorTransactionOperation::new(store.clone(), ledger.clone(), locks.clone());

        Ok(Self {
            prepare: PreparePieceOperation::new(store.clone()),
            upload: UploadPieceOperation::new(store.clone(), blobs.clone(), locks.clone()),
            add_to_proof_set: AddPieceToProofSetOperation::new(
                store.clone(),
                ledger,
                locks,
                sector_size,
            ),
            reconcile: ReconcilePendingOperation::new(store.clone(), monitor.clone()),
            monitor,
            store,
            blobs,
        })
    }

    pub async fn prepare_piece(&self, source: PieceSource) -> Result<Piece> {
        self.prepare
            .run(PreparePieceOperationRequest { source })
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "prepare failed"))
    }

    pub async fn upload_piece(&self, piece_id: &str, body: Bytes) -> Result<Piece> {
        self.upload
            .run(UploadPieceOperationRequest {
                piece_id: piece_id.to_string(),
                body,
            })
            .await
            .map(|result| result.piece)
            .map_err(|e| e.context("upload", piece_id))
    }

    pub async fn upload_from_source(&self, piece_id: &str) -> Result<Piece> {
        self.upload
            .run_from_source(piece_id)
            .await
            .map(|result| result.piece)
            .map_err(|e| e.context("upload", piece_id))
    }

    pub async fn add_piece_to_proof_set(&self, piece_id: &str, proof_set_id: u64) -> Result<Piece> {
        self.add_to_proof_set
            .run(AddPieceToProofSetOperationRequest {
                piece_id: piece_id.to_string(),
                proof_set_id,
            })
            .await
            .map_err(|e| e.context("add to proof set", piece_id))
    }

    pub fn get_piece(&self, piece_id: &str) -> Result<Piece> {
        self.store
            .get(piece_id)?
            .ok_or_else(|| PieceError::PieceNotFound(piece_id.to_string()))
    }

    pub fn list_pieces(&self, limit: Option<usize>) -> Result<Vec<Piece>> {
        self.store.list(limit.unwrap_or(DEFAULT_LIST_LIMIT))
    }

    /// Padded piece bytes as stored at upload.
    pub async fn piece_content(&self, piece_id: &str) -> Result<Bytes> {
        let piece = self.get_piece(piece_id)?;
        let Some(content_id) = piece.content_id else {
            return Err(PieceError::PieceNotFound(format!(
                "piece {} has no content yet (status {})",
                piece_id, piece.status
            )));
        };

        self.blobs
            .get(&content_id)
            .await
            .map_err(|e| e.context("read content", piece_id))
    }

    pub async fn monitor_transaction(
        &self,
        piece_id: &str,
    ) -> Result<MonitorTransactionOperationResult> {
        self.monitor
            .run(piece_id)
            .await
            .map_err(|e| e.context("monitor transaction", piece_id))
    }

    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        self.reconcile.run().await
    }
}
