use crate::commitment::{Commitment, cid_to_commitment, commitment_to_cid, unsealed_root};
use crate::ledger::{LedgerService, RootDescriptor};
use crate::{Piece, PieceError, PieceLocks, PieceStatus, PieceStore, Result};
use chrono::Utc;
use std::sync::Arc;

#[derive(Clone)]
pub struct AddPieceToProofSetOperation {
    store: Arc<PieceStore>,
    ledger: Arc<dyn LedgerService>,
    locks: Arc<PieceLocks>,
    sector_size: u64,
}

#[derive(Debug, Clone)]
pub struct AddPieceToProofSetOperationRequest {
    pub piece_id: String,
    pub proof_set_id: u64,
}

impl AddPieceToProofSetOperation {
    pub fn new(
        store: Arc<PieceStore>,
        ledger: Arc<dyn LedgerService>,
        locks: Arc<PieceLocks>,
        sector_size: u64,
    ) -> Self {
        Self {
            store,
            ledger,
            locks,
            sector_size,
        }
    }

    pub async fn run(&self, request: AddPieceToProofSetOperationRequest) -> Result<Piece> {
        let AddPieceToProofSetOperationRequest {
            piece_id,
            proof_set_id,
        } = request;

        let _guard = self.locks.lock(&piece_id).await;

        let mut piece = self
            .store
            .get(&piece_id)?
            .ok_or_else(|| PieceError::PieceNotFound(piece_id.clone()))?;

        if piece.status != PieceStatus::Uploaded {
            return Err(piece.invalid_state("add to proof set"));
        }
        if let Some(claimed) = piece.proof_set_id {
            return Err(PieceError::Conflict(format!(
                "piece {} already has a submission to proof set {} with no recorded outcome",
                piece.id, claimed
            )));
        }

        let root = self.root_descriptor(&piece)?;

        // Claim before calling the ledger; a piece that fails to record the
        // outcome afterwards can never be submitted again.
        if !self
            .store
            .claim_submission(&piece.id, proof_set_id, &root.root_cid)?
        {
            return Err(PieceError::Conflict(format!(
                "piece {} changed before submission",
                piece.id
            )));
        }
        piece.proof_set_id = Some(proof_set_id);
        piece.root_cid = Some(root.root_cid.clone());

        match self.ledger.submit_root(proof_set_id, &root).await {
            Ok(tx_hash) => {
                piece.transaction_ref = Some(tx_hash.clone());
                piece.submitted_at = Some(Utc::now());
                piece.transition(PieceStatus::PendingConfirmation, "add to proof set")?;
                self.persist(&piece).inspect_err(|e| {
                    tracing::error!(
                        piece_id = %piece.id,
                        proof_set_id,
                        tx_hash = %tx_hash,
                        error = %e,
                        "root submitted but transaction was not recorded"
                    )
                })?;

                tracing::info!(
                    piece_id = %piece.id,
                    proof_set_id,
                    tx_hash = %tx_hash,
                    "submitted piece to proof set"
                );

                Ok(piece)
            }
            Err(e) => {
                let message = format!("failed to add root to proof set {}: {}", proof_set_id, e);

                tracing::warn!(
                    piece_id = %piece.id,
                    proof_set_id,
                    error = %e,
                    "ledger rejected root submission"
                );

                piece.error_message = Some(message.clone());
                piece.transition(PieceStatus::Error, "add to proof set")?;
                if let Err(persist_err) = self.persist(&piece) {
                    tracing::error!(
                        piece_id = %piece.id,
                        error = %persist_err,
                        "failed to record rejected submission"
                    );
                }

                Err(PieceError::Ledger(message))
            }
        }
    }

    /// Root for a single-piece sector; the piece CID is its only subroot.
    fn root_descriptor(&self, piece: &Piece) -> Result<RootDescriptor> {
        let (Some(content_id), Some(piece_size)) = (piece.content_id.as_ref(), piece.piece_size)
        else {
            return Err(PieceError::Internal(format!(
                "uploaded piece {} has no commitment",
                piece.id
            )));
        };

        let commitment = Commitment {
            digest: cid_to_commitment(content_id)?,
            piece_size,
        };
        let root = unsealed_root(&commitment, self.sector_size)?;

        Ok(RootDescriptor {
            root_cid: commitment_to_cid(&root)?,
            subroot_cids: vec![content_id.clone()],
        })
    }

    fn persist(&self, piece: &Piece) -> Result<()> {
        if !self.store.update(piece, PieceStatus::Uploaded)? {
            return Err(PieceError::Conflict(format!(
                "piece {} changed during submission",
                piece.id
            )));
        }
        Ok(())
    }
}
