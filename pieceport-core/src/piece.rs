use crate::{PieceError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceStatus {
    Prepared,
    Uploaded,
    PendingConfirmation,
    #[serde(rename = "added_to_proofset")]
    AddedToProofSet,
    TransactionFailed,
    Error,
}

impl PieceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::Uploaded => "uploaded",
            Self::PendingConfirmation => "pending_confirmation",
            Self::AddedToProofSet => "added_to_proofset",
            Self::TransactionFailed => "transaction_failed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::AddedToProofSet | Self::TransactionFailed | Self::Error
        )
    }

    /// The only edges a piece may move along.
    pub fn can_transition_to(&self, next: PieceStatus) -> bool {
        matches!(
            (self, next),
            (Self::Prepared, Self::Uploaded)
                | (Self::Uploaded, Self::PendingConfirmation)
                | (Self::Uploaded, Self::Error)
                | (Self::PendingConfirmation, Self::AddedToProofSet)
                | (Self::PendingConfirmation, Self::TransactionFailed)
                | (Self::PendingConfirmation, Self::Error)
        )
    }
}

impl fmt::Display for PieceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PieceStatus {
    type Err = PieceError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "prepared" => Ok(Self::Prepared),
            "uploaded" => Ok(Self::Uploaded),
            "pending_confirmation" => Ok(Self::PendingConfirmation),
            "added_to_proofset" => Ok(Self::AddedToProofSet),
            "transaction_failed" => Ok(Self::TransactionFailed),
            "error" => Ok(Self::Error),
            other => Err(PieceError::Persistence(format!(
                "unknown piece status: {}",
                other
            ))),
        }
    }
}

/// Piece record as stored in the piece table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Piece {
    pub id: String,
    pub source_path: Option<PathBuf>,
    pub raw_size: Option<u64>,
    pub padded_size: Option<u64>,
    pub piece_size: Option<u64>,
    pub commitment_digest: Option<String>,
    pub content_id: Option<String>,
    pub proof_set_id: Option<u64>,
    pub root_cid: Option<String>,
    pub transaction_ref: Option<String>,
    pub status: PieceStatus,
    pub error_message: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub tx_success: Option<bool>,
    pub confirmed_block: Option<i64>,
    pub confirmed_tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Piece {
    pub fn prepared(id: String, source_path: Option<PathBuf>, raw_size: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            id,
            source_path,
            raw_size,
            padded_size: None,
            piece_size: None,
            commitment_digest: None,
            content_id: None,
            proof_set_id: None,
            root_cid: None,
            transaction_ref: None,
            status: PieceStatus::Prepared,
            error_message: None,
            submitted_at: None,
            tx_success: None,
            confirmed_block: None,
            confirmed_tx_hash: None,
            receipt: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, refusing any edge outside the lifecycle graph.
    pub fn transition(&mut self, next: PieceStatus, operation: &str) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(self.invalid_state(operation));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn invalid_state(&self, operation: &str) -> PieceError {
        PieceError::InvalidState {
            piece_id: self.id.clone(),
            operation: operation.to_string(),
            status: self.status.to_string(),
        }
    }

    pub fn summary(&self) -> PieceSummary {
        PieceSummary {
            id: self.id.clone(),
            status: self.status,
            transaction_ref: self.transaction_ref.clone(),
            submitted_at: self.submitted_at,
            error_message: self.error_message.clone(),
        }
    }
}

/// Transaction-facing subset of a piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceSummary {
    pub id: String,
    pub status: PieceStatus,
    pub transaction_ref: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
