pub mod add_piece_to_proof_set;
pub mod monitor_transaction;
pub mod prepare_piece;
pub mod reconcile_pending;
pub mod upload_piece;

pub use add_piece_to_proof_set::{AddPieceToProofSetOperation, AddPieceToProofSetOperationRequest};
pub use monitor_transaction::{
    MonitorTransactionOperation, MonitorTransactionOperationResult, ReconcileOutcome,
    apply_transaction_record,
};
pub use prepare_piece::{PieceSource, PreparePieceOperation, PreparePieceOperationRequest};
pub use reconcile_pending::{ReconcilePendingOperation, ReconcileReport};
pub use upload_piece::{UploadPieceOperation, UploadPieceOperationRequest, UploadPieceOperationResult};
