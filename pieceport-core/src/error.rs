use thiserror::Error;

pub type Result<T> = std::result::Result<T, PieceError>;

#[derive(Debug, Error)]
pub enum PieceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Piece not found: {0}")]
    PieceNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Cannot {operation} piece {piece_id} in status {status}")]
    InvalidState {
        piece_id: String,
        operation: String,
        status: String,
    },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{operation} failed for piece {piece_id}: {source}")]
    Operation {
        operation: &'static str,
        piece_id: String,
        #[source]
        source: Box<PieceError>,
    },
}

/// Coarse classification used by callers that map errors onto a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Ledger,
    Persistence,
    Internal,
}

impl PieceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Config(_) => ErrorKind::Validation,
            Self::PieceNotFound(_) | Self::TransactionNotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState { .. } => ErrorKind::State,
            Self::Ledger(_) | Self::Http(_) => ErrorKind::Ledger,
            Self::Persistence(_) | Self::Database(_) | Self::Io(_) => ErrorKind::Persistence,
            Self::Internal(_) => ErrorKind::Internal,
            Self::Operation { source, .. } => source.kind(),
        }
    }

    /// Attach the operation name and piece id. Already-wrapped errors are
    /// returned untouched so nested operations do not stack context.
    pub fn context(self, operation: &'static str, piece_id: impl Into<String>) -> Self {
        match self {
            Self::Operation { .. } => self,
            other => Self::Operation {
                operation,
                piece_id: piece_id.into(),
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, with any operation context peeled off.
    pub fn root(&self) -> &PieceError {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }
}
