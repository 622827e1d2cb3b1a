use crate::{Piece, PieceError, PieceStore, Result};
use std::path::PathBuf;
use std::sync::Arc;
use ulid::Ulid;

#[derive(Clone)]
pub struct PreparePieceOperation {
    store: Arc<PieceStore>,
}

#[derive(Debug, Clone)]
pub enum PieceSource {
    /// A local file whose bytes will become the piece.
    File(PathBuf),
    /// Bytes arrive later through upload; the size may be announced up front.
    Declared { size: Option<u64> },
}

#[derive(Debug, Clone)]
pub struct PreparePieceOperationRequest {
    pub source: PieceSource,
}

impl PreparePieceOperation {
    pub fn new(store: Arc<PieceStore>) -> Self {
        Self { store }
    }

    pub async fn run(&self, request: PreparePieceOperationRequest) -> Result<Piece> {
        let (source_path, raw_size) = match request.source {
            PieceSource::File(path) => {
                let meta = tokio::fs::metadata(&path).await.map_err(|e| {
                    PieceError::Validation(format!(
                        "cannot read source file {}: {}",
                        path.display(),
                        e
                    ))
                })?;

                if !meta.is_file() {
                    return Err(PieceError::Validation(format!(
                        "source {} is not a regular file",
                        path.display()
                    )));
                }
                if meta.len() == 0 {
                    return Err(PieceError::Validation(format!(
                        "source file {} is empty",
                        path.display()
                    )));
                }

                (Some(path), Some(meta.len()))
            }
            PieceSource::Declared { size: Some(0) } => {
                return Err(PieceError::Validation(
                    "declared piece size must be greater than zero".to_string(),
                ));
            }
            PieceSource::Declared { size } => (None, size),
        };

        let piece = Piece::prepared(Ulid::new().to_string(), source_path, raw_size);
        self.store.create(&piece)?;

        tracing::info!(
            piece_id = %piece.id,
            source = ?piece.source_path,
            raw_size = ?piece.raw_size,
            "prepared piece"
        );

        Ok(piece)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PieceStatus;

    fn operation() -> (tempfile::TempDir, PreparePieceOperation) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PieceStore::new(temp_dir.path().join("pieces.db")).unwrap());
        (temp_dir, PreparePieceOperation::new(store))
    }

    #[tokio::test]
    async fn test_prepare_from_file() {
        let (dir, op) = operation();
        let path = dir.path().join("input.bin");
        std::fs::write(&path, b"hello world").unwrap();

        let piece = op
            .run(PreparePieceOperationRequest {
                source: PieceSource::File(path.clone()),
            })
            .await
            .unwrap();

        assert_eq!(piece.status, PieceStatus::Prepared);
        assert_eq!(piece.raw_size, Some(11));
        assert_eq!(piece.source_path, Some(path));
        assert!(piece.content_id.is_none());
        assert_eq!(op.store.get(&piece.id).unwrap().unwrap().id, piece.id);
    }

    #[tokio::test]
    async fn test_prepare_assigns_unique_ids() {
        let (_dir, op) = operation();
        let request = PreparePieceOperationRequest {
            source: PieceSource::Declared { size: None },
        };

        let first = op.run(request.clone()).await.unwrap();
        let second = op.run(request).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_prepare_rejects_bad_sources() {
        let (dir, op) = operation();
        let empty = dir.path().join("empty.bin");
        std::fs::write(&empty, b"").unwrap();

        for source in [
            PieceSource::File(dir.path().join("missing.bin")),
            PieceSource::File(empty),
            PieceSource::File(dir.path().to_path_buf()),
            PieceSource::Declared { size: Some(0) },
        ] {
            let err = op
                .run(PreparePieceOperationRequest { source })
                .await
                .unwrap_err();
            assert!(matches!(err, PieceError::Validation(_)), "{err}");
        }
    }
}
