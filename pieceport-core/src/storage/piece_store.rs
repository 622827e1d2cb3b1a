use crate::error::{PieceError, Result};
use crate::piece::{Piece, PieceStatus};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ffi, params};
use std::path::{Path, PathBuf};
use std::time::Duration;

const PIECE_COLUMNS: &str = "id, source_path, raw_size, padded_size, piece_size, commitment_digest,
     content_id, proof_set_id, root_cid, transaction_ref, status, error_message,
     submitted_at, tx_success, confirmed_block, confirmed_tx_hash, receipt, created_at, updated_at";

/// Durable piece table backed by SQLite.
pub struct PieceStore {
    db_path: PathBuf,
}

impl PieceStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        store.init_schema()?;
        Ok(store)
    }

    /// Path of the backing SQLite file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn get_conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.get_conn()?;

        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS pieces (
                pk INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                source_path TEXT,
                raw_size INTEGER,
                padded_size INTEGER,
                piece_size INTEGER,
                commitment_digest TEXT,
                content_id TEXT UNIQUE,
                proof_set_id INTEGER,
                root_cid TEXT,
                transaction_ref TEXT,
                status TEXT NOT NULL,
                error_message TEXT,
                submitted_at TEXT,
                tx_success INTEGER,
                confirmed_block INTEGER,
                confirmed_tx_hash TEXT,
                receipt BLOB,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pieces_status ON pieces(status, pk)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_pieces_transaction_ref ON pieces(transaction_ref)",
            [],
        )?;

        Ok(())
    }

    /// Insert a new piece. A duplicate id or content id is a `Conflict`.
    pub fn create(&self, piece: &Piece) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            &format!(
                "INSERT INTO pieces ({}) VALUES
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                PIECE_COLUMNS
            ),
            params![
                piece.id,
                piece
                    .source_path
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
                piece.raw_size.map(|v| v as i64),
                piece.padded_size.map(|v| v as i64),
                piece.piece_size.map(|v| v as i64),
                piece.commitment_digest,
                piece.content_id,
                piece.proof_set_id.map(|v| v as i64),
                piece.root_cid,
                piece.transaction_ref,
                piece.status.as_str(),
                piece.error_message,
                piece.submitted_at.map(|t| t.to_rfc3339()),
                piece.tx_success,
                piece.confirmed_block,
                piece.confirmed_tx_hash,
                piece.receipt,
                piece.created_at.to_rfc3339(),
                piece.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| map_constraint(e, &piece.id))?;

        Ok(())
    }

    /// Get a piece by id.
    pub fn get(&self, id: &str) -> Result<Option<Piece>> {
        let conn = self.get_conn()?;

        let piece = conn
            .query_row(
                &format!("SELECT {} FROM pieces WHERE id = ?1", PIECE_COLUMNS),
                [id],
                row_to_piece,
            )
            .optional()?;

        Ok(piece)
    }

    /// Get the piece holding `content_id`, if any.
    pub fn get_by_content_id(&self, content_id: &str) -> Result<Option<Piece>> {
        let conn = self.get_conn()?;

        let piece = conn
            .query_row(
                &format!("SELECT {} FROM pieces WHERE content_id = ?1", PIECE_COLUMNS),
                [content_id],
                row_to_piece,
            )
            .optional()?;

        Ok(piece)
    }

    /// Write every mutable field of `piece`, but only if the stored row is
    /// still in `expected` status. Returns false when the row moved on.
    pub fn update(&self, piece: &Piece, expected: PieceStatus) -> Result<bool> {
        let conn = self.get_conn()?;

        let affected = conn
            .execute(
                "UPDATE pieces SET
                    source_path = ?1, raw_size = ?2, padded_size = ?3, piece_size = ?4,
                    commitment_digest = ?5, content_id = ?6, proof_set_id = ?7, root_cid = ?8,
                    transaction_ref = ?9, status = ?10, error_message = ?11, submitted_at = ?12,
                    tx_success = ?13, confirmed_block = ?14, confirmed_tx_hash = ?15,
                    receipt = ?16, updated_at = ?17
                 WHERE id = ?18 AND status = ?19",
                params![
                    piece
                        .source_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string()),
                    piece.raw_size.map(|v| v as i64),
                    piece.padded_size.map(|v| v as i64),
                    piece.piece_size.map(|v| v as i64),
                    piece.commitment_digest,
                    piece.content_id,
                    piece.proof_set_id.map(|v| v as i64),
                    piece.root_cid,
                    piece.transaction_ref,
                    piece.status.as_str(),
                    piece.error_message,
                    piece.submitted_at.map(|t| t.to_rfc3339()),
                    piece.tx_success,
                    piece.confirmed_block,
                    piece.confirmed_tx_hash,
                    piece.receipt,
                    piece.updated_at.to_rfc3339(),
                    piece.id,
                    expected.as_str(),
                ],
            )
            .map_err(|e| map_constraint(e, &piece.id))?;

        Ok(affected > 0)
    }

    /// Record the target proof set and root of an uploaded piece before its
    /// root is sent to the ledger. Only one claim per piece can succeed.
    pub fn claim_submission(&self, id: &str, proof_set_id: u64, root_cid: &str) -> Result<bool> {
        let conn = self.get_conn()?;

        let affected = conn.execute(
            "UPDATE pieces SET proof_set_id = ?1, root_cid = ?2, updated_at = ?3
             WHERE id = ?4 AND status = ?5 AND proof_set_id IS NULL AND transaction_ref IS NULL",
            params![
                proof_set_id as i64,
                root_cid,
                Utc::now().to_rfc3339(),
                id,
                PieceStatus::Uploaded.as_str(),
            ],
        )?;

        Ok(affected > 0)
    }

    /// Pieces in `status`, oldest first.
    pub fn list_by_status(&self, status: PieceStatus) -> Result<Vec<Piece>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pieces WHERE status = ?1 ORDER BY pk",
            PIECE_COLUMNS
        ))?;

        let rows = stmt.query_map([status.as_str()], row_to_piece)?;

        let mut pieces = Vec::new();
        for row in rows {
            pieces.push(row?);
        }

        Ok(pieces)
    }

    /// Up to `limit` pieces, oldest first.
    pub fn list(&self, limit: usize) -> Result<Vec<Piece>> {
        let conn = self.get_conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pieces ORDER BY pk LIMIT ?1",
            PIECE_COLUMNS
        ))?;

        let rows = stmt.query_map([limit as i64], row_to_piece)?;

        let mut pieces = Vec::new();
        for row in rows {
            pieces.push(row?);
        }

        Ok(pieces)
    }
}

fn map_constraint(error: rusqlite::Error, piece_id: &str) -> PieceError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            PieceError::Conflict(format!(
                "piece {} violates a uniqueness constraint: {}",
                piece_id,
                message.as_deref().unwrap_or("constraint violation")
            ))
        }
        _ => PieceError::Database(error),
    }
}

fn row_to_piece(row: &Row<'_>) -> rusqlite::Result<Piece> {
    let status: String = row.get(10)?;
    let status = status
        .parse::<PieceStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(10, Type::Text, Box::new(e)))?;

    Ok(Piece {
        id: row.get(0)?,
        source_path: row.get::<_, Option<String>>(1)?.map(PathBuf::from),
        raw_size: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
        padded_size: row.get::<_, Option<i64>>(3)?.map(|v| v as u64),
        piece_size: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
        commitment_digest: row.get(5)?,
        content_id: row.get(6)?,
        proof_set_id: row.get::<_, Option<i64>>(7)?.map(|v| v as u64),
        root_cid: row.get(8)?,
        transaction_ref: row.get(9)?,
        status,
        error_message: row.get(11)?,
        submitted_at: row
            .get::<_, Option<String>>(12)?
            .map(|t| parse_timestamp(12, &t))
            .transpose()?,
        tx_success: row.get(13)?,
        confirmed_block: row.get(14)?,
        confirmed_tx_hash: row.get(15)?,
        receipt: row.get(16)?,
        created_at: parse_timestamp(17, &row.get::<_, String>(17)?)?,
        updated_at: parse_timestamp(18, &row.get::<_, String>(18)?)?,
    })
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
