//! Storage modules for Pieceport
//!
//! Durable piece records in SQLite and padded piece bytes on the filesystem.

pub mod blob_store;
pub mod piece_store;

pub use blob_store::FileBlobStore;
pub use piece_store::PieceStore;
