//! Error taxonomy for the retrieval core.
//!
//! [`Error::is_document_level`] separates per-document failures, which
//! ingestion skips, from model and index failures, which abort.

use thiserror::Error;

use crate::models::RecordId;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the chunker, embedders, vector indexes and retriever.
#[derive(Debug, Error)]
pub enum Error {
    /// A single document could not be turned into text.
    #[error("failed to extract '{path}': {message}")]
    Extraction { path: String, message: String },

    /// No extractor is registered for the file extension.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The embedding model could not be loaded.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// The embedding model was loaded but inference failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// A vector's length disagrees with the collection's dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Persisted index data is unreadable or inconsistent.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// A record with this id already exists in the collection.
    #[error("duplicate record id: {0}")]
    DuplicateId(RecordId),

    /// Caller supplied an argument outside the operation's contract.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend failed (disk, database, lock file).
    #[error("storage error: {0}")]
    Storage(String),

    /// Another ingestion run currently owns the collection.
    #[error("ingestion already in progress for collection '{0}'")]
    IngestInProgress(String),
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn storage(message: impl ToString) -> Self {
        Self::Storage(message.to_string())
    }

    pub fn extraction(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Whether ingestion may skip the offending document and continue.
    pub fn is_document_level(&self) -> bool {
        matches!(self, Self::Extraction { .. } | Self::UnsupportedFormat(_))
    }
}
