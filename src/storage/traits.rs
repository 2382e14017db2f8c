//! Storage traits and error types
//!
//! This module defines the trait interface for storage backends and
//! associated error types.

use crate::crawler::{Cursor, ParsedDocument};
use crate::storage::{CrawlRun, DocumentId};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Sessions on different workers share one store, so implementations must be
/// usable through `&self` from several threads.
pub trait Store: Send + Sync {
    // ===== Documents =====

    /// Saves a parsed document for a source
    ///
    /// Saving a document whose content hash is already stored is not an
    /// error; the existing id is returned.
    ///
    /// # Arguments
    ///
    /// * `source_id` - The source the document was collected for
    /// * `document` - The parsed document
    ///
    /// # Returns
    ///
    /// The id of the stored (or previously stored) document
    fn save(&self, source_id: &str, document: &ParsedDocument) -> StorageResult<DocumentId>;

    /// Counts documents stored for a source
    fn count_documents(&self, source_id: &str) -> StorageResult<u64>;

    // ===== Crawl Runs =====

    /// Appends a finished session record
    fn record_run(&self, run: &CrawlRun) -> StorageResult<()>;

    /// Runs of a source, newest first
    fn runs_for(&self, source_id: &str, limit: usize) -> StorageResult<Vec<CrawlRun>>;

    /// Most recent run of a source
    fn latest_run(&self, source_id: &str) -> StorageResult<Option<CrawlRun>>;

    /// Most recent runs across all sources, newest first
    fn recent_runs(&self, limit: usize) -> StorageResult<Vec<CrawlRun>>;

    // ===== Checkpoints =====

    fn save_checkpoint(&self, source_id: &str, cursor: &Cursor) -> StorageResult<()>;

    fn load_checkpoint(&self, source_id: &str) -> StorageResult<Option<Cursor>>;

    fn clear_checkpoint(&self, source_id: &str) -> StorageResult<()>;
}
