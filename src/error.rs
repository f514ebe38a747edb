//! Error types for seglog
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using SeglogError
pub type Result<T> = std::result::Result<T, SeglogError>;

/// Unified error type for seglog operations
///
/// A missing key is not an error: `Engine::get` returns `Ok(None)`.
#[derive(Debug, Error)]
pub enum SeglogError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    /// Framing inconsistency in a segment file
    #[error("Segment corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Write Path Errors
    // -------------------------------------------------------------------------
    #[error("Record of {size} bytes exceeds the segment size limit of {limit} bytes")]
    RecordTooLarge { size: u64, limit: u64 },

    #[error("Key must not be empty")]
    EmptyKey,

    // -------------------------------------------------------------------------
    // Compaction Errors
    // -------------------------------------------------------------------------
    #[error("Compaction error: {0}")]
    Compaction(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
