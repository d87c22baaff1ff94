//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Construction-time failures (`Load`, `Format`, `Config`) are returned to the
//! caller. `NumericDegeneracy` is raised for a single pair and is recovered by
//! the batch decoder, which skips the pair and counts it.
//! `CapacityInvariantViolation` means the batch buffer state machine was
//! driven incorrectly and is always fatal.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for ASMC operations
#[derive(Error, Debug)]
pub enum AsmcError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed or inconsistent precomputed quantities, or a bad panel header
    #[error("Load error ({what}): {message}")]
    Load { what: String, message: String },

    /// Malformed panel body (truncated file, bad allele, site count mismatch)
    #[error("Format error in {path} at line {line}: {message}")]
    Format {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Contradictory or out-of-range configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid arguments to a decoding call (unknown individual, bad haplotype slot)
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// The forward-backward recursion produced no valid posterior for a pair
    #[error("Numeric degeneracy while decoding {pair}: {message}")]
    NumericDegeneracy { pair: String, message: String },

    /// The batch buffer grew past its capacity without being flushed
    #[error("Batch buffer holds {len} observations, capacity is {capacity}")]
    CapacityInvariantViolation { len: usize, capacity: usize },

    /// A batch flush failed part way; `dropped` queued observations were never decoded
    #[error("Batch aborted with {dropped} observations left undecoded: {source}")]
    BatchAborted {
        dropped: usize,
        #[source]
        source: Box<AsmcError>,
    },

    /// File not found errors
    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },
}

/// Type alias for Results using AsmcError
pub type Result<T> = std::result::Result<T, AsmcError>;

impl AsmcError {
    /// Create a load error for the named input
    pub fn load(what: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Load {
            what: what.into(),
            message: message.into(),
        }
    }

    /// Create a format error at a 1-based line of a file
    pub fn format(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid data error
    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Create a numeric degeneracy error for a pair description
    pub fn degenerate(pair: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NumericDegeneracy {
            pair: pair.into(),
            message: message.into(),
        }
    }

    /// True for errors that only concern a single pair and can be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NumericDegeneracy { .. })
    }
}
