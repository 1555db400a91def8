//! Error types for annotation runs.
//!
//! Every variant names the operation (category or tool) or the file it
//! concerns, so a failed run tells the caller what broke rather than just
//! that annotation failed.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, AnnotateError>;

#[derive(Error, Debug)]
pub enum AnnotateError {
    /// An external tool ran and exited non-zero (or could not be started).
    #[error("{operation}: {tool} failed (exit code: {code:?}): {stderr}")]
    Execution {
        tool: String,
        operation: String,
        code: Option<i32>,
        stderr: String,
    },

    /// A tool reported success but the expected result file is absent.
    #[error("{operation}: expected output not found: {}", path.display())]
    MissingOutput { operation: String, path: PathBuf },

    /// A hit-file or gene-table line does not have the expected shape.
    #[error("{}:{line}: malformed record: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A query sequence file is missing, empty or not FASTA.
    #[error("invalid input {}: {reason}", path.display())]
    InvalidInput { path: PathBuf, reason: String },

    #[error("missing database '{name}': {}", path.display())]
    MissingDatabase { name: String, path: PathBuf },

    #[error("configuration error: {message}")]
    Config { message: String },

    /// The operation was stopped because a sibling operation failed first.
    #[error("{operation}: cancelled")]
    Cancelled { operation: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl AnnotateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
