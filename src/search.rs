//! Homology Search Jobs
//!
//! One [`SearchJob`] is one BLAST invocation: a category's query file
//! against that category's reference database, with parameters fixed per
//! category (not user-tunable):
//!
//! ```text
//! -evalue 0.0001 -max_hsps 1 -num_descriptions 1 -num_alignments 1
//! -outfmt "6 std slen stitle"
//! ```

use std::path::{Path, PathBuf};

use crate::category::{Category, SearchMode};
use crate::error::{AnnotateError, Result};
use crate::runner::{CancelToken, CommandRunner, ToolCommand};

pub const EVALUE: &str = "0.0001";
pub const OUTFMT: &str = "6 std slen stitle";

/// A single category search. Immutable once built.
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub category: Category,
    pub mode: SearchMode,
    pub program: PathBuf,
    pub query: PathBuf,
    pub database: PathBuf,
    pub output: PathBuf,
    pub threads: usize,
}

impl SearchJob {
    /// The full BLAST command line.
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new(self.category.name(), &self.program)
            .opt("-query", &self.query)
            .opt("-db", &self.database)
            .opt("-evalue", EVALUE)
            .opt("-num_threads", self.threads.max(1).to_string())
            .opt("-max_hsps", "1")
            .opt("-num_descriptions", "1")
            .opt("-num_alignments", "1")
            .opt("-outfmt", OUTFMT)
            .opt("-out", &self.output)
    }

    /// Runs the search and returns the path of the raw hit table. The query
    /// is expected to have passed [`seqio::check_query`](crate::seqio::check_query).
    ///
    /// # Errors
    /// - `Execution` if BLAST exits non-zero
    /// - `MissingOutput` if BLAST succeeded but wrote no hit table
    /// - `Cancelled` if a sibling failure tripped `cancel`
    pub fn execute(&self, runner: &dyn CommandRunner, cancel: &CancelToken) -> Result<&Path> {
        runner.run(&self.command(), cancel)?;

        if !self.output.is_file() {
            return Err(AnnotateError::MissingOutput {
                operation: self.category.name().to_string(),
                path: self.output.clone(),
            });
        }
        Ok(&self.output)
    }
}

// ============================================================================
// Tests
// ============================================================================
