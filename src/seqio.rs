//! Sequence Input Module
//!
//! Minimal FASTA reading for the per-run query files (`.faa` proteins,
//! `.ffn` nucleotides). Files arrive already validated and gene-id tagged;
//! this module only confirms a query is usable before a search is spawned
//! and exposes the gene ids that key every annotation map.
//!
//! A gene id is the header text after '>' up to the first whitespace.

use rustc_hash::FxHashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{AnnotateError, Result};

// ============================================================================
// FASTA Format
// ============================================================================

/// A FASTA record: gene id and sequence.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    /// Identifier extracted from the header line.
    pub name: String,
    /// Residues, concatenated from all sequence lines.
    pub seq: String,
}

/// Sequential reader for FASTA files.
///
/// Reads records one at a time and strips line endings. Text before the
/// first header is ignored.
pub struct FastaReader {
    path: PathBuf,
    reader: BufReader<File>,
    line_buf: String,
    current_name: Option<String>,
}

impl FastaReader {
    /// Opens a FASTA file and positions the reader on the first header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| AnnotateError::io(&path, e))?;
        let mut reader = Self {
            path,
            reader: BufReader::with_capacity(1024 * 1024, file),
            line_buf: String::with_capacity(256),
            current_name: None,
        };

        loop {
            reader.line_buf.clear();
            if reader.read_line()? == 0 {
                break;
            }
            if let Some(header) = reader.line_buf.strip_prefix('>') {
                reader.current_name = Some(header_id(header));
                break;
            }
        }

        Ok(reader)
    }

    fn read_line(&mut self) -> Result<usize> {
        self.reader
            .read_line(&mut self.line_buf)
            .map_err(|e| AnnotateError::io(&self.path, e))
    }

    /// Reads the next record.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - a record was read
    /// - `Ok(None)` - end of file
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        let name = match self.current_name.take() {
            Some(n) => n,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(1024);

        loop {
            self.line_buf.clear();
            if self.read_line()? == 0 {
                break;
            }

            if let Some(header) = self.line_buf.strip_prefix('>') {
                self.current_name = Some(header_id(header));
                break;
            }
            seq.push_str(self.line_buf.trim());
        }

        Ok(Some(FastaRecord { name, seq }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

fn header_id(header: &str) -> String {
    header.split_whitespace().next().unwrap_or("").to_string()
}

// ============================================================================
// Query checks
// ============================================================================

/// Counts taken from a query file that passed [`check_query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuerySummary {
    pub records: usize,
    pub residues: usize,
}

/// Confirms `path` exists and holds at least one named, non-empty record.
///
/// # Errors
/// `InvalidInput` when the file is missing, empty, or has no usable record.
pub fn check_query(path: &Path) -> Result<QuerySummary> {
    let invalid = |reason: &str| AnnotateError::InvalidInput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    if !path.is_file() {
        return Err(invalid("file not found"));
    }

    let mut summary = QuerySummary { records: 0, residues: 0 };
    for record in FastaReader::open(path)? {
        let record = record?;
        if record.name.is_empty() {
            return Err(invalid("record without an identifier"));
        }
        summary.records += 1;
        summary.residues += record.seq.len();
    }

    if summary.records == 0 {
        return Err(invalid("no FASTA records"));
    }
    if summary.residues == 0 {
        return Err(invalid("all sequences are empty"));
    }
    Ok(summary)
}

/// All gene ids in a FASTA file.
pub fn gene_ids(path: &Path) -> Result<FxHashSet<String>> {
    let mut ids = FxHashSet::default();
    for record in FastaReader::open(path)? {
        ids.insert(record?.name);
    }
    Ok(ids)
}

// ============================================================================
// Tests
// ============================================================================
