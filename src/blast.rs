//! BLAST Tabular Output Parser
//!
//! Parses hit tables written with `-outfmt "6 std slen stitle"`.
//!
//! # Columns (14, tab-separated)
//! ```text
//! Col  Type    Description
//! 1    string  Query id (gene id)
//! 2    string  Subject id, pipe-delimited; segment 2 is the category label
//! 3    float   Percent identity (0-100)
//! 4    int     Alignment length
//! 5    int     Mismatches
//! 6    int     Gap opens
//! 7    int     Query start
//! 8    int     Query end
//! 9    int     Subject start
//! 10   int     Subject end
//! 11   float   E-value
//! 12   float   Bit score
//! 13   int     Subject length
//! 14   string  Subject title
//! ```
//!
//! # Normalized score
//! `(alignment length / subject length) * (identity / 100)`. The coverage
//! term is not capped, so gapped alignments longer than the subject can
//! score above plain identity.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::error::{AnnotateError, Result};

/// Number of columns in `6 std slen stitle` output.
pub const FIELD_COUNT: usize = 14;

/// Why a single line could not be turned into a [`BlastHit`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseHitError {
    #[error("expected 14 tab-separated fields, found {0}")]
    FieldCount(usize),
    #[error("invalid {field}: '{value}'")]
    InvalidNumber { field: &'static str, value: String },
    #[error("{0} must be positive")]
    ZeroLength(&'static str),
    #[error("percent identity {0} outside 0-100")]
    IdentityRange(f64),
    #[error("no category label in subject id '{0}'")]
    NoLabel(String),
}

// ============================================================================
// BLAST hit
// ============================================================================

/// One line of tabular BLAST output.
#[derive(Debug, Clone, PartialEq)]
pub struct BlastHit {
    /// Query sequence id (column 1).
    pub query_id: String,
    /// Subject sequence id (column 2).
    pub subject_id: String,
    /// Percent identity, 0-100 (column 3).
    pub identity: f64,
    /// Alignment length (column 4).
    pub align_len: u32,
    pub mismatches: u32,
    pub gap_opens: u32,
    pub query_start: u32,
    pub query_end: u32,
    pub subject_start: u32,
    pub subject_end: u32,
    pub evalue: f64,
    pub bitscore: f64,
    /// Subject sequence length (column 13).
    pub subject_len: u32,
    /// Subject title (column 14).
    pub subject_title: String,
}

impl BlastHit {
    /// Parses one tab-separated line.
    ///
    /// # Errors
    /// - the line does not have exactly 14 fields
    /// - a numeric field does not parse
    /// - alignment or subject length is zero
    /// - identity is outside 0-100
    pub fn parse_line(line: &str) -> std::result::Result<Self, ParseHitError> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != FIELD_COUNT {
            return Err(ParseHitError::FieldCount(fields.len()));
        }

        let hit = Self {
            query_id: fields[0].to_string(),
            subject_id: fields[1].to_string(),
            identity: parse_num(fields[2], "percent identity")?,
            align_len: parse_num(fields[3], "alignment length")?,
            mismatches: parse_num(fields[4], "mismatches")?,
            gap_opens: parse_num(fields[5], "gap opens")?,
            query_start: parse_num(fields[6], "query start")?,
            query_end: parse_num(fields[7], "query end")?,
            subject_start: parse_num(fields[8], "subject start")?,
            subject_end: parse_num(fields[9], "subject end")?,
            evalue: parse_num(fields[10], "e-value")?,
            bitscore: parse_num(fields[11], "bit score")?,
            subject_len: parse_num(fields[12], "subject length")?,
            subject_title: fields[13].to_string(),
        };

        if hit.align_len == 0 {
            return Err(ParseHitError::ZeroLength("alignment length"));
        }
        if hit.subject_len == 0 {
            return Err(ParseHitError::ZeroLength("subject length"));
        }
        if !(0.0..=100.0).contains(&hit.identity) {
            return Err(ParseHitError::IdentityRange(hit.identity));
        }
        Ok(hit)
    }

    /// Fraction of the subject spanned by the alignment. Not capped at 1.
    pub fn coverage(&self) -> f64 {
        self.align_len as f64 / self.subject_len as f64
    }

    /// Coverage × identity fraction.
    pub fn score(&self) -> f64 {
        self.coverage() * (self.identity / 100.0)
    }

    /// Category label: second `|` segment of the subject id, or of the
    /// subject title when the id carries none.
    pub fn label(&self) -> std::result::Result<&str, ParseHitError> {
        second_segment(&self.subject_id)
            .or_else(|| second_segment(&self.subject_title))
            .ok_or_else(|| ParseHitError::NoLabel(self.subject_id.clone()))
    }
}

fn parse_num<T: std::str::FromStr>(
    value: &str,
    field: &'static str,
) -> std::result::Result<T, ParseHitError> {
    value.trim().parse().map_err(|_| ParseHitError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn second_segment(s: &str) -> Option<&str> {
    s.split('|').nth(1).filter(|seg| !seg.is_empty())
}

// ============================================================================
// Reader
// ============================================================================

/// Sequential reader for BLAST tabular files.
///
/// Skips blank lines and `#` comment lines. Any other line that does not
/// parse becomes `MalformedRecord` carrying the file path and line number.
pub struct BlastTabReader {
    path: PathBuf,
    reader: BufReader<File>,
    line_buf: String,
    line_no: usize,
}

impl BlastTabReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| AnnotateError::io(&path, e))?;
        Ok(Self {
            path,
            reader: BufReader::with_capacity(256 * 1024, file),
            line_buf: String::with_capacity(512),
            line_no: 0,
        })
    }

    /// Line number of the record most recently returned (1-based).
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next hit.
    ///
    /// # Returns
    /// - `Ok(Some(hit))` - a hit was read
    /// - `Ok(None)` - end of file
    /// - `Err(e)` - I/O error or malformed line
    pub fn read_next(&mut self) -> Result<Option<BlastHit>> {
        loop {
            self.line_buf.clear();
            let n = self
                .reader
                .read_line(&mut self.line_buf)
                .map_err(|e| AnnotateError::io(&self.path, e))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line_buf.trim_end_matches(['\n', '\r']);
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }

            return BlastHit::parse_line(line)
                .map(Some)
                .map_err(|e| AnnotateError::malformed(&self.path, self.line_no, e.to_string()));
        }
    }
}

impl Iterator for BlastTabReader {
    type Item = Result<BlastHit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next().transpose()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(identity: &str, align_len: &str, subject_len: &str, subject: &str) -> String {
        format!(
            "gene1\t{subject}\t{identity}\t{align_len}\t5\t0\t1\t150\t1\t150\t1e-50\t250\t{subject_len}\t{subject}"
        )
    }

    #[test]
    fn test_parse_blast_line() {
        let hit = BlastHit::parse_line(&line("90.0", "150", "150", "db|TRANSPOSASE|desc")).unwrap();
        assert_eq!(hit.query_id, "gene1");
        assert_eq!(hit.subject_id, "db|TRANSPOSASE|desc");
        assert_eq!(hit.identity, 90.0);
        assert_eq!(hit.align_len, 150);
        assert_eq!(hit.subject_len, 150);
        assert_eq!(hit.evalue, 1e-50);
        assert_eq!(hit.label().unwrap(), "TRANSPOSASE");
    }

    #[test]
    fn test_score_full_coverage() {
        let hit = BlastHit::parse_line(&line("90", "150", "150", "db|TRANSPOSASE|desc")).unwrap();
        assert!((hit.score() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_score_partial_coverage() {
        let hit = BlastHit::parse_line(&line("50", "100", "200", "db|X|y")).unwrap();
        assert!((hit.score() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_score_in_unit_interval_when_aligned_within_subject() {
        for (ident, aln, slen) in [("100", "10", "10"), ("0.5", "1", "1000"), ("73.2", "211", "240")] {
            let hit = BlastHit::parse_line(&line(ident, aln, slen, "db|L|d")).unwrap();
            let s = hit.score();
            assert!(s > 0.0 && s <= 1.0, "score {s} for {ident}/{aln}/{slen}");
        }
    }

    #[test]
    fn test_alignment_longer_than_subject_is_accepted_uncapped() {
        let hit = BlastHit::parse_line(&line("100", "120", "100", "db|IS3|d")).unwrap();
        assert!((hit.coverage() - 1.2).abs() < 1e-12);
        assert!((hit.score() - 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_label_falls_back_to_title() {
        let raw = "g\tsp0001\t99\t10\t0\t0\t1\t10\t1\t10\t0\t20\t10\tVFDB|VF0001|adhesin";
        let hit = BlastHit::parse_line(raw).unwrap();
        assert_eq!(hit.label().unwrap(), "VF0001");

        let raw = "g\tsp0001\t99\t10\t0\t0\t1\t10\t1\t10\t0\t20\t10\tno label here";
        let hit = BlastHit::parse_line(raw).unwrap();
        assert!(matches!(hit.label(), Err(ParseHitError::NoLabel(_))));
    }

    #[test]
    fn test_invalid_lines() {
        assert_eq!(
            BlastHit::parse_line("incomplete\tline"),
            Err(ParseHitError::FieldCount(2))
        );
        assert!(matches!(
            BlastHit::parse_line(&line("high", "150", "150", "db|A|b")),
            Err(ParseHitError::InvalidNumber { field: "percent identity", .. })
        ));
        assert_eq!(
            BlastHit::parse_line(&line("90", "150", "0", "db|A|b")),
            Err(ParseHitError::ZeroLength("subject length"))
        );
        assert_eq!(
            BlastHit::parse_line(&line("101", "150", "150", "db|A|b")),
            Err(ParseHitError::IdentityRange(101.0))
        );
    }

    #[test]
    fn test_reader_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vf.m8");
        let content = format!(
            "{}\n\n# comment\n{}\nbroken\tline\n",
            line("90", "150", "150", "db|A|b"),
            line("80", "150", "150", "db|B|b")
        );
        std::fs::write(&path, content).unwrap();

        let mut reader = BlastTabReader::open(&path).unwrap();
        assert_eq!(reader.read_next().unwrap().unwrap().label().unwrap(), "A");
        assert_eq!(reader.read_next().unwrap().unwrap().label().unwrap(), "B");
        assert_eq!(reader.line_no(), 4);
        match reader.read_next() {
            Err(AnnotateError::MalformedRecord { line, path: p, .. }) => {
                assert_eq!(line, 5);
                assert_eq!(p, path);
            }
            other => panic!("expected malformed record, got {other:?}"),
        }
    }
}
