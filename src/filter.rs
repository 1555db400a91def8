//! Hit Threshold Filter
//!
//! Reduces a BLAST hit table to one label per gene. A hit is accepted when
//! its normalized score reaches the category threshold (inclusive). When a
//! gene has several accepted hits, a [`TieBreak`] decides which label is
//! kept.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::path::Path;

use crate::blast::{BlastHit, BlastTabReader};
use crate::bundle::AnnotationMap;
use crate::error::{AnnotateError, Result};

/// Slack for floating-point rounding in [`BlastHit::score`]. Scores are
/// products of small ratios, so a hit exactly on the threshold can come out
/// one ulp below it.
const SCORE_TOLERANCE: f64 = 1e-9;

/// How repeated accepted hits for one gene are reduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// The last accepted hit in file order wins.
    #[default]
    LastWins,
    /// The highest-scoring accepted hit wins; equal scores go to the later hit.
    BestScore,
}

/// Accepted labels plus counters for one hit table.
#[derive(Debug, Clone, Default)]
pub struct FilterOutcome {
    pub hits: AnnotationMap,
    /// Hit lines parsed.
    pub records: usize,
    /// Hits at or above the threshold.
    pub accepted: usize,
    /// Accepted hits that replaced an earlier label for the same gene.
    pub replaced: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct HitFilter {
    pub threshold: f64,
    pub tie_break: TieBreak,
}

impl HitFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold, tie_break: TieBreak::default() }
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_break = tie_break;
        self
    }

    /// Whether a single hit qualifies. The threshold is inclusive.
    pub fn accepts(&self, hit: &BlastHit) -> bool {
        hit.score() + SCORE_TOLERANCE >= self.threshold
    }

    /// Filters the hit table at `path`.
    ///
    /// # Errors
    /// `Io` when the file cannot be read; `MalformedRecord` for the first
    /// line that does not parse, or an accepted hit without a label.
    pub fn apply(&self, path: &Path) -> Result<FilterOutcome> {
        let mut reader = BlastTabReader::open(path)?;
        let mut reducer = Reducer::new(self.tie_break);
        let mut records = 0;

        while let Some(hit) = reader.read_next()? {
            records += 1;
            if !self.accepts(&hit) {
                continue;
            }
            let label = hit
                .label()
                .map_err(|e| AnnotateError::malformed(path, reader.line_no(), e.to_string()))?;
            reducer.push(&hit.query_id, label, hit.score());
        }

        Ok(reducer.finish(records))
    }
}

/// Applies the tie-break over accepted hits keyed by gene id.
struct Reducer {
    tie_break: TieBreak,
    best: FxHashMap<String, (f64, String)>,
    accepted: usize,
    replaced: usize,
}

impl Reducer {
    fn new(tie_break: TieBreak) -> Self {
        Self {
            tie_break,
            best: FxHashMap::default(),
            accepted: 0,
            replaced: 0,
        }
    }

    fn push(&mut self, gene_id: &str, label: &str, score: f64) {
        self.accepted += 1;
        match self.best.get_mut(gene_id) {
            None => {
                self.best.insert(gene_id.to_string(), (score, label.to_string()));
            }
            Some(entry) => {
                let take = match self.tie_break {
                    TieBreak::LastWins => true,
                    TieBreak::BestScore => score >= entry.0,
                };
                if take {
                    *entry = (score, label.to_string());
                    self.replaced += 1;
                }
            }
        }
    }

    fn finish(self, records: usize) -> FilterOutcome {
        FilterOutcome {
            hits: self
                .best
                .into_iter()
                .map(|(gene, (_, label))| (gene, label))
                .collect(),
            records,
            accepted: self.accepted,
            replaced: self.replaced,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::category::{Category, DEFAULT_THRESHOLD, RESISTANCE_THRESHOLD};
    use std::path::PathBuf;

    fn row(gene: &str, identity: f64, align_len: u32, subject_len: u32, subject: &str) -> String {
        format!(
            "{gene}\t{subject}\t{identity}\t{align_len}\t0\t0\t1\t{align_len}\t1\t{align_len}\t1e-30\t200\t{subject_len}\t{subject}\n"
        )
    }

    fn write_hits(dir: &Path, rows: &[String]) -> PathBuf {
        let path = dir.join("hits.m8");
        std::fs::write(&path, rows.concat()).unwrap();
        path
    }

    #[test]
    fn test_accepts_transposase_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[row("gene_1", 90.0, 150, 150, "db|TRANSPOSASE|desc")]);

        let out = HitFilter::new(Category::Transposase.threshold()).apply(&path).unwrap();
        assert_eq!(out.hits.len(), 1);
        assert_eq!(out.hits["gene_1"], "TRANSPOSASE");
        assert_eq!(out.records, 1);
        assert_eq!(out.accepted, 1);
    }

    #[test]
    fn test_rejects_low_score_hit() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[row("gene_1", 50.0, 100, 200, "db|VF|desc")]);

        let out = HitFilter::new(DEFAULT_THRESHOLD).apply(&path).unwrap();
        assert!(out.hits.is_empty());
        assert!(!out.hits.contains_key("gene_1"));
        assert_eq!(out.records, 1);
        assert_eq!(out.accepted, 0);
    }

    #[test]
    fn test_threshold_is_inclusive() {
        // 80/100 coverage at 80% identity sits on the 0.64 boundary
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[row("gene_1", 80.0, 80, 100, "db|MER|desc")]);

        let filter = HitFilter::new(0.64);
        let exact = BlastHit::parse_line(row("gene_0", 64.0, 100, 100, "db|IS1|d").trim_end()).unwrap();
        assert_eq!(exact.score(), 0.64);
        assert!(filter.accepts(&exact));

        let out = filter.apply(&path).unwrap();
        assert_eq!(out.hits.get("gene_1").map(String::as_str), Some("MER"));

        // 90/100 coverage at 90% identity sits on the 0.81 boundary
        let path = write_hits(dir.path(), &[row("gene_2", 90.0, 90, 100, "db|blaTEM|desc")]);
        let out = HitFilter::new(RESISTANCE_THRESHOLD).apply(&path).unwrap();
        assert_eq!(out.hits.get("gene_2").map(String::as_str), Some("blaTEM"));
    }

    #[test]
    fn test_exact_threshold_survives_rounding() {
        // 200/300 * 0.96 and 240/270 * 0.72 are exactly 0.64 but round below it
        let filter = HitFilter::new(DEFAULT_THRESHOLD);
        for (identity, align_len, subject_len) in [(96.0, 200, 300), (72.0, 240, 270)] {
            let hit = BlastHit::parse_line(
                row("gene_1", identity, align_len, subject_len, "db|IS3|d").trim_end(),
            )
            .unwrap();
            assert!(filter.accepts(&hit), "{identity}/{align_len}/{subject_len}");
        }

        let below = BlastHit::parse_line(row("gene_1", 95.9, 200, 300, "db|IS3|d").trim_end()).unwrap();
        assert!(!filter.accepts(&below));

        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[row("gene_7", 96.0, 200, 300, "db|IS3|d")]);
        assert_eq!(filter.apply(&path).unwrap().hits["gene_7"], "IS3");

        let resistance = HitFilter::new(RESISTANCE_THRESHOLD);
        let hit = BlastHit::parse_line(row("gene_2", 90.0, 270, 300, "db|blaOXA|d").trim_end()).unwrap();
        assert!(resistance.accepts(&hit));
    }

    #[test]
    fn test_last_qualifying_hit_wins_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(
            dir.path(),
            &[
                row("gene_1", 99.0, 100, 100, "db|FIRST|desc"),
                row("gene_1", 70.0, 100, 100, "db|SECOND|desc"),
                row("gene_1", 20.0, 100, 100, "db|REJECTED|desc"),
            ],
        );

        let out = HitFilter::new(0.64).apply(&path).unwrap();
        assert_eq!(out.hits["gene_1"], "SECOND");
        assert_eq!(out.accepted, 2);
        assert_eq!(out.replaced, 1);
    }

    #[test]
    fn test_best_score_tie_break() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(
            dir.path(),
            &[
                row("gene_1", 99.0, 100, 100, "db|FIRST|desc"),
                row("gene_1", 70.0, 100, 100, "db|SECOND|desc"),
                row("gene_2", 70.0, 100, 100, "db|A|desc"),
                row("gene_2", 70.0, 100, 100, "db|B|desc"),
            ],
        );

        let out = HitFilter::new(0.64)
            .with_tie_break(TieBreak::BestScore)
            .apply(&path)
            .unwrap();
        assert_eq!(out.hits["gene_1"], "FIRST");
        assert_eq!(out.hits["gene_2"], "B");
        assert_eq!(out.replaced, 1);
    }

    #[test]
    fn test_malformed_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(
            dir.path(),
            &[
                row("gene_1", 90.0, 150, 150, "db|A|desc"),
                "gene_2\tdb|B|desc\tNaNish\n".to_string(),
            ],
        );

        match HitFilter::new(0.64).apply(&path) {
            Err(AnnotateError::MalformedRecord { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_accepted_hit_without_label_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[row("gene_1", 90.0, 150, 150, "nolabel")]);
        assert!(matches!(
            HitFilter::new(0.64).apply(&path),
            Err(AnnotateError::MalformedRecord { line: 1, .. })
        ));

        // A rejected hit is never asked for its label.
        let path = write_hits(dir.path(), &[row("gene_1", 10.0, 150, 150, "nolabel")]);
        assert!(HitFilter::new(0.64).apply(&path).unwrap().hits.is_empty());
    }

    #[test]
    fn test_empty_file_yields_empty_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_hits(dir.path(), &[]);
        let out = HitFilter::new(0.64).apply(&path).unwrap();
        assert!(out.hits.is_empty());
        assert_eq!(out.records, 0);
    }
}
