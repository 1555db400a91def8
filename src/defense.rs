//! Defense-System Detection
//!
//! Runs DefenseFinder on the run's proteins and reads its gene table:
//!
//! ```text
//! replicon  hit_id      gene_name  ...
//! rep1      ICE_00012   CasA__CasB ...
//! ```
//!
//! Column 2 is the gene id and column 3 the subsystem names joined by `__`,
//! stored comma-joined. Unlike the homology searches, a failure here never
//! aborts a run: the caller reports it and continues with an empty map.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::bundle::AnnotationMap;
use crate::error::{AnnotateError, Result};
use crate::runner::{CancelToken, CommandRunner, ToolCommand};

const HEADER_FIRST_COLUMN: &str = "replicon";

#[derive(Debug, Clone)]
pub struct DefenseJob {
    pub program: PathBuf,
    pub models_dir: PathBuf,
    /// Run-scoped output directory owned by DefenseFinder.
    pub output_dir: PathBuf,
    pub proteins: PathBuf,
    pub workers: usize,
    pub run_id: String,
}

impl DefenseJob {
    pub fn command(&self) -> ToolCommand {
        ToolCommand::new("defense", &self.program)
            .arg("run")
            .opt("-w", self.workers.max(1).to_string())
            .opt("--models-dir", &self.models_dir)
            .opt("-o", &self.output_dir)
            .arg(&self.proteins)
    }

    /// Path of the gene-level table DefenseFinder writes.
    pub fn genes_table(&self) -> PathBuf {
        self.output_dir
            .join(format!("{}_defense_finder_genes.tsv", self.run_id))
    }

    /// Runs DefenseFinder and parses its gene table.
    ///
    /// # Errors
    /// `Execution`, `MissingOutput`, `MalformedRecord` or `Cancelled`. The
    /// orchestrator turns all but `Cancelled` into an empty map.
    pub fn execute(&self, runner: &dyn CommandRunner, cancel: &CancelToken) -> Result<AnnotationMap> {
        runner.run(&self.command(), cancel)?;

        let table = self.genes_table();
        if !table.is_file() {
            return Err(AnnotateError::MissingOutput {
                operation: "defense".to_string(),
                path: table,
            });
        }
        parse_genes_table(&table)
    }
}

/// Parses a DefenseFinder genes table into gene id → comma-joined subsystems.
///
/// Header rows (first column `replicon`) and blank lines are skipped. A gene
/// listed more than once keeps its last row.
pub fn parse_genes_table(path: &Path) -> Result<AnnotationMap> {
    let file = File::open(path).map_err(|e| AnnotateError::io(path, e))?;
    let reader = BufReader::new(file);
    let mut genes = AnnotationMap::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| AnnotateError::io(path, e))?;
        let line = line.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields[0] == HEADER_FIRST_COLUMN {
            continue;
        }
        if fields.len() < 3 {
            return Err(AnnotateError::malformed(
                path,
                idx + 1,
                format!("expected at least 3 tab-separated fields, found {}", fields.len()),
            ));
        }

        genes.insert(fields[1].to_string(), fields[2].replace("__", ","));
    }

    Ok(genes)
}

// ============================================================================
// Tests
// ============================================================================
