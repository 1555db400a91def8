//! Annotation Orchestrator
//!
//! Runs the six category searches and the defense detector for one genome
//! and assembles their results into an [`AnnotationBundle`].
//!
//! # Execution
//! The seven sub-operations share no state beyond distinct files in the run
//! directory, so they run as independent tasks on a bounded thread pool.
//! Pool width is `threads / search_threads` so that the BLAST processes
//! together stay near the configured CPU budget.
//!
//! # Failure handling
//! Each sub-operation declares a [`FailurePolicy`]:
//! - searches (`AbortRun`): the first failure is recorded, the shared
//!   [`CancelToken`] trips, queued tasks never start and running processes
//!   are killed; the call returns that first error and no bundle
//! - defense (`ContinueEmpty`): the failure is reported and the defense map
//!   is empty
//!
//! The bundle is built only after every task has finished or been cancelled.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::bundle::{AnnotationBundle, AnnotationMap};
use crate::category::{AnnotationKind, Category, FailurePolicy, QueryKind};
use crate::config::Config;
use crate::defense::DefenseJob;
use crate::error::{AnnotateError, Result};
use crate::filter::HitFilter;
use crate::report::{Reporter, RunEvent, TracingReporter};
use crate::runner::{CancelToken, CommandRunner, ProcessRunner};
use crate::search::SearchJob;
use crate::seqio;

/// Number of sub-operations in a run.
const OPERATIONS: usize = 7;

pub struct Annotator {
    config: Config,
    runner: Box<dyn CommandRunner>,
    reporter: Arc<dyn Reporter>,
}

/// Shared state of one run, borrowed by every task.
struct RunState {
    cancel: CancelToken,
    first_error: Mutex<Option<AnnotateError>>,
    results: Mutex<Vec<(AnnotationKind, AnnotationMap)>>,
}

impl Annotator {
    /// An annotator that spawns real processes and logs through `tracing`.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            runner: Box::new(ProcessRunner),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn with_runner(mut self, runner: impl CommandRunner + 'static) -> Self {
        self.runner = Box::new(runner);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn Reporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pool width: as many concurrent sub-operations as the CPU budget
    /// allows at `search_threads` each, between 1 and 7.
    pub fn workers(&self) -> usize {
        (self.config.effective_threads() / self.config.search_threads.max(1)).clamp(1, OPERATIONS)
    }

    /// The six searches for a run, in dispatch order.
    pub fn search_jobs(&self, run_id: &str, proteins: &Path, nucleotides: &Path) -> Vec<SearchJob> {
        let run_dir = self.config.run_dir(run_id);
        Category::ALL
            .iter()
            .map(|&category| {
                let mode = self.config.search_mode(category);
                SearchJob {
                    category,
                    mode,
                    program: self.config.program(category).to_path_buf(),
                    query: match mode.query_kind() {
                        QueryKind::Protein => proteins.to_path_buf(),
                        QueryKind::Nucleotide => nucleotides.to_path_buf(),
                    },
                    database: self.config.database_path(category),
                    output: run_dir.join(category.output_file()),
                    threads: self.config.search_threads,
                }
            })
            .collect()
    }

    pub fn defense_job(&self, run_id: &str, proteins: &Path) -> DefenseJob {
        DefenseJob {
            program: self.config.tools.defense_finder.clone(),
            models_dir: self.config.defense_models_dir(),
            output_dir: self.config.run_dir(run_id).join(format!("defense_{}", run_id)),
            proteins: proteins.to_path_buf(),
            workers: self.config.defense_workers,
            run_id: run_id.to_string(),
        }
    }

    /// Annotates one genome.
    ///
    /// # Arguments
    /// * `run_id` - names the run directory and DefenseFinder output
    /// * `proteins` - translated genes (`.faa`), searched by blastp and DefenseFinder
    /// * `nucleotides` - gene sequences (`.ffn`), searched by blastn
    ///
    /// # Errors
    /// - `InvalidInput` if either query file is missing or has no sequences;
    ///   checked once, before any process starts
    /// - otherwise the first search failure, unchanged: `Execution`,
    ///   `MissingOutput` or `MalformedRecord`, each naming its category
    ///
    /// Defense failures never surface here.
    pub fn annotate(&self, run_id: &str, proteins: &Path, nucleotides: &Path) -> Result<AnnotationBundle> {
        if run_id.is_empty() || run_id.contains(['/', '\\']) {
            return Err(AnnotateError::Config {
                message: format!("invalid run id '{}'", run_id),
            });
        }

        seqio::check_query(proteins)?;
        seqio::check_query(nucleotides)?;

        let start = Instant::now();
        let run_dir = self.config.run_dir(run_id);
        fs::create_dir_all(&run_dir).map_err(|e| AnnotateError::io(&run_dir, e))?;

        let workers = self.workers();
        self.reporter.report(RunEvent::RunStarted { run_id: run_id.to_string(), workers });

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("iceannot-{}", i))
            .build()
            .map_err(|e| AnnotateError::Config {
                message: format!("failed to build worker pool: {}", e),
            })?;

        let searches = self.search_jobs(run_id, proteins, nucleotides);
        let defense = self.defense_job(run_id, proteins);
        let state = RunState {
            cancel: CancelToken::new(),
            first_error: Mutex::new(None),
            results: Mutex::new(Vec::with_capacity(OPERATIONS)),
        };

        pool.scope(|s| {
            let state = &state;
            for job in &searches {
                s.spawn(move |_| self.run_search(job, state));
            }
            let defense = &defense;
            s.spawn(move |_| self.run_defense(defense, state));
        });

        let RunState { first_error, results, .. } = state;
        if let Some(err) = first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            return Err(err);
        }

        let results = results.into_inner().unwrap_or_else(|p| p.into_inner());
        for category in Category::ALL {
            if !results.iter().any(|(kind, _)| *kind == category.kind()) {
                return Err(AnnotateError::Cancelled { operation: category.name().to_string() });
            }
        }

        let bundle = AnnotationBundle::from_maps(results);
        self.reporter.report(RunEvent::RunFinished {
            run_id: run_id.to_string(),
            genes: bundle.gene_ids().len(),
            elapsed: start.elapsed(),
        });
        Ok(bundle)
    }

    fn run_search(&self, job: &SearchJob, state: &RunState) {
        let kind = job.category.kind();
        if state.cancel.is_cancelled() {
            self.reporter.report(RunEvent::OperationCancelled { kind });
            return;
        }

        let start = Instant::now();
        self.reporter.report(RunEvent::CommandStarted {
            kind,
            command: job.command().command_line(),
        });

        let filter = HitFilter::new(job.category.threshold()).with_tie_break(self.config.tie_break);
        let outcome = job
            .execute(self.runner.as_ref(), &state.cancel)
            .and_then(|hits| filter.apply(hits));

        let result = outcome.map(|out| {
            self.reporter.report(RunEvent::HitsFiltered {
                kind,
                records: out.records,
                accepted: out.accepted,
                replaced: out.replaced,
            });
            out.hits
        });
        self.settle(kind, result, start, state);
    }

    fn run_defense(&self, job: &DefenseJob, state: &RunState) {
        let kind = AnnotationKind::Defense;
        if state.cancel.is_cancelled() {
            self.reporter.report(RunEvent::OperationCancelled { kind });
            return;
        }

        let start = Instant::now();
        self.reporter.report(RunEvent::CommandStarted {
            kind,
            command: job.command().command_line(),
        });
        let result = job.execute(self.runner.as_ref(), &state.cancel);
        self.settle(kind, result, start, state);
    }

    /// Applies the kind's failure policy to a finished sub-operation.
    fn settle(&self, kind: AnnotationKind, result: Result<AnnotationMap>, start: Instant, state: &RunState) {
        let map = match result {
            Ok(map) => map,
            Err(e) if e.is_cancelled() => {
                self.reporter.report(RunEvent::OperationCancelled { kind });
                return;
            }
            Err(e) => match kind.failure_policy() {
                FailurePolicy::ContinueEmpty => {
                    self.reporter.report(RunEvent::OperationDegraded { kind, message: e.to_string() });
                    AnnotationMap::default()
                }
                FailurePolicy::AbortRun => {
                    self.reporter.report(RunEvent::OperationFailed { kind, message: e.to_string() });
                    let mut first = state.first_error.lock().unwrap_or_else(|p| p.into_inner());
                    if first.is_none() {
                        *first = Some(e);
                    }
                    state.cancel.cancel();
                    return;
                }
            },
        };

        self.reporter.report(RunEvent::OperationFinished {
            kind,
            entries: map.len(),
            elapsed: start.elapsed(),
        });
        state
            .results
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((kind, map));
    }
}

// ============================================================================
// Tests
// ============================================================================
