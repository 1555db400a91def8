//! Run Diagnostics
//!
//! The orchestrator never logs directly. It emits [`RunEvent`]s to a
//! [`Reporter`] handed to it at construction, so embedding code and tests
//! decide where diagnostics go.
//!
//! - [`TracingReporter`]: forwards events to `tracing` (used by the CLI)
//! - [`MemoryReporter`]: keeps events in memory for inspection

use std::sync::Mutex;
use std::time::Duration;

use crate::category::AnnotationKind;

/// Something that happened during an annotation run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        workers: usize,
    },
    /// An external command is about to be spawned.
    CommandStarted {
        kind: AnnotationKind,
        command: String,
    },
    /// Filter counters for one category's hit table.
    HitsFiltered {
        kind: AnnotationKind,
        records: usize,
        accepted: usize,
        replaced: usize,
    },
    OperationFinished {
        kind: AnnotationKind,
        entries: usize,
        elapsed: Duration,
    },
    /// A sub-operation failed and the run will abort.
    OperationFailed {
        kind: AnnotationKind,
        message: String,
    },
    /// A sub-operation failed and was replaced by an empty result.
    OperationDegraded {
        kind: AnnotationKind,
        message: String,
    },
    /// A sub-operation was stopped or never started because a sibling failed.
    OperationCancelled {
        kind: AnnotationKind,
    },
    RunFinished {
        run_id: String,
        genes: usize,
        elapsed: Duration,
    },
}

/// Receives run diagnostics. Called from worker threads.
pub trait Reporter: Send + Sync {
    fn report(&self, event: RunEvent);
}

// ============================================================================
// tracing
// ============================================================================

/// Forwards events to the `tracing` subscriber installed by the caller.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, event: RunEvent) {
        match event {
            RunEvent::RunStarted { run_id, workers } => {
                tracing::info!(run_id = %run_id, workers, "annotation run started");
            }
            RunEvent::CommandStarted { kind, command } => {
                tracing::info!(operation = %kind, command = %command, "running");
            }
            RunEvent::HitsFiltered { kind, records, accepted, replaced } => {
                tracing::debug!(operation = %kind, records, accepted, replaced, "hits filtered");
            }
            RunEvent::OperationFinished { kind, entries, elapsed } => {
                tracing::info!(
                    operation = %kind,
                    entries,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "finished"
                );
            }
            RunEvent::OperationFailed { kind, message } => {
                tracing::error!(operation = %kind, "{}", message);
            }
            RunEvent::OperationDegraded { kind, message } => {
                tracing::error!(operation = %kind, "{}; continuing without {} annotation", message, kind);
            }
            RunEvent::OperationCancelled { kind } => {
                tracing::warn!(operation = %kind, "cancelled after sibling failure");
            }
            RunEvent::RunFinished { run_id, genes, elapsed } => {
                tracing::info!(
                    run_id = %run_id,
                    genes,
                    elapsed_secs = elapsed.as_secs_f64(),
                    "annotation run finished"
                );
            }
        }
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Collects every event in arrival order.
#[derive(Debug, Default)]
pub struct MemoryReporter {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl Reporter for MemoryReporter {
    fn report(&self, event: RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
