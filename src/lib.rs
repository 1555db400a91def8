//! iceannot - Multi-database gene annotation for ICE detection
//!
//! Searches the genes of one genome against six curated reference databases
//! and a defense-system detector, and fuses the accepted hits into one
//! per-gene [`AnnotationBundle`](bundle::AnnotationBundle).
//!
//! # Modules
//! - `seqio`: FASTA reading and query file checks
//! - `category`: search categories, thresholds and failure policies
//! - `runner`: external process execution with cancellation
//! - `search`: BLAST search jobs
//! - `blast`: tabular BLAST hit parsing and scoring
//! - `filter`: threshold filter and per-gene tie-break
//! - `defense`: DefenseFinder invocation and gene table parsing
//! - `pipeline`: concurrent orchestration of a run
//! - `bundle`: annotation bundle and its TSV/JSON output
//! - `report`: run events and reporters
//! - `config`: TOML configuration
//! - `error`: error taxonomy

pub mod seqio;
pub mod category;
pub mod runner;
pub mod search;
pub mod blast;
pub mod filter;
pub mod defense;
pub mod pipeline;
pub mod bundle;
pub mod report;
pub mod config;
pub mod error;

pub use bundle::{AnnotationBundle, AnnotationMap};
pub use category::{AnnotationKind, Category};
pub use config::Config;
pub use error::{AnnotateError, Result};
pub use pipeline::Annotator;
