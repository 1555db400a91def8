//! Run Configuration
//!
//! Loaded from a TOML file. Reference database paths are derived from a
//! single `databases_dir`:
//!
//! ```text
//! databases_dir/
//!   macsydata/     DefenseFinder models
//!   transposase    BLAST protein db (transposase.pin, ...)
//!   virulence      BLAST protein db
//!   resfinder      BLAST nucleotide db (resfinder.nin, ...)
//!   metal          BLAST protein db
//!   degradation    BLAST protein db
//!   symbiosis      BLAST nucleotide db (protein with symbiosis_mode = "blastp")
//! ```
//!
//! # Example
//! ```toml
//! databases_dir = "/data/ice_db"
//! workdir = "/scratch/iceannot"
//! threads = 16
//! search_threads = 4
//!
//! [tools]
//! blastp = "/opt/blast/bin/blastp"
//! ```

use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::category::{Category, SearchMode};
use crate::error::{AnnotateError, Result};
use crate::filter::TieBreak;

/// Directory name of the DefenseFinder model store.
pub const DEFENSE_MODELS_DIR: &str = "macsydata";

fn default_search_threads() -> usize {
    4
}

fn default_defense_workers() -> usize {
    8
}

fn default_symbiosis_mode() -> SearchMode {
    Category::Symbiosis.search_mode()
}

/// Executables. Bare names are looked up on `PATH`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolPaths {
    pub blastp: PathBuf,
    pub blastn: PathBuf,
    pub defense_finder: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            blastp: PathBuf::from("blastp"),
            blastn: PathBuf::from("blastn"),
            defense_finder: PathBuf::from("defense-finder"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub databases_dir: PathBuf,
    /// Parent of the per-run working directories. Defaults to
    /// `<system temp>/iceannot`.
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    /// Total CPU budget; 0 means all cores.
    #[serde(default)]
    pub threads: usize,
    /// `-num_threads` passed to each BLAST process.
    #[serde(default = "default_search_threads")]
    pub search_threads: usize,
    /// `-w` passed to DefenseFinder.
    #[serde(default = "default_defense_workers")]
    pub defense_workers: usize,
    /// How repeated accepted hits for one gene are reduced.
    #[serde(default)]
    pub tie_break: TieBreak,
    /// `blastn` searches the nucleotide file; `blastp` the protein file,
    /// for symbiosis databases built from protein sequences.
    #[serde(default = "default_symbiosis_mode")]
    pub symbiosis_mode: SearchMode,
    #[serde(default)]
    pub tools: ToolPaths,
}

impl Config {
    /// Defaults for everything except the database directory.
    pub fn new(databases_dir: impl Into<PathBuf>) -> Self {
        Self {
            databases_dir: databases_dir.into(),
            workdir: None,
            threads: 0,
            search_threads: default_search_threads(),
            defense_workers: default_defense_workers(),
            tie_break: TieBreak::default(),
            symbiosis_mode: default_symbiosis_mode(),
            tools: ToolPaths::default(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| AnnotateError::io(path, e))?;
        Self::from_toml(&text).map_err(|e| match e {
            AnnotateError::Config { message } => AnnotateError::Config {
                message: format!("{}: {}", path.display(), message),
            },
            other => other,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| AnnotateError::Config {
            message: e.to_string(),
        })?;
        if config.search_threads == 0 {
            return Err(AnnotateError::Config {
                message: "search_threads must be at least 1".to_string(),
            });
        }
        if config.defense_workers == 0 {
            return Err(AnnotateError::Config {
                message: "defense_workers must be at least 1".to_string(),
            });
        }
        Ok(config)
    }

    /// CPU budget with 0 resolved to the core count.
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }

    pub fn database_path(&self, category: Category) -> PathBuf {
        self.databases_dir.join(category.database_name())
    }

    pub fn defense_models_dir(&self) -> PathBuf {
        self.databases_dir.join(DEFENSE_MODELS_DIR)
    }

    /// Working directory for one run. Not created here.
    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.workdir
            .clone()
            .unwrap_or_else(|| env::temp_dir().join("iceannot"))
            .join(run_id)
    }

    /// Search mode for `category`, with the symbiosis override applied.
    pub fn search_mode(&self, category: Category) -> SearchMode {
        match category {
            Category::Symbiosis => self.symbiosis_mode,
            other => other.search_mode(),
        }
    }

    pub fn program(&self, category: Category) -> &Path {
        match self.search_mode(category) {
            SearchMode::Blastp => &self.tools.blastp,
            SearchMode::Blastn => &self.tools.blastn,
        }
    }

    /// Checks every reference database is present.
    ///
    /// # Errors
    /// `MissingDatabase` naming the first absent one.
    pub fn validate(&self) -> Result<()> {
        let models = self.defense_models_dir();
        if !models.is_dir() {
            return Err(AnnotateError::MissingDatabase {
                name: DEFENSE_MODELS_DIR.to_string(),
                path: models,
            });
        }

        for category in Category::ALL {
            let db = self.database_path(category);
            if !blast_db_exists(&db) {
                return Err(AnnotateError::MissingDatabase {
                    name: category.database_name().to_string(),
                    path: db,
                });
            }
        }
        Ok(())
    }

    /// Replaces every tool entry with its resolved absolute path.
    pub fn resolve_tools(&mut self) -> Result<()> {
        self.tools.blastp = find_executable(&self.tools.blastp)?;
        self.tools.blastn = find_executable(&self.tools.blastn)?;
        self.tools.defense_finder = find_executable(&self.tools.defense_finder)?;
        Ok(())
    }
}

/// A BLAST database is a path prefix; it exists when the prefix itself
/// exists or any `<prefix>.*` index file does.
fn blast_db_exists(prefix: &Path) -> bool {
    if prefix.exists() {
        return true;
    }
    let (Some(dir), Some(name)) = (prefix.parent(), prefix.file_name()) else {
        return false;
    };
    let stem = format!("{}.", name.to_string_lossy());
    let dir = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };

    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .any(|e| e.file_name().to_string_lossy().starts_with(&stem))
        })
        .unwrap_or(false)
}

/// Resolves a tool name against `PATH`. Names containing a path separator
/// are checked as given.
pub fn find_executable(name: &Path) -> Result<PathBuf> {
    if name.components().count() > 1 || name.is_absolute() {
        if name.is_file() {
            return Ok(name.to_path_buf());
        }
        return Err(AnnotateError::Config {
            message: format!("executable not found: {}", name.display()),
        });
    }

    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return Ok(full_path);
            }
        }
    }

    Err(AnnotateError::Config {
        message: format!(
            "{} not found in PATH. Please install it or set its path under [tools].",
            name.display()
        ),
    })
}

// ============================================================================
// Tests
// ============================================================================
