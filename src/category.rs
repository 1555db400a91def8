//! Annotation Categories
//!
//! The fixed table of homology-search categories and the defense detector,
//! with everything that varies per category: reference database name,
//! BLAST program, which query file is searched, acceptance threshold,
//! output file name and failure policy.
//!
//! # Category table
//! ```text
//! Category      Database      Program  Query        Threshold  Output
//! transposase   transposase   blastp   proteins     0.64       is.m8
//! virulence     virulence     blastp   proteins     0.64       vf.m8
//! resistance    resfinder     blastn   nucleotides  0.81       arg.m8
//! metal         metal         blastp   proteins     0.64       metal.m8
//! degradation   degradation   blastp   proteins     0.64       pop.m8
//! symbiosis     symbiosis     blastn   nucleotides  0.64       sym.m8
//! ```
//!
//! The symbiosis mode is the default only; `Config::symbiosis_mode` can
//! switch it to blastp against the protein file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Acceptance threshold for every category except resistance.
pub const DEFAULT_THRESHOLD: f64 = 0.64;

/// Acceptance threshold for the nucleotide resistance-gene search.
pub const RESISTANCE_THRESHOLD: f64 = 0.81;

// ============================================================================
// Search mode
// ============================================================================

/// Which BLAST program a category is searched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Protein query against a protein database.
    Blastp,
    /// Nucleotide query against a nucleotide database.
    Blastn,
}

impl SearchMode {
    pub fn program(self) -> &'static str {
        match self {
            SearchMode::Blastp => "blastp",
            SearchMode::Blastn => "blastn",
        }
    }

    /// The query file type the program expects.
    pub fn query_kind(self) -> QueryKind {
        match self {
            SearchMode::Blastp => QueryKind::Protein,
            SearchMode::Blastn => QueryKind::Nucleotide,
        }
    }
}

/// Which of the two per-run sequence files a search reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Protein,
    Nucleotide,
}

// ============================================================================
// Category
// ============================================================================

/// One of the six curated homology-search categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Transposase,
    Virulence,
    Resistance,
    Metal,
    Degradation,
    Symbiosis,
}

impl Category {
    /// All categories in dispatch order.
    pub const ALL: [Category; 6] = [
        Category::Transposase,
        Category::Virulence,
        Category::Resistance,
        Category::Metal,
        Category::Degradation,
        Category::Symbiosis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Category::Transposase => "transposase",
            Category::Virulence => "virulence",
            Category::Resistance => "resistance",
            Category::Metal => "metal",
            Category::Degradation => "degradation",
            Category::Symbiosis => "symbiosis",
        }
    }

    /// Directory name of the reference database under `databases_dir`.
    pub fn database_name(self) -> &'static str {
        match self {
            Category::Transposase => "transposase",
            Category::Virulence => "virulence",
            Category::Resistance => "resfinder",
            Category::Metal => "metal",
            Category::Degradation => "degradation",
            Category::Symbiosis => "symbiosis",
        }
    }

    /// Default search mode.
    pub fn search_mode(self) -> SearchMode {
        match self {
            Category::Resistance | Category::Symbiosis => SearchMode::Blastn,
            _ => SearchMode::Blastp,
        }
    }

    /// Minimum normalized score (coverage × identity) for a hit to count.
    pub fn threshold(self) -> f64 {
        match self {
            Category::Resistance => RESISTANCE_THRESHOLD,
            _ => DEFAULT_THRESHOLD,
        }
    }

    /// File name of the raw hit table inside the run directory.
    pub fn output_file(self) -> &'static str {
        match self {
            Category::Transposase => "is.m8",
            Category::Virulence => "vf.m8",
            Category::Resistance => "arg.m8",
            Category::Metal => "metal.m8",
            Category::Degradation => "pop.m8",
            Category::Symbiosis => "sym.m8",
        }
    }

    pub fn kind(self) -> AnnotationKind {
        match self {
            Category::Transposase => AnnotationKind::Transposase,
            Category::Virulence => AnnotationKind::Virulence,
            Category::Resistance => AnnotationKind::Resistance,
            Category::Metal => AnnotationKind::Metal,
            Category::Degradation => AnnotationKind::Degradation,
            Category::Symbiosis => AnnotationKind::Symbiosis,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Annotation kinds and failure policy
// ============================================================================

/// What a sub-operation does when it fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Abort the whole run and surface the error.
    AbortRun,
    /// Report the failure and continue with an empty result.
    ContinueEmpty,
}

/// One of the seven maps of an annotation bundle, and equally one of the
/// seven sub-operations of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Resistance,
    Virulence,
    Transposase,
    Defense,
    Metal,
    Degradation,
    Symbiosis,
}

impl AnnotationKind {
    /// Bundle order.
    pub const ALL: [AnnotationKind; 7] = [
        AnnotationKind::Resistance,
        AnnotationKind::Virulence,
        AnnotationKind::Transposase,
        AnnotationKind::Defense,
        AnnotationKind::Metal,
        AnnotationKind::Degradation,
        AnnotationKind::Symbiosis,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AnnotationKind::Defense => "defense",
            other => other.category().map(Category::name).unwrap_or("defense"),
        }
    }

    /// The homology category behind this kind; `None` for defense.
    pub fn category(self) -> Option<Category> {
        match self {
            AnnotationKind::Resistance => Some(Category::Resistance),
            AnnotationKind::Virulence => Some(Category::Virulence),
            AnnotationKind::Transposase => Some(Category::Transposase),
            AnnotationKind::Defense => None,
            AnnotationKind::Metal => Some(Category::Metal),
            AnnotationKind::Degradation => Some(Category::Degradation),
            AnnotationKind::Symbiosis => Some(Category::Symbiosis),
        }
    }

    /// Homology searches are load-bearing and abort the run; defense
    /// annotation is enrichment and degrades to an empty map.
    pub fn failure_policy(self) -> FailurePolicy {
        match self {
            AnnotationKind::Defense => FailurePolicy::ContinueEmpty,
            _ => FailurePolicy::AbortRun,
        }
    }
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_constants() {
        assert_eq!(Category::Resistance.threshold(), 0.81);
        for cat in [
            Category::Transposase,
            Category::Virulence,
            Category::Metal,
            Category::Degradation,
            Category::Symbiosis,
        ] {
            assert_eq!(cat.threshold(), 0.64, "{} threshold", cat);
        }
    }

    #[test]
    fn test_search_modes() {
        assert_eq!(Category::Resistance.search_mode(), SearchMode::Blastn);
        assert_eq!(Category::Resistance.search_mode().query_kind(), QueryKind::Nucleotide);
        assert_eq!(Category::Symbiosis.search_mode(), SearchMode::Blastn);
        assert_eq!(Category::Transposase.search_mode().program(), "blastp");
        let protein: Vec<Category> = Category::ALL
            .iter()
            .copied()
            .filter(|c| c.search_mode() == SearchMode::Blastp)
            .collect();
        assert_eq!(
            protein,
            [Category::Transposase, Category::Virulence, Category::Metal, Category::Degradation]
        );
    }

    #[test]
    fn test_output_files_are_distinct() {
        let mut names: Vec<&str> = Category::ALL.iter().map(|c| c.output_file()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Category::ALL.len());
    }

    #[test]
    fn test_failure_policy_table() {
        for kind in AnnotationKind::ALL {
            let expected = if kind == AnnotationKind::Defense {
                FailurePolicy::ContinueEmpty
            } else {
                FailurePolicy::AbortRun
            };
            assert_eq!(kind.failure_policy(), expected, "{}", kind);
        }
    }

    #[test]
    fn test_kind_category_round_trip() {
        for cat in Category::ALL {
            assert_eq!(cat.kind().category(), Some(cat));
            assert_eq!(cat.kind().name(), cat.name());
        }
        assert_eq!(AnnotationKind::Defense.category(), None);
        assert_eq!(AnnotationKind::Defense.to_string(), "defense");
    }
}
