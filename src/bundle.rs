//! Annotation Bundle
//!
//! The unit of output of a run: seven gene-id keyed maps (six homology
//! categories plus defense systems). All maps share the gene-id key space of
//! the input FASTA, so consumers can fuse them by key without translation.

use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::category::AnnotationKind;
use crate::error::{AnnotateError, Result};

/// Gene id → label. For homology categories the label is the reference
/// category label; for defense it is a comma-joined list of subsystems.
pub type AnnotationMap = FxHashMap<String, String>;

/// Per-gene annotation labels for one run. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationBundle {
    resistance: AnnotationMap,
    virulence: AnnotationMap,
    transposase: AnnotationMap,
    defense: AnnotationMap,
    metal: AnnotationMap,
    degradation: AnnotationMap,
    symbiosis: AnnotationMap,
}

impl AnnotationBundle {
    /// Builds a bundle from per-kind maps. Kinds not supplied are empty; a
    /// kind supplied twice keeps the later map.
    pub fn from_maps<I>(maps: I) -> Self
    where
        I: IntoIterator<Item = (AnnotationKind, AnnotationMap)>,
    {
        let mut bundle = Self::default();
        for (kind, map) in maps {
            *bundle.slot_mut(kind) = map;
        }
        bundle
    }

    fn slot_mut(&mut self, kind: AnnotationKind) -> &mut AnnotationMap {
        match kind {
            AnnotationKind::Resistance => &mut self.resistance,
            AnnotationKind::Virulence => &mut self.virulence,
            AnnotationKind::Transposase => &mut self.transposase,
            AnnotationKind::Defense => &mut self.defense,
            AnnotationKind::Metal => &mut self.metal,
            AnnotationKind::Degradation => &mut self.degradation,
            AnnotationKind::Symbiosis => &mut self.symbiosis,
        }
    }

    pub fn get(&self, kind: AnnotationKind) -> &AnnotationMap {
        match kind {
            AnnotationKind::Resistance => &self.resistance,
            AnnotationKind::Virulence => &self.virulence,
            AnnotationKind::Transposase => &self.transposase,
            AnnotationKind::Defense => &self.defense,
            AnnotationKind::Metal => &self.metal,
            AnnotationKind::Degradation => &self.degradation,
            AnnotationKind::Symbiosis => &self.symbiosis,
        }
    }

    pub fn resistance(&self) -> &AnnotationMap {
        &self.resistance
    }

    pub fn virulence(&self) -> &AnnotationMap {
        &self.virulence
    }

    pub fn transposase(&self) -> &AnnotationMap {
        &self.transposase
    }

    pub fn defense(&self) -> &AnnotationMap {
        &self.defense
    }

    pub fn metal(&self) -> &AnnotationMap {
        &self.metal
    }

    pub fn degradation(&self) -> &AnnotationMap {
        &self.degradation
    }

    pub fn symbiosis(&self) -> &AnnotationMap {
        &self.symbiosis
    }

    /// Every label attached to `gene_id`, in bundle order.
    pub fn labels_for(&self, gene_id: &str) -> Vec<(AnnotationKind, &str)> {
        AnnotationKind::ALL
            .iter()
            .filter_map(|&kind| self.get(kind).get(gene_id).map(|l| (kind, l.as_str())))
            .collect()
    }

    /// Sorted union of annotated gene ids across all maps.
    pub fn gene_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = AnnotationKind::ALL
            .iter()
            .flat_map(|&kind| self.get(kind).keys().map(String::as_str))
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Total number of (gene, kind) labels.
    pub fn len(&self) -> usize {
        AnnotationKind::ALL.iter().map(|&k| self.get(k).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `gene_id<TAB>kind<TAB>label` rows, sorted by gene, kinds in bundle order.
    pub fn write_tsv(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| AnnotateError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        let write_err = |e: std::io::Error| AnnotateError::io(path, e);

        writeln!(writer, "gene_id\tkind\tlabel").map_err(write_err)?;
        for gene in self.gene_ids() {
            for (kind, label) in self.labels_for(gene) {
                writeln!(writer, "{}\t{}\t{}", gene, kind, label).map_err(write_err)?;
            }
        }
        writer.flush().map_err(write_err)
    }

    /// Writes the bundle as pretty JSON with a run id and timestamp.
    pub fn write_json(&self, path: &Path, run_id: &str) -> Result<()> {
        let annotations: BTreeMap<AnnotationKind, BTreeMap<&str, &str>> = AnnotationKind::ALL
            .iter()
            .map(|&kind| {
                let sorted: BTreeMap<&str, &str> = self
                    .get(kind)
                    .iter()
                    .map(|(g, l)| (g.as_str(), l.as_str()))
                    .collect();
                (kind, sorted)
            })
            .collect();

        let doc = BundleDocument {
            run_id,
            generated_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            genes: self.gene_ids().len(),
            annotations,
        };

        let file = File::create(path).map_err(|e| AnnotateError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &doc).map_err(|e| AnnotateError::io(path, e.into()))?;
        writer.flush().map_err(|e| AnnotateError::io(path, e))
    }
}

#[derive(Serialize)]
struct BundleDocument<'a> {
    run_id: &'a str,
    generated_at: String,
    genes: usize,
    annotations: BTreeMap<AnnotationKind, BTreeMap<&'a str, &'a str>>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> AnnotationMap {
        pairs.iter().map(|(g, l)| (g.to_string(), l.to_string())).collect()
    }

    fn sample() -> AnnotationBundle {
        AnnotationBundle::from_maps([
            (AnnotationKind::Transposase, map(&[("g2", "IS3"), ("g1", "Tn3")])),
            (AnnotationKind::Resistance, map(&[("g1", "blaTEM-1")])),
            (AnnotationKind::Defense, map(&[("g3", "CasA,CasB")])),
        ])
    }

    #[test]
    fn test_from_maps_fills_missing_kinds() {
        let bundle = sample();
        assert_eq!(bundle.transposase().len(), 2);
        assert_eq!(bundle.defense()["g3"], "CasA,CasB");
        assert!(bundle.metal().is_empty());
        assert!(bundle.virulence().is_empty());
        assert_eq!(bundle.len(), 4);
        assert!(!bundle.is_empty());
        assert!(AnnotationBundle::default().is_empty());
    }

    #[test]
    fn test_labels_for_fuses_by_gene() {
        let bundle = sample();
        assert_eq!(
            bundle.labels_for("g1"),
            vec![
                (AnnotationKind::Resistance, "blaTEM-1"),
                (AnnotationKind::Transposase, "Tn3"),
            ]
        );
        assert!(bundle.labels_for("unknown").is_empty());
        assert_eq!(bundle.gene_ids(), vec!["g1", "g2", "g3"]);
    }

    #[test]
    fn test_write_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        sample().write_tsv(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "gene_id\tkind\tlabel",
                "g1\tresistance\tblaTEM-1",
                "g1\ttransposase\tTn3",
                "g2\ttransposase\tIS3",
                "g3\tdefense\tCasA,CasB",
            ]
        );
    }

    #[test]
    fn test_write_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        sample().write_json(&path, "run42").unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["run_id"], "run42");
        assert_eq!(value["genes"], 3);
        assert_eq!(value["annotations"]["defense"]["g3"], "CasA,CasB");
        assert_eq!(value["annotations"]["transposase"]["g2"], "IS3");
        assert!(value["annotations"]["metal"].as_object().unwrap().is_empty());
    }
}
