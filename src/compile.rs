//! Dataset compilation.
//!
//! Aggregates the emitted crops into the final classification dataset:
//! per-class counts, a minimum-sample threshold, stable zero-based class
//! indices, and the `(image path, class index)` manifest plus the class
//! guide whose line number is the index. Species and genus manifests are
//! built in one pass; the genus of a crop is the first whitespace token
//! of its species directory name.
//!
//! Class directories are walked in lexicographic order, which is the
//! ordering contract that makes the class→index mapping reproducible
//! across runs and filesystems.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use log::warn;

use crate::config::PipelineConfig;
use crate::error::GridlabelError;
use crate::ledger::TaxonLevel;
use crate::reconcile::{list_subfolders, IssueContext, IssueKind, RunIssue, RunReport};

/// One class that survived the threshold.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledClass {
    pub name: String,
    /// Zero-based index; equals the class's position in the guide file.
    pub index: usize,
    pub count: usize,
}

/// The compiled dataset at one taxonomy level.
#[derive(Clone, Debug, Default)]
pub struct DatasetManifest {
    /// Surviving classes in index order.
    pub classes: Vec<CompiledClass>,
    /// `(image path, class index)` rows, one per kept crop.
    pub rows: Vec<(String, usize)>,
}

impl DatasetManifest {
    pub fn index_of(&self, class_name: &str) -> Option<usize> {
        self.classes
            .iter()
            .find(|class| class.name == class_name)
            .map(|class| class.index)
    }

    /// Guide file content: one class name per line, line number == index.
    pub fn guide(&self) -> String {
        let mut guide = String::new();
        for class in &self.classes {
            guide.push_str(&class.name);
            guide.push('\n');
        }
        guide
    }
}

/// The crops of one class directory, listed once and reused per level.
struct ClassListing {
    species: String,
    genus: String,
    files: Vec<String>,
}

/// Compiles the species and genus datasets from the crop tree.
///
/// Writes four artifacts under the base path: the manifest CSV and guide
/// file for each level. Classes strictly below `min_samples` are dropped
/// from both, with a diagnostic per excluded row.
pub fn compile_dataset(config: &PipelineConfig) -> Result<RunReport, GridlabelError> {
    let class_root = config.class_images();
    if !class_root.is_dir() {
        return Err(GridlabelError::NotADirectory(class_root));
    }

    let listings = read_class_listings(&class_root)?;
    let mut report = RunReport::new();

    for level in [TaxonLevel::Species, TaxonLevel::Genus] {
        let manifest = build_manifest(&listings, level, config.min_samples, &mut report);
        write_manifest(
            &manifest,
            &config.manifest_csv(level.as_str()),
            &config.guide_file(level.as_str()),
        )?;
        report.counts.manifest_rows += manifest.rows.len();
    }

    Ok(report)
}

/// Builds the manifest for one taxonomy level without touching disk.
///
/// Indices are assigned 0, 1, 2, ... in first-encountered order over the
/// surviving classes of the sorted listing; they are injective and
/// contiguous by construction.
fn build_manifest(
    listings: &[ClassListing],
    level: TaxonLevel,
    min_samples: usize,
    report: &mut RunReport,
) -> DatasetManifest {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for listing in listings {
        *counts.entry(listing.label(level)).or_insert(0) += listing.files.len();
    }

    let mut manifest = DatasetManifest::default();
    let mut index_of: HashMap<&str, usize> = HashMap::new();

    for listing in listings {
        let label = listing.label(level);
        let total = counts[label];

        if total < min_samples {
            for file in &listing.files {
                warn!(
                    "{} '{}' has {} sample(s), fewer than {}; skipping {}",
                    level.as_str(),
                    label,
                    total,
                    min_samples,
                    file
                );
            }
            report.add(RunIssue::warning(
                IssueKind::DroppedClass,
                format!(
                    "{} sample(s) is below the {} minimum; {} row(s) excluded",
                    total,
                    min_samples,
                    listing.files.len()
                ),
                IssueContext::Class {
                    name: label.to_string(),
                },
            ));
            continue;
        }

        let index = match index_of.get(label) {
            Some(&index) => index,
            None => {
                let index = manifest.classes.len();
                index_of.insert(label, index);
                manifest.classes.push(CompiledClass {
                    name: label.to_string(),
                    index,
                    count: total,
                });
                index
            }
        };

        for file in &listing.files {
            manifest.rows.push((file.clone(), index));
        }
    }

    manifest
}

/// Writes one level's manifest CSV (no header) and guide file.
pub fn write_manifest(
    manifest: &DatasetManifest,
    csv_path: &Path,
    guide_path: &Path,
) -> Result<(), GridlabelError> {
    let file = File::create(csv_path).map_err(GridlabelError::Io)?;
    let mut writer = csv::Writer::from_writer(BufWriter::new(file));
    for (path, index) in &manifest.rows {
        writer
            .write_record([path.as_str(), &index.to_string()])
            .map_err(|source| GridlabelError::ManifestWrite {
                path: csv_path.to_path_buf(),
                source,
            })?;
    }
    writer
        .into_inner()
        .map_err(|e| GridlabelError::Io(e.into_error()))?;

    let guide_file = File::create(guide_path).map_err(GridlabelError::Io)?;
    let mut guide_writer = BufWriter::new(guide_file);
    guide_writer
        .write_all(manifest.guide().as_bytes())
        .map_err(GridlabelError::Io)?;
    Ok(())
}

impl ClassListing {
    fn label(&self, level: TaxonLevel) -> &str {
        match level {
            TaxonLevel::Species => &self.species,
            TaxonLevel::Genus => &self.genus,
        }
    }
}

/// Reads the class tree once: one listing per species directory, classes
/// and files both in lexicographic order.
fn read_class_listings(class_root: &Path) -> Result<Vec<ClassListing>, GridlabelError> {
    let mut listings = Vec::new();
    for species in list_subfolders(class_root)? {
        let class_dir = class_root.join(&species);
        let mut files = Vec::new();
        for entry in fs::read_dir(&class_dir).map_err(GridlabelError::Io)? {
            let entry = entry.map_err(GridlabelError::Io)?;
            if entry.file_type().map_err(GridlabelError::Io)?.is_file() {
                files.push(entry.path().display().to_string());
            }
        }
        files.sort();

        let genus = species
            .split_whitespace()
            .next()
            .unwrap_or(species.as_str())
            .to_string();
        listings.push(ClassListing {
            species,
            genus,
            files,
        });
    }
    Ok(listings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(species: &str, count: usize) -> ClassListing {
        let genus = species.split_whitespace().next().unwrap().to_string();
        ClassListing {
            species: species.to_string(),
            genus,
            files: (1..=count)
                .map(|i| format!("/data/class_images/{species}/crop_{i}.tif"))
                .collect(),
        }
    }

    #[test]
    fn threshold_drops_small_classes_entirely() {
        let listings = vec![
            listing("Bicornucythere bisanensis", 12),
            listing("Cytheropteron sp1", 3),
            listing("Sinocytheridea impressa", 15),
        ];
        let mut report = RunReport::new();
        let manifest = build_manifest(&listings, TaxonLevel::Species, 10, &mut report);

        assert_eq!(manifest.classes.len(), 2);
        assert!(manifest.index_of("Cytheropteron sp1").is_none());
        assert!(manifest
            .rows
            .iter()
            .all(|(path, _)| !path.contains("Cytheropteron")));
        assert_eq!(report.warning_count(), 1);
    }

    #[test]
    fn indices_are_contiguous_over_survivors() {
        let listings = vec![
            listing("Aglaiocypris sp1", 2),
            listing("Bicornucythere bisanensis", 12),
            listing("Loxoconcha ocellata", 11),
        ];
        let mut report = RunReport::new();
        let manifest = build_manifest(&listings, TaxonLevel::Species, 10, &mut report);

        let indices: Vec<usize> = manifest.classes.iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(manifest.index_of("Bicornucythere bisanensis"), Some(0));
        assert_eq!(manifest.index_of("Loxoconcha ocellata"), Some(1));
    }

    #[test]
    fn genus_level_aggregates_species_directories() {
        let listings = vec![
            listing("Loxoconcha ocellata", 6),
            listing("Loxoconcha uranouchiensis", 6),
            listing("Sinocytheridea impressa", 4),
        ];
        let mut report = RunReport::new();
        let manifest = build_manifest(&listings, TaxonLevel::Genus, 10, &mut report);

        // Two Loxoconcha species pool 12 samples; Sinocytheridea's 4 drop.
        assert_eq!(manifest.classes.len(), 1);
        assert_eq!(manifest.classes[0].name, "Loxoconcha");
        assert_eq!(manifest.classes[0].count, 12);
        assert_eq!(manifest.rows.len(), 12);
    }

    #[test]
    fn rows_and_guide_agree() {
        let listings = vec![
            listing("Bicornucythere bisanensis", 12),
            listing("Neomonoceratina delicata", 11),
        ];
        let mut report = RunReport::new();
        let manifest = build_manifest(&listings, TaxonLevel::Species, 10, &mut report);

        let guide = manifest.guide();
        let guide_lines: Vec<&str> = guide.lines().collect();
        for (_, index) in &manifest.rows {
            assert!(*index < guide_lines.len());
        }
        for class in &manifest.classes {
            assert_eq!(guide_lines[class.index], class.name);
        }
    }

    #[test]
    fn empty_class_tree_compiles_to_nothing() {
        let mut report = RunReport::new();
        let manifest = build_manifest(&[], TaxonLevel::Species, 10, &mut report);
        assert!(manifest.classes.is_empty());
        assert!(manifest.rows.is_empty());
        assert!(report.is_clean());
    }
}
