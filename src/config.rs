//! Pipeline configuration.
//!
//! One immutable [`PipelineConfig`] is loaded from YAML at startup and
//! passed by reference through every phase. All dataset layout paths are
//! derived from `base_path` here, so no component ever consults the
//! working directory or mutates shared state.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::GridlabelError;

fn default_min_samples() -> usize {
    10
}

fn default_image_extension() -> String {
    "tif".to_string()
}

/// Immutable configuration for one pipeline run.
#[derive(Clone, Debug, Deserialize)]
pub struct PipelineConfig {
    /// Root of the dataset tree.
    pub base_path: PathBuf,

    /// Minimum sample count for a class to survive dataset compilation.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Extension of the grid photographs (and emitted crops).
    #[serde(default = "default_image_extension")]
    pub image_extension: String,
}

impl PipelineConfig {
    /// Loads the configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, GridlabelError> {
        let raw = fs::read_to_string(path).map_err(GridlabelError::Io)?;
        serde_yaml::from_str(&raw).map_err(|source| GridlabelError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds a config rooted at `base_path` with defaults for the rest.
    pub fn rooted(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            min_samples: default_min_samples(),
            image_extension: default_image_extension(),
        }
    }

    /// The tree of source grid photographs, one folder per slide.
    pub fn grid_images(&self) -> PathBuf {
        self.base_path.join("grid_images")
    }

    /// Root of one annotation set (`pseudo_annotation`, `genus_annotation`, ...).
    pub fn annotation_root(&self, set: &str) -> PathBuf {
        self.base_path.join(format!("{set}_annotation"))
    }

    /// PASCAL VOC tree of one annotation set.
    pub fn pascal_dir(&self, set: &str) -> PathBuf {
        self.annotation_root(set).join("pascal_voc")
    }

    /// YOLO label tree of one annotation set.
    pub fn yolo_dir(&self, set: &str) -> PathBuf {
        self.annotation_root(set).join("yolo")
    }

    /// Per-class crop directories produced by the crop emitter.
    pub fn class_images(&self) -> PathBuf {
        self.base_path.join("class_images")
    }

    /// The master ledger of specimen observations.
    pub fn records_csv(&self) -> PathBuf {
        self.base_path.join("all_records.csv")
    }

    /// Ledger rows whose slides were never digitized.
    pub fn lost_records_csv(&self) -> PathBuf {
        self.base_path.join("lost_records.csv")
    }

    /// Class dictionary file for one annotation set.
    pub fn classes_file(&self, set: &str) -> PathBuf {
        self.base_path.join(format!("{set}_classes.txt"))
    }

    /// Compiled classification manifest for one taxonomy level.
    pub fn manifest_csv(&self, level: &str) -> PathBuf {
        self.base_path.join(format!("ostracods_{level}.csv"))
    }

    /// Class guide for one taxonomy level; line number equals class index.
    pub fn guide_file(&self, level: &str) -> PathBuf {
        self.base_path.join(format!("ostracods_{level}_guide.txt"))
    }

    /// Image file list consumed by detector training for one annotation set.
    pub fn yolo_image_list(&self, set: &str) -> PathBuf {
        self.base_path.join(format!("yolo_{set}_images.txt"))
    }

    /// Detector dataset manifest for one annotation set.
    pub fn yolo_data_yaml(&self, set: &str) -> PathBuf {
        self.base_path.join(format!("yolo_{set}.yaml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_yaml() {
        let config: PipelineConfig =
            serde_yaml::from_str("base_path: /data/ostracods\n").expect("parse yaml");
        assert_eq!(config.base_path, PathBuf::from("/data/ostracods"));
        assert_eq!(config.min_samples, 10);
        assert_eq!(config.image_extension, "tif");
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = "base_path: /data\nmin_samples: 25\nimage_extension: png\n";
        let config: PipelineConfig = serde_yaml::from_str(yaml).expect("parse yaml");
        assert_eq!(config.min_samples, 25);
        assert_eq!(config.image_extension, "png");
    }

    #[test]
    fn derived_paths() {
        let config = PipelineConfig::rooted("/data");
        assert_eq!(config.grid_images(), PathBuf::from("/data/grid_images"));
        assert_eq!(
            config.pascal_dir("genus"),
            PathBuf::from("/data/genus_annotation/pascal_voc")
        );
        assert_eq!(
            config.yolo_dir("pseudo"),
            PathBuf::from("/data/pseudo_annotation/yolo")
        );
        assert_eq!(config.records_csv(), PathBuf::from("/data/all_records.csv"));
        assert_eq!(
            config.classes_file("species"),
            PathBuf::from("/data/species_classes.txt")
        );
        assert_eq!(
            config.manifest_csv("genus"),
            PathBuf::from("/data/ostracods_genus.csv")
        );
        assert_eq!(
            config.guide_file("species"),
            PathBuf::from("/data/ostracods_species_guide.txt")
        );
        assert_eq!(
            config.yolo_image_list("genus"),
            PathBuf::from("/data/yolo_genus_images.txt")
        );
        assert_eq!(
            config.yolo_data_yaml("genus"),
            PathBuf::from("/data/yolo_genus.yaml")
        );
    }
}
