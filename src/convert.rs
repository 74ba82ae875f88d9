//! PASCAL VOC → YOLO conversion.
//!
//! Re-emits a reconciled annotation set in detector-friendly form: one
//! `.txt` per annotation with normalized `class cx cy w h` lines, the
//! class dictionary file, the image file list, and the dataset YAML the
//! detector training consumes. The class dictionary is built from ledger
//! frequencies (most frequent first) and frozen before any worker runs;
//! the pseudo set uses a single-class dictionary instead, mapping every
//! box to class 0.

use std::fs;
use std::path::Path;

use log::info;
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::error::GridlabelError;
use crate::key::FolderKey;
use crate::ledger::{RecordLedger, TaxonLevel};
use crate::pool::WorkerPool;
use crate::reconcile::{
    list_files_with_extension, list_subfolders, IssueContext, IssueKind, RunIssue, RunReport,
};
use crate::voc::VocAnnotation;

/// Annotation set converted as a geometry-only placeholder tree.
pub const PSEUDO_SET: &str = "pseudo";

/// One conversion pass over an annotation set.
pub struct ConvertJob<'a> {
    pub config: &'a PipelineConfig,
    pub ledger: &'a RecordLedger,
    /// Annotation set to convert (`pseudo`, `genus` or `species`).
    pub target: String,
}

/// The frozen class dictionary for one conversion.
#[derive(Clone, Debug)]
pub struct ClassDict {
    names: Vec<String>,
    single_class: bool,
}

impl ClassDict {
    /// A one-entry dictionary mapping every object to class 0.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into()],
            single_class: true,
        }
    }

    pub fn from_names(names: Vec<String>) -> Self {
        Self {
            names,
            single_class: false,
        }
    }

    /// The class index for one object label.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        if self.single_class {
            return Some(0);
        }
        self.names.iter().position(|known| known == name)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Detector dataset manifest, serialized next to the label tree.
#[derive(Debug, Serialize)]
struct DataYaml {
    path: String,
    train: String,
    val: String,
    test: String,
    nc: usize,
    names: Vec<String>,
}

/// Builds the class dictionary for the job's target set.
///
/// For real taxonomy levels the labels come from the ledger census over
/// the slides that actually have annotation folders; rows referencing
/// undigitized slides are diverted to the lost-records CSV.
pub fn build_class_dict(
    job: &ConvertJob<'_>,
    report: &mut RunReport,
) -> Result<ClassDict, GridlabelError> {
    if job.target == PSEUDO_SET {
        return Ok(ClassDict::single("Ostracods"));
    }

    let level = TaxonLevel::parse(&job.target)
        .ok_or_else(|| GridlabelError::UnsupportedSet(job.target.clone()))?;

    let pascal_dir = job.config.pascal_dir(&job.target);
    let mut known_folders = std::collections::HashSet::new();
    for folder in list_subfolders(&pascal_dir)? {
        match FolderKey::parse(&folder) {
            Ok(key) => {
                known_folders.insert(key.search_name());
            }
            Err(error) => {
                report.add(RunIssue::warning(
                    IssueKind::UnparsableName,
                    error.to_string(),
                    IssueContext::Folder { name: folder },
                ));
            }
        }
    }

    let census = job.ledger.census(level, &known_folders);
    if !census.lost.is_empty() {
        let lost_path = job.config.lost_records_csv();
        RecordLedger::write_lost_records(&lost_path, &census.lost)?;
        report.counts.lost_records = census.lost.len();
        report.add(RunIssue::warning(
            IssueKind::LostRecord,
            format!(
                "{} ledger row(s) reference slides never digitized; diverted to {}",
                census.lost.len(),
                lost_path.display()
            ),
            IssueContext::File {
                path: lost_path.display().to_string(),
            },
        ));
    }

    Ok(ClassDict::from_names(census.labels))
}

/// Converts every folder of the target set and writes the companion
/// artifacts (class file, image list, dataset YAML).
pub fn convert_tree(job: &ConvertJob<'_>, pool: &WorkerPool) -> Result<RunReport, GridlabelError> {
    let pascal_dir = job.config.pascal_dir(&job.target);
    if !pascal_dir.is_dir() {
        return Err(GridlabelError::NotADirectory(pascal_dir));
    }

    let mut report = RunReport::new();
    let dict = build_class_dict(job, &mut report)?;

    let folders = list_subfolders(&job.config.pascal_dir(&job.target))?;
    info!(
        "converting {} folder(s) of set '{}' with {} class(es)",
        folders.len(),
        job.target,
        dict.len()
    );

    let folder_reports = pool.map(folders.clone(), |folder| convert_folder(job, &dict, &folder));
    for folder_report in folder_reports {
        report.merge(folder_report);
    }

    write_class_file(&job.config.classes_file(&job.target), &dict)?;
    write_image_list(job, &folders)?;
    write_data_yaml(job, &dict)?;

    Ok(report)
}

/// Converts one folder's annotations to YOLO label files.
pub fn convert_folder(job: &ConvertJob<'_>, dict: &ClassDict, folder_name: &str) -> RunReport {
    let mut report = RunReport::new();

    let source_folder = job.config.pascal_dir(&job.target).join(folder_name);
    let out_folder = job.config.yolo_dir(&job.target).join(folder_name);

    let files = match list_files_with_extension(&source_folder, "xml") {
        Ok(files) => files,
        Err(error) => {
            report.add(RunIssue::error(
                IssueKind::Io,
                error.to_string(),
                IssueContext::Folder {
                    name: folder_name.to_string(),
                },
            ));
            return report;
        }
    };

    for file_name in files {
        let annotation_path = source_folder.join(&file_name);
        let annotation = match VocAnnotation::parse_file(&annotation_path) {
            Ok(annotation) => annotation,
            Err(error) => {
                report.add(RunIssue::warning(
                    IssueKind::MalformedAnnotation,
                    error.to_string(),
                    IssueContext::File {
                        path: annotation_path.display().to_string(),
                    },
                ));
                continue;
            }
        };

        let lines = match label_lines(&annotation, dict, folder_name, &file_name, &mut report) {
            Some(lines) => lines,
            None => continue,
        };

        let out_path = out_folder.join(Path::new(&file_name).with_extension("txt"));
        if let Err(error) = write_label_file(&out_path, &lines) {
            report.add(RunIssue::error(
                IssueKind::Io,
                error.to_string(),
                IssueContext::File {
                    path: out_path.display().to_string(),
                },
            ));
            continue;
        }
        report.counts.label_files_written += 1;
    }

    report
}

/// Renders one annotation's objects as YOLO label lines.
///
/// Returns `None` when the annotation cannot be converted at all (zero
/// recorded dimensions with objects present). Empty annotations yield an
/// empty line list; their label file is still written, as the detector
/// treats it as a background example.
fn label_lines(
    annotation: &VocAnnotation,
    dict: &ClassDict,
    folder_name: &str,
    file_name: &str,
    report: &mut RunReport,
) -> Option<Vec<String>> {
    if annotation.objects.is_empty() {
        return Some(Vec::new());
    }
    if annotation.width == 0 || annotation.height == 0 {
        report.add(RunIssue::error(
            IssueKind::InvalidGeometry,
            "annotation has objects but zero image dimensions".to_string(),
            IssueContext::File {
                path: format!("{folder_name}/{file_name}"),
            },
        ));
        return None;
    }

    let width = f64::from(annotation.width);
    let height = f64::from(annotation.height);
    let mut lines = Vec::with_capacity(annotation.objects.len());

    for object in &annotation.objects {
        let Some(class_index) = dict.index_of(&object.name) else {
            report.add(RunIssue::error(
                IssueKind::UnknownClass,
                format!("label '{}' is not in the class dictionary", object.name),
                IssueContext::File {
                    path: format!("{folder_name}/{file_name}"),
                },
            ));
            continue;
        };

        let cx = (object.xmax + object.xmin) as f64 / 2.0 / width;
        let cy = (object.ymax + object.ymin) as f64 / 2.0 / height;
        let w = (object.xmax - object.xmin) as f64 / width;
        let h = (object.ymax - object.ymin) as f64 / height;
        lines.push(format!("{class_index} {cx:.6} {cy:.6} {w:.6} {h:.6}"));
    }

    Some(lines)
}

fn write_label_file(path: &Path, lines: &[String]) -> Result<(), GridlabelError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(GridlabelError::Io)?;
    }
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(path, content).map_err(GridlabelError::Io)
}

/// Writes the class dictionary, one name per line, line number == index.
pub fn write_class_file(path: &Path, dict: &ClassDict) -> Result<(), GridlabelError> {
    let mut content = dict.names().join("\n");
    content.push('\n');
    fs::write(path, content).map_err(GridlabelError::Io)
}

/// Writes the list of image files matching the emitted label files.
fn write_image_list(job: &ConvertJob<'_>, folders: &[String]) -> Result<(), GridlabelError> {
    let yolo_root = job.config.yolo_dir(&job.target);
    let mut image_names = Vec::new();
    for folder in folders {
        let folder_dir = yolo_root.join(folder);
        if !folder_dir.is_dir() {
            continue;
        }
        for label_file in list_files_with_extension(&folder_dir, "txt")? {
            let image_name = Path::new(&label_file)
                .with_extension(&job.config.image_extension)
                .display()
                .to_string();
            image_names.push(image_name);
        }
    }
    image_names.sort();

    let mut content = image_names.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(job.config.yolo_image_list(&job.target), content).map_err(GridlabelError::Io)
}

fn write_data_yaml(job: &ConvertJob<'_>, dict: &ClassDict) -> Result<(), GridlabelError> {
    let image_list = job
        .config
        .yolo_image_list(&job.target)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let data = DataYaml {
        path: job.config.base_path.display().to_string(),
        train: image_list.clone(),
        val: String::new(),
        test: image_list,
        nc: dict.len(),
        names: dict.names().to_vec(),
    };

    let yaml_path = job.config.yolo_data_yaml(&job.target);
    let rendered = serde_yaml::to_string(&data).map_err(|source| GridlabelError::DataYamlWrite {
        path: yaml_path.clone(),
        source,
    })?;
    fs::write(&yaml_path, rendered).map_err(GridlabelError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voc::VocObject;

    fn annotation_with(objects: Vec<VocObject>) -> VocAnnotation {
        let mut annotation = VocAnnotation::empty("f", "img.tif", "/p/img.tif", 800, 600);
        annotation.objects = objects;
        annotation
    }

    #[test]
    fn single_class_dict_maps_everything_to_zero() {
        let dict = ClassDict::single("Ostracods");
        assert_eq!(dict.index_of("Ostracods"), Some(0));
        assert_eq!(dict.index_of("anything else"), Some(0));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn named_dict_resolves_by_position() {
        let dict = ClassDict::from_names(vec![
            "Sinocytheridea impressa".to_string(),
            "Neomonoceratina delicata".to_string(),
        ]);
        assert_eq!(dict.index_of("Sinocytheridea impressa"), Some(0));
        assert_eq!(dict.index_of("Neomonoceratina delicata"), Some(1));
        assert_eq!(dict.index_of("Loxoconcha ocellata"), None);
    }

    #[test]
    fn label_lines_are_normalized() {
        let dict = ClassDict::from_names(vec!["Sinocytheridea impressa".to_string()]);
        let annotation = annotation_with(vec![VocObject::new(
            "Sinocytheridea impressa",
            200,
            150,
            600,
            450,
        )]);

        let mut report = RunReport::new();
        let lines = label_lines(&annotation, &dict, "folder", "file.xml", &mut report)
            .expect("convertible annotation");
        assert_eq!(lines, vec!["0 0.500000 0.500000 0.500000 0.500000"]);
        assert!(report.is_clean());
    }

    #[test]
    fn empty_annotation_yields_empty_label_file_content() {
        let dict = ClassDict::single("Ostracods");
        let annotation = annotation_with(Vec::new());
        let mut report = RunReport::new();
        let lines = label_lines(&annotation, &dict, "folder", "file.xml", &mut report)
            .expect("empty annotation converts");
        assert!(lines.is_empty());
    }

    #[test]
    fn unknown_label_is_reported_and_skipped() {
        let dict = ClassDict::from_names(vec!["Sinocytheridea impressa".to_string()]);
        let annotation = annotation_with(vec![
            VocObject::new("Sinocytheridea impressa", 0, 0, 80, 60),
            VocObject::new("Unlisted species", 0, 0, 80, 60),
        ]);

        let mut report = RunReport::new();
        let lines = label_lines(&annotation, &dict, "folder", "file.xml", &mut report)
            .expect("convertible annotation");
        assert_eq!(lines.len(), 1);
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn zero_dimensions_with_objects_is_an_error() {
        let dict = ClassDict::single("Ostracods");
        let mut annotation = annotation_with(vec![VocObject::new("Ostracods", 0, 0, 10, 10)]);
        annotation.width = 0;
        annotation.height = 0;

        let mut report = RunReport::new();
        assert!(label_lines(&annotation, &dict, "folder", "file.xml", &mut report).is_none());
        assert_eq!(report.error_count(), 1);
    }
}
