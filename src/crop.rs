//! Bounding-box extraction and crop emission.
//!
//! Every labeled object of a reconciled annotation is cropped out of its
//! grid photograph into `class_images/<class>/`, one file per specimen.
//! Box geometry is validated before any pixels move: inverted or empty
//! boxes are rejected and reported, never clamped into plausibility.
//! Crop names carry a per-grid 1-based counter over validated crops only,
//! so a rejected box never leaves a gap in the numbering.

use std::path::{Path, PathBuf};

use image::GenericImageView;
use log::debug;

use crate::config::PipelineConfig;
use crate::error::GridlabelError;
use crate::key::GridKey;
use crate::pool::WorkerPool;
use crate::reconcile::{
    list_files_with_extension, list_subfolders, IssueContext, IssueKind, RunIssue, RunReport,
};
use crate::voc::{VocAnnotation, VocObject};

/// One crop pass over a reconciled annotation set.
pub struct CropJob<'a> {
    pub config: &'a PipelineConfig,
    /// Annotation set whose object labels name the crop classes.
    pub annotation_set: String,
}

/// One validated specimen, ready to be cut out of its photograph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CropEntity {
    pub class_name: String,
    pub key: GridKey,
    /// 1-based counter over the grid's validated crops.
    pub instance: usize,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl CropEntity {
    /// The crop's file stem: `<core>_<slide>_<grid_no>_ind<k>`.
    pub fn save_stem(&self) -> String {
        self.key.specimen_stem(self.instance)
    }

    pub fn width(&self) -> u32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> u32 {
        self.ymax - self.ymin
    }
}

/// Validates the objects of one annotation against its image dimensions.
///
/// Returns the accepted crops in annotation order, numbered over accepted
/// crops only, plus the rejected objects with the save-stem each would
/// have had.
pub fn extract_entities(
    key: &GridKey,
    objects: &[VocObject],
    image_width: u32,
    image_height: u32,
) -> (Vec<CropEntity>, Vec<(VocObject, String)>) {
    let mut accepted = Vec::new();
    let mut rejected = Vec::new();

    for object in objects {
        let candidate_stem = key.specimen_stem(accepted.len() + 1);
        if !object.has_valid_geometry() {
            rejected.push((object.clone(), candidate_stem));
            continue;
        }

        // Boxes may poke past the photograph edge; the crop is the
        // intersection with the image, and an empty intersection is a
        // geometry error like any other.
        let xmin = object.xmin.clamp(0, i64::from(image_width)) as u32;
        let ymin = object.ymin.clamp(0, i64::from(image_height)) as u32;
        let xmax = object.xmax.clamp(0, i64::from(image_width)) as u32;
        let ymax = object.ymax.clamp(0, i64::from(image_height)) as u32;
        if xmax <= xmin || ymax <= ymin {
            rejected.push((object.clone(), candidate_stem));
            continue;
        }

        accepted.push(CropEntity {
            class_name: object.name.clone(),
            key: key.clone(),
            instance: accepted.len() + 1,
            xmin,
            ymin,
            xmax,
            ymax,
        });
    }

    (accepted, rejected)
}

/// Crops every folder of the job's annotation set.
pub fn crop_tree(job: &CropJob<'_>, pool: &WorkerPool) -> Result<RunReport, GridlabelError> {
    let pascal_dir = job.config.pascal_dir(&job.annotation_set);
    if !pascal_dir.is_dir() {
        return Err(GridlabelError::NotADirectory(pascal_dir));
    }

    let folders = list_subfolders(&pascal_dir)?;
    let reports = pool.map(folders, |folder| crop_folder(job, &folder));

    let mut merged = RunReport::new();
    for folder_report in reports {
        merged.merge(folder_report);
    }
    Ok(merged)
}

/// Crops one annotation folder's specimens into the class tree.
pub fn crop_folder(job: &CropJob<'_>, folder_name: &str) -> RunReport {
    let mut report = RunReport::new();

    let annotation_folder = job.config.pascal_dir(&job.annotation_set).join(folder_name);
    let image_folder = job.config.grid_images().join(folder_name);
    let class_root = job.config.class_images();

    let files = match list_files_with_extension(&annotation_folder, "xml") {
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
        let annotation_path = annotation_folder.join(&file_name);
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
        if annotation.objects.is_empty() {
            continue;
        }

        let key = match GridKey::parse_path(Path::new(&file_name)) {
            Ok(key) => key,
            Err(error) => {
                report.add(RunIssue::warning(
                    IssueKind::UnparsableName,
                    error.to_string(),
                    IssueContext::File { path: file_name },
                ));
                continue;
            }
        };

        let image_path =
            image_folder.join(format!("{}.{}", key.stem(), job.config.image_extension));
        let image = match image::open(&image_path) {
            Ok(image) => image,
            Err(error) => {
                report.add(RunIssue::warning(
                    IssueKind::MissingSourceImage,
                    format!("cannot crop {}: {error}", image_path.display()),
                    IssueContext::Grid {
                        folder: folder_name.to_string(),
                        grid_no: key.grid_no,
                    },
                ));
                continue;
            }
        };

        let (width, height) = image.dimensions();
        let (entities, rejected) = extract_entities(&key, &annotation.objects, width, height);

        for (object, save_stem) in rejected {
            report.add(RunIssue::error(
                IssueKind::InvalidGeometry,
                format!(
                    "box ({}, {}, {}, {}) has no area; {} not written",
                    object.xmin, object.ymin, object.xmax, object.ymax, save_stem
                ),
                IssueContext::Grid {
                    folder: folder_name.to_string(),
                    grid_no: key.grid_no,
                },
            ));
        }

        for entity in entities {
            let crop = image.crop_imm(entity.xmin, entity.ymin, entity.width(), entity.height());
            let out_path = class_crop_path(
                &class_root,
                &entity.class_name,
                &entity.save_stem(),
                &job.config.image_extension,
            );
            if let Err(error) = write_crop(&crop, &out_path) {
                report.add(RunIssue::error(
                    IssueKind::Io,
                    error.to_string(),
                    IssueContext::File {
                        path: out_path.display().to_string(),
                    },
                ));
                continue;
            }
            debug!("wrote crop {}", out_path.display());
            report.counts.crops_written += 1;
        }
    }

    report
}

fn class_crop_path(class_root: &Path, class_name: &str, save_stem: &str, extension: &str) -> PathBuf {
    class_root
        .join(class_name)
        .join(format!("{save_stem}.{extension}"))
}

fn write_crop(crop: &image::DynamicImage, path: &Path) -> Result<(), GridlabelError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(GridlabelError::Io)?;
    }
    crop.save(path)
        .map_err(|error| GridlabelError::Io(std::io::Error::other(error)))
}
