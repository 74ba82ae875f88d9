//! Annotation reconciliation.
//!
//! This is the heart of the pipeline: matching the hand-kept ledger of
//! specimen observations against the on-disk annotation tree, one folder
//! per slide. For every grid slot in the expected range the reconciler
//! decides whether an annotation exists, needs its labels injected from
//! the ledger, or must be synthesized from the photograph alone, and
//! backfills the slots no file accounts for. Per-grid problems never
//! abort a folder, and per-folder problems never abort the batch; both
//! accumulate in the [`RunReport`].
//!
//! Re-running over an unchanged tree and ledger is idempotent: labels are
//! re-derived from the ledger, geometry is never touched, and the XML
//! writer is deterministic, so a second pass produces byte-identical files.

pub mod report;

pub use report::{IssueContext, IssueKind, RunCounts, RunIssue, RunReport, Severity};

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::PipelineConfig;
use crate::error::GridlabelError;
use crate::key::{FolderKey, GridKey, GRID_MAX, GRID_MIN};
use crate::ledger::{LookupOutcome, RecordLedger, TaxonLevel};
use crate::pool::WorkerPool;
use crate::voc::{probe_dimensions, VocAnnotation};

/// One reconciliation pass over a whole annotation tree.
///
/// The ledger is frozen before workers spawn; every field is read-only
/// during the parallel phase.
pub struct ReconcileJob<'a> {
    pub config: &'a PipelineConfig,
    pub ledger: &'a RecordLedger,
    /// Taxonomy level the output annotation set is labeled at.
    pub level: TaxonLevel,
    /// Annotation set read as the geometry source (usually `pseudo`).
    pub source_set: String,
}

impl ReconcileJob<'_> {
    fn source_dir(&self) -> PathBuf {
        self.config.pascal_dir(&self.source_set)
    }

    fn output_dir(&self) -> PathBuf {
        self.config.pascal_dir(self.level.as_str())
    }
}

/// Rewrites every object label in `annotation` to `label`.
///
/// Returns the number of objects rewritten. Geometry is never touched:
/// each grid holds one species, so every box gets the same resolved name.
pub fn inject_label(annotation: &mut VocAnnotation, label: &str) -> usize {
    for object in &mut annotation.objects {
        object.name = label.to_string();
    }
    annotation.objects.len()
}

/// Reconciles every folder under the job's source tree.
///
/// Folders are partitioned statically over the pool; each worker returns
/// its own report and the results are merged after the join.
pub fn reconcile_tree(job: &ReconcileJob<'_>, pool: &WorkerPool) -> Result<RunReport, GridlabelError> {
    let source_dir = job.source_dir();
    if !source_dir.is_dir() {
        return Err(GridlabelError::NotADirectory(source_dir));
    }

    let folders = list_subfolders(&source_dir)?;
    info!(
        "reconciling {} folder(s) from {} at {} level",
        folders.len(),
        source_dir.display(),
        job.level.as_str()
    );

    let reports = pool.map(folders, |folder| reconcile_folder(job, &folder));

    let mut merged = RunReport::new();
    for folder_report in reports {
        merged.merge(folder_report);
    }
    Ok(merged)
}

/// Reconciles one annotation folder.
///
/// Runs the per-folder state machine: discover the files present, classify
/// each against the ledger, then backfill the grid slots nothing accounted
/// for. Returns the folder's report; nothing here is fatal to the batch.
pub fn reconcile_folder(job: &ReconcileJob<'_>, folder_name: &str) -> RunReport {
    let mut report = RunReport::new();

    let folder_key = match FolderKey::parse(folder_name) {
        Ok(key) => key,
        Err(error) => {
            report.add(RunIssue::warning(
                IssueKind::UnparsableName,
                error.to_string(),
                IssueContext::Folder {
                    name: folder_name.to_string(),
                },
            ));
            return report;
        }
    };

    // Folder identity failure: the whole folder matches no known slide.
    if !job.ledger.has_slide(&folder_key.core, &folder_key.slide) {
        report.add(RunIssue::error(
            IssueKind::NoSlideMatch,
            format!(
                "no ledger row references core '{}' slide '{}'; folder aborted",
                folder_key.core, folder_key.slide
            ),
            IssueContext::Folder {
                name: folder_name.to_string(),
            },
        ));
        report.counts.folders_aborted += 1;
        return report;
    }

    let source_folder = job.source_dir().join(folder_name);
    let out_folder = job.output_dir().join(folder_name);
    let image_folder = job.config.grid_images().join(folder_name);

    let annotation_files = match list_files_with_extension(&source_folder, "xml") {
        Ok(files) => files,
        Err(error) => {
            report.add(RunIssue::error(
                IssueKind::Io,
                error.to_string(),
                IssueContext::Folder {
                    name: folder_name.to_string(),
                },
            ));
            report.counts.folders_aborted += 1;
            return report;
        }
    };

    // Every grid slot the folder must account for by the end of the pass.
    let mut unaccounted: Vec<u32> = (GRID_MIN..=GRID_MAX).collect();

    for file_name in &annotation_files {
        let key = match GridKey::parse_path(Path::new(file_name)) {
            Ok(key) => key,
            Err(error) => {
                report.add(RunIssue::warning(
                    IssueKind::UnparsableName,
                    error.to_string(),
                    IssueContext::File {
                        path: file_name.clone(),
                    },
                ));
                continue;
            }
        };

        if key.grid_no == 0 {
            debug!("ignoring grid 0 sentinel {}", key);
            continue;
        }
        if !key.in_range() {
            report.add(RunIssue::warning(
                IssueKind::GridOutOfRange,
                format!("grid {} is outside the valid range", key.grid_no),
                IssueContext::File {
                    path: file_name.clone(),
                },
            ));
            continue;
        }

        unaccounted.retain(|&n| n != key.grid_no);

        match job.ledger.lookup(&key.core, &key.slide, key.grid_no, job.level) {
            LookupOutcome::Found(label) => {
                resolve_present_grid(
                    job,
                    &key,
                    &label,
                    &source_folder.join(file_name),
                    &out_folder.join(file_name),
                    &image_folder,
                    &mut report,
                );
            }
            LookupOutcome::NotFound => {
                // Photographed but never recorded: the output is an empty
                // annotation carrying only the image's real dimensions.
                let image_file = format!("{}.{}", key.stem(), job.config.image_extension);
                match synthesize_empty(folder_name, &image_folder, &image_file) {
                    Some(annotation) => {
                        if write_annotation(&annotation, &out_folder.join(file_name), &mut report) {
                            report.counts.annotations_empty += 1;
                        }
                    }
                    None => {
                        report.add(RunIssue::warning(
                            IssueKind::MissingSourceImage,
                            format!("cannot synthesize annotation: no readable image '{image_file}'"),
                            IssueContext::Grid {
                                folder: folder_name.to_string(),
                                grid_no: key.grid_no,
                            },
                        ));
                    }
                }
            }
            LookupOutcome::Ambiguous(labels) => {
                report.add(RunIssue::error(
                    IssueKind::AmbiguousMatch,
                    format!(
                        "{} distinct labels recorded for one grid: {}",
                        labels.len(),
                        labels.join(", ")
                    ),
                    IssueContext::Grid {
                        folder: folder_name.to_string(),
                        grid_no: key.grid_no,
                    },
                ));
            }
        }
    }

    backfill_missing_grids(
        job,
        &folder_key,
        folder_name,
        &unaccounted,
        &out_folder,
        &image_folder,
        &mut report,
    );

    report.counts.folders_processed += 1;
    report
}

/// Resolves one grid whose annotation file is present on disk.
fn resolve_present_grid(
    job: &ReconcileJob<'_>,
    key: &GridKey,
    label: &str,
    source_path: &Path,
    out_path: &Path,
    image_folder: &Path,
    report: &mut RunReport,
) {
    let mut annotation = match VocAnnotation::parse_file(source_path) {
        Ok(annotation) => annotation,
        Err(error) => {
            report.add(RunIssue::warning(
                IssueKind::MalformedAnnotation,
                error.to_string(),
                IssueContext::File {
                    path: source_path.display().to_string(),
                },
            ));
            return;
        }
    };

    inject_label(&mut annotation, label);

    // Keep the recorded size in sync with the photograph. This also heals
    // width=0/height=0 placeholders left by annotation tooling.
    let image_path = image_folder.join(format!("{}.{}", key.stem(), job.config.image_extension));
    if let Some((width, height)) = probe_dimensions(&image_path) {
        annotation.width = width;
        annotation.height = height;
    }

    if write_annotation(&annotation, out_path, report) {
        report.counts.annotations_labeled += 1;
        debug!("labeled {} as '{}'", key, label);
    }
}

/// Synthesizes grid slots no annotation file accounted for.
///
/// A recorded-but-missing grid is a data-integrity error, never a
/// synthesis target: a label without geometry would poison every
/// downstream consumer.
fn backfill_missing_grids(
    job: &ReconcileJob<'_>,
    folder_key: &FolderKey,
    folder_name: &str,
    unaccounted: &[u32],
    out_folder: &Path,
    image_folder: &Path,
    report: &mut RunReport,
) {
    for &grid_no in unaccounted {
        let grid_context = IssueContext::Grid {
            folder: folder_name.to_string(),
            grid_no,
        };

        match job
            .ledger
            .lookup(&folder_key.core, &folder_key.slide, grid_no, job.level)
        {
            LookupOutcome::Found(label) => {
                report.add(RunIssue::error(
                    IssueKind::MissingAnnotationButRecorded,
                    format!("ledger records '{label}' but no annotation file exists"),
                    grid_context,
                ));
            }
            LookupOutcome::Ambiguous(labels) => {
                report.add(RunIssue::error(
                    IssueKind::MissingAnnotationButRecorded,
                    format!(
                        "ledger records {} conflicting labels ({}) but no annotation file exists",
                        labels.len(),
                        labels.join(", ")
                    ),
                    grid_context,
                ));
            }
            LookupOutcome::NotFound => {
                let stem = folder_key.grid_stem(grid_no);
                let image_file = format!("{}.{}", stem, job.config.image_extension);
                match synthesize_empty(folder_name, image_folder, &image_file) {
                    Some(annotation) => {
                        let out_path = out_folder.join(format!("{stem}.xml"));
                        if write_annotation(&annotation, &out_path, report) {
                            report.counts.annotations_backfilled += 1;
                        }
                    }
                    None => {
                        report.add(RunIssue::warning(
                            IssueKind::MissingSourceImage,
                            "photograph never taken; nothing to backfill".to_string(),
                            grid_context,
                        ));
                    }
                }
            }
        }
    }
}

/// Builds an empty annotation from the photograph's probed dimensions.
///
/// Returns `None` when the image is absent or unreadable; there is no
/// geometry to synthesize from.
fn synthesize_empty(
    folder_name: &str,
    image_folder: &Path,
    image_file: &str,
) -> Option<VocAnnotation> {
    let image_path = image_folder.join(image_file);
    let (width, height) = probe_dimensions(&image_path)?;
    Some(VocAnnotation::empty(
        folder_name,
        image_file,
        &image_path.display().to_string(),
        width,
        height,
    ))
}

fn write_annotation(annotation: &VocAnnotation, path: &Path, report: &mut RunReport) -> bool {
    match annotation.write_file(path) {
        Ok(()) => true,
        Err(error) => {
            report.add(RunIssue::error(
                IssueKind::Io,
                error.to_string(),
                IssueContext::File {
                    path: path.display().to_string(),
                },
            ));
            false
        }
    }
}

/// Immediate subdirectory names, sorted for deterministic partitioning.
pub fn list_subfolders(dir: &Path) -> Result<Vec<String>, GridlabelError> {
    let mut folders = Vec::new();
    for entry in fs::read_dir(dir).map_err(GridlabelError::Io)? {
        let entry = entry.map_err(GridlabelError::Io)?;
        if entry.file_type().map_err(GridlabelError::Io)?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                folders.push(name.to_string());
            }
        }
    }
    folders.sort();
    Ok(folders)
}

/// File names with the given extension inside one directory.
pub fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<String>, GridlabelError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(GridlabelError::Io)? {
        let entry = entry.map_err(GridlabelError::Io)?;
        if !entry.file_type().map_err(GridlabelError::Io)?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if Path::new(name)
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case(extension))
        {
            files.push(name.to_string());
        }
    }
    files.sort();
    Ok(files)
}
