//! Structured run reporting.
//!
//! Per-item problems never abort a batch; they accumulate here so
//! operators can triage after a full pass. The report carries counts per
//! issue kind plus the named examples themselves, can be rendered as text
//! and serialized as JSON.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// The severity of a run issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Severity {
    /// Expected messiness of hand-kept records; the item was skipped.
    Warning,
    /// A data-integrity violation that needs human attention.
    Error,
}

/// A stable code identifying the kind of run issue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum IssueKind {
    /// A file or folder name did not match the expected shape.
    UnparsableName,
    /// A parsed grid number outside the valid grid range.
    GridOutOfRange,
    /// A whole folder matched no slide in the ledger; the folder was aborted.
    NoSlideMatch,
    /// More than one distinct label recorded for one grid.
    AmbiguousMatch,
    /// A source photograph was absent or unreadable.
    MissingSourceImage,
    /// The ledger records a specimen whose grid was never annotated.
    MissingAnnotationButRecorded,
    /// An annotation file could not be parsed.
    MalformedAnnotation,
    /// A ledger row referencing a slide that was never digitized.
    LostRecord,
    /// A bounding box with non-positive width or height.
    InvalidGeometry,
    /// An object label absent from the class dictionary.
    UnknownClass,
    /// A class (or row of one) below the minimum-sample threshold.
    DroppedClass,
    /// A filesystem error while reading or writing one item.
    Io,
}

/// Where a run issue occurred.
#[derive(Clone, Debug, Serialize)]
pub enum IssueContext {
    Folder { name: String },
    Grid { folder: String, grid_no: u32 },
    File { path: String },
    Class { name: String },
}

impl fmt::Display for IssueContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueContext::Folder { name } => write!(f, "folder {name}"),
            IssueContext::Grid { folder, grid_no } => write!(f, "{folder} grid {grid_no}"),
            IssueContext::File { path } => write!(f, "file {path}"),
            IssueContext::Class { name } => write!(f, "class {name}"),
        }
    }
}

/// A single run issue.
#[derive(Clone, Debug, Serialize)]
pub struct RunIssue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    pub context: IssueContext,
}

impl RunIssue {
    pub fn error(kind: IssueKind, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            context,
        }
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>, context: IssueContext) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            context,
        }
    }
}

impl fmt::Display for RunIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "ERROR",
            Severity::Warning => "WARN ",
        };
        write!(
            f,
            "[{}] {:?} in {}: {}",
            severity, self.kind, self.context, self.message
        )
    }
}

/// Work counters accumulated across a run.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RunCounts {
    pub folders_processed: usize,
    pub folders_aborted: usize,
    pub annotations_labeled: usize,
    pub annotations_empty: usize,
    pub annotations_backfilled: usize,
    pub label_files_written: usize,
    pub crops_written: usize,
    pub manifest_rows: usize,
    pub lost_records: usize,
}

impl RunCounts {
    fn merge(&mut self, other: &RunCounts) {
        self.folders_processed += other.folders_processed;
        self.folders_aborted += other.folders_aborted;
        self.annotations_labeled += other.annotations_labeled;
        self.annotations_empty += other.annotations_empty;
        self.annotations_backfilled += other.annotations_backfilled;
        self.label_files_written += other.label_files_written;
        self.crops_written += other.crops_written;
        self.manifest_rows += other.manifest_rows;
        self.lost_records += other.lost_records;
    }
}

/// The accumulated outcome of one pipeline phase.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub counts: RunCounts,
    pub issues: Vec<RunIssue>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, issue: RunIssue) {
        self.issues.push(issue);
    }

    /// Folds another report (typically from a parallel worker) into this one.
    pub fn merge(&mut self, other: RunReport) {
        self.counts.merge(&other.counts);
        self.issues.extend(other.issues);
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    /// Issue totals keyed by kind.
    pub fn counts_by_kind(&self) -> BTreeMap<IssueKind, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind).or_insert(0) += 1;
        }
        counts
    }

    /// Issues of one kind, for post-run triage.
    pub fn issues_of_kind(&self, kind: IssueKind) -> impl Iterator<Item = &RunIssue> {
        self.issues.iter().filter(move |issue| issue.kind == kind)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(
            f,
            "Processed {} folder(s) ({} aborted): {} labeled, {} empty, {} backfilled annotation(s)",
            c.folders_processed,
            c.folders_aborted,
            c.annotations_labeled,
            c.annotations_empty,
            c.annotations_backfilled,
        )?;
        if c.label_files_written + c.crops_written + c.manifest_rows + c.lost_records > 0 {
            writeln!(
                f,
                "Wrote {} label file(s), {} crop(s), {} manifest row(s); {} lost record(s)",
                c.label_files_written, c.crops_written, c.manifest_rows, c.lost_records,
            )?;
        }

        if self.issues.is_empty() {
            return writeln!(f, "No issues found");
        }

        writeln!(
            f,
            "{} error(s) and {} warning(s):",
            self.error_count(),
            self.warning_count()
        )?;
        for (kind, count) in self.counts_by_kind() {
            writeln!(f, "  {kind:?}: {count}")?;
            for issue in self.issues_of_kind(kind).take(3) {
                writeln!(f, "    {issue}")?;
            }
        }
        Ok(())
    }
}
