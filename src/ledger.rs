//! The master ledger of specimen observations.
//!
//! The ledger is a headerless CSV maintained by hand during imaging:
//! column 0 is the core, 1 the slide, 2 the grid number, 8 the genus and
//! 9 the species epithet (positions are significant, not named). It is
//! loaded once per run and queried read-only by every worker.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read};
use std::path::Path;

use log::warn;

use crate::error::GridlabelError;

const COL_CORE: usize = 0;
const COL_SLIDE: usize = 1;
const COL_GRID: usize = 2;
const COL_GENUS: usize = 8;
const COL_SPECIES: usize = 9;
const MIN_COLUMNS: usize = 10;

/// Which taxonomy level a label is resolved at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaxonLevel {
    Genus,
    Species,
}

impl TaxonLevel {
    /// Parses a level name, tolerating surrounding text (`genus_annotation`
    /// resolves to `Genus`).
    pub fn parse(raw: &str) -> Option<Self> {
        let lower = raw.to_lowercase();
        if lower.contains("genus") {
            Some(TaxonLevel::Genus)
        } else if lower.contains("species") {
            Some(TaxonLevel::Species)
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaxonLevel::Genus => "genus",
            TaxonLevel::Species => "species",
        }
    }
}

/// One row of the master CSV.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerRecord {
    pub core: String,
    pub slide: String,
    pub grid_no: u32,
    pub genus: String,
    pub species: String,
}

impl LedgerRecord {
    /// The label text at the requested level.
    ///
    /// Species labels are the genus and the epithet joined by one space.
    pub fn label(&self, level: TaxonLevel) -> String {
        match level {
            TaxonLevel::Genus => self.genus.clone(),
            TaxonLevel::Species => format!("{} {}", self.genus, self.species),
        }
    }

    /// Lowercased `core_slide` join key.
    pub fn search_name(&self) -> String {
        format!("{}_{}", self.core, self.slide).to_lowercase()
    }
}

/// Outcome of a per-grid label lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LookupOutcome {
    /// Exactly one label recorded for the grid.
    Found(String),
    /// No row for this grid; the caller synthesizes an empty annotation.
    NotFound,
    /// More than one distinct label for one grid. Never resolved silently.
    Ambiguous(Vec<String>),
}

/// Distinct labels for dictionary construction, plus the diverted rows.
#[derive(Clone, Debug, Default)]
pub struct LabelCensus {
    /// Distinct labels, most frequent first.
    pub labels: Vec<String>,
    /// Rows whose `(core, slide)` matches no known annotation folder.
    pub lost: Vec<LedgerRecord>,
}

/// The in-memory ledger, indexed case-insensitively by `(core, slide)`.
///
/// Load-once, read-many: built before workers spawn and frozen for the
/// rest of the run.
#[derive(Clone, Debug, Default)]
pub struct RecordLedger {
    by_slide: HashMap<String, Vec<LedgerRecord>>,
    record_count: usize,
}

impl RecordLedger {
    /// Loads the ledger from the master CSV file.
    pub fn load(path: &Path) -> Result<Self, GridlabelError> {
        let file = File::open(path).map_err(GridlabelError::Io)?;
        Self::from_reader(BufReader::new(file), path)
    }

    /// Loads the ledger from a CSV string. Useful for testing without file I/O.
    pub fn from_csv_str(csv_str: &str) -> Result<Self, GridlabelError> {
        Self::from_reader(csv_str.as_bytes(), Path::new("<string>"))
    }

    fn from_reader<R: Read>(reader: R, path: &Path) -> Result<Self, GridlabelError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut by_slide: HashMap<String, Vec<LedgerRecord>> = HashMap::new();
        let mut record_count = 0;

        for (row_idx, result) in csv_reader.records().enumerate() {
            let row = result.map_err(|source| GridlabelError::LedgerRead {
                path: path.to_path_buf(),
                source,
            })?;

            if row.len() < MIN_COLUMNS {
                warn!(
                    "ledger row {} has {} column(s), expected at least {}; skipped",
                    row_idx + 1,
                    row.len(),
                    MIN_COLUMNS
                );
                continue;
            }

            let raw_grid = row[COL_GRID].trim();
            let Ok(grid_no) = raw_grid.parse::<u32>() else {
                warn!(
                    "ledger row {} has non-numeric grid number '{}'; skipped",
                    row_idx + 1,
                    raw_grid
                );
                continue;
            };

            let record = LedgerRecord {
                core: row[COL_CORE].trim().to_string(),
                slide: row[COL_SLIDE].trim().to_string(),
                grid_no,
                genus: row[COL_GENUS].trim().to_string(),
                species: row[COL_SPECIES].trim().to_string(),
            };

            by_slide
                .entry(record.search_name())
                .or_default()
                .push(record);
            record_count += 1;
        }

        Ok(Self {
            by_slide,
            record_count,
        })
    }

    /// Number of usable rows loaded.
    pub fn len(&self) -> usize {
        self.record_count
    }

    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// Whether any row references this `(core, slide)`, case-insensitively.
    pub fn has_slide(&self, core: &str, slide: &str) -> bool {
        self.by_slide
            .contains_key(&format!("{core}_{slide}").to_lowercase())
    }

    /// All rows for one `(core, slide)`, in file order.
    pub fn slide_records(&self, core: &str, slide: &str) -> &[LedgerRecord] {
        self.by_slide
            .get(&format!("{core}_{slide}").to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Resolves the label recorded for one grid.
    ///
    /// Identical duplicate rows count as one match (record-keeping
    /// redundancy); distinct labels for the same grid are ambiguous.
    pub fn lookup(&self, core: &str, slide: &str, grid_no: u32, level: TaxonLevel) -> LookupOutcome {
        let mut labels: Vec<String> = Vec::new();
        for record in self.slide_records(core, slide) {
            if record.grid_no != grid_no {
                continue;
            }
            let label = record.label(level);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }

        match labels.len() {
            0 => LookupOutcome::NotFound,
            1 => LookupOutcome::Found(labels.remove(0)),
            _ => LookupOutcome::Ambiguous(labels),
        }
    }

    /// Census of distinct labels across rows whose slide is known.
    ///
    /// `known_folders` holds lowercased `core_slide` search names of the
    /// annotation folders on disk. Rows outside it are diverted to the
    /// lost-records report instead of contributing labels; the ledger may
    /// reference specimens whose images were never digitized.
    pub fn census(
        &self,
        level: TaxonLevel,
        known_folders: &std::collections::HashSet<String>,
    ) -> LabelCensus {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut first_seen: Vec<String> = Vec::new();
        let mut lost = Vec::new();

        let mut search_names: Vec<&String> = self.by_slide.keys().collect();
        search_names.sort();

        for search_name in search_names {
            let records = &self.by_slide[search_name];
            if !known_folders.contains(search_name) {
                lost.extend(records.iter().cloned());
                continue;
            }
            for record in records {
                let label = record.label(level);
                if !counts.contains_key(&label) {
                    first_seen.push(label.clone());
                }
                *counts.entry(label).or_insert(0) += 1;
            }
        }

        let mut labels = first_seen;
        labels.sort_by(|a, b| counts[b].cmp(&counts[a]).then_with(|| a.cmp(b)));

        LabelCensus { labels, lost }
    }

    /// Writes diverted rows to the lost-records CSV.
    pub fn write_lost_records(path: &Path, lost: &[LedgerRecord]) -> Result<(), GridlabelError> {
        let file = File::create(path).map_err(GridlabelError::Io)?;
        let mut writer = csv::Writer::from_writer(BufWriter::new(file));

        for record in lost {
            writer
                .write_record([
                    record.core.as_str(),
                    record.slide.as_str(),
                    &record.grid_no.to_string(),
                    record.genus.as_str(),
                    record.species.as_str(),
                ])
                .map_err(|source| GridlabelError::ManifestWrite {
                    path: path.to_path_buf(),
                    source,
                })?;
        }

        writer
            .into_inner()
            .map_err(|e| GridlabelError::Io(e.into_error()))?;
        Ok(())
    }
}
