use std::path::PathBuf;
use thiserror::Error;

/// The main error type for gridlabel operations.
///
/// Only run-fatal conditions live here: unreadable top-level inputs and
/// broken output targets. Per-item problems (unparsable filenames, missing
/// images, ambiguous ledger rows) accumulate in the run report instead.
#[derive(Debug, Error)]
pub enum GridlabelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse pipeline config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to read ledger CSV {path}: {source}")]
    LedgerRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to parse VOC XML {path}: {message}")]
    VocXmlParse { path: PathBuf, message: String },

    #[error("Failed to write VOC XML under {path}: {message}")]
    VocWrite { path: PathBuf, message: String },

    #[error("Failed to write manifest {path}: {source}")]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Failed to write dataset YAML {path}: {source}")]
    DataYamlWrite {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Failed to build worker pool: {0}")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Unsupported annotation set '{0}' (expected pseudo, genus or species)")]
    UnsupportedSet(String),

    #[error("Run finished with {error_count} error(s) across {folder_count} folder(s)")]
    RunFailed {
        error_count: usize,
        folder_count: usize,
    },
}
