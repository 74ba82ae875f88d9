//! Gridlabel: annotation-to-training-set reconciliation for grid
//! micrograph datasets.
//!
//! Gridlabel matches the hand-kept ledger of specimen observations
//! against a tree of PASCAL VOC annotations, injects resolved taxonomic
//! labels, synthesizes annotations for unrecorded or missing grids, crops
//! every validated bounding box into per-class training images, and
//! compiles the thresholded classification manifests the model training
//! consumes.
//!
//! # Modules
//!
//! - [`key`]: canonical grid/folder keys parsed from filenames
//! - [`ledger`]: the master CSV of specimen observations
//! - [`reconcile`]: the annotation reconciliation state machine
//! - [`crop`]: bounding-box extraction into per-class crop images
//! - [`compile`]: manifest and class-guide compilation
//! - [`convert`]: PASCAL VOC → YOLO re-emission
//! - [`error`]: error types for gridlabel operations

pub mod compile;
pub mod config;
pub mod convert;
pub mod crop;
pub mod error;
pub mod key;
pub mod ledger;
pub mod pool;
pub mod reconcile;
pub mod voc;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::PipelineConfig;
use ledger::{RecordLedger, TaxonLevel};
use pool::WorkerPool;
use reconcile::RunReport;

pub use error::GridlabelError;

/// The gridlabel CLI application.
#[derive(Parser)]
#[command(name = "gridlabel")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Reconcile the annotation tree against the specimen ledger.
    Reconcile(ReconcileArgs),
    /// Convert a reconciled annotation set to YOLO label files.
    Convert(ConvertArgs),
    /// Crop every labeled bounding box into per-class images.
    Crop(CropArgs),
    /// Compile the classification manifests from the crop tree.
    Compile(CompileArgs),
}

/// Arguments shared by every subcommand.
#[derive(clap::Args)]
struct CommonArgs {
    /// Pipeline configuration YAML (overrides --base).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Dataset base path, used when no config file is given.
    #[arg(long, default_value = ".")]
    base: PathBuf,

    /// Worker thread count (default: CPU count minus one).
    #[arg(long)]
    jobs: Option<usize>,

    /// Output format for the run report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

impl CommonArgs {
    fn load_config(&self) -> Result<PipelineConfig, GridlabelError> {
        match &self.config {
            Some(path) => PipelineConfig::load(path),
            None => Ok(PipelineConfig::rooted(self.base.clone())),
        }
    }

    fn build_pool(&self) -> Result<WorkerPool, GridlabelError> {
        match self.jobs {
            Some(jobs) => WorkerPool::with_size(jobs),
            None => WorkerPool::with_default_size(),
        }
    }
}

/// Arguments for the reconcile subcommand.
#[derive(clap::Args)]
struct ReconcileArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Taxonomy level to label at ('genus' or 'species').
    #[arg(long, default_value = "genus")]
    target: String,

    /// Annotation set read as the geometry source.
    #[arg(long, default_value = "pseudo")]
    source: String,
}

/// Arguments for the convert subcommand.
#[derive(clap::Args)]
struct ConvertArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Annotation set to convert ('pseudo', 'genus' or 'species').
    #[arg(long, default_value = "pseudo")]
    target: String,
}

/// Arguments for the crop subcommand.
#[derive(clap::Args)]
struct CropArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Annotation set whose labels name the crop classes.
    #[arg(long, default_value = "species")]
    set: String,
}

/// Arguments for the compile subcommand.
#[derive(clap::Args)]
struct CompileArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Minimum sample count for a class to survive (overrides config).
    #[arg(long)]
    min_samples: Option<usize>,
}

/// Run the gridlabel CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), GridlabelError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Reconcile(args)) => run_reconcile(args),
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Crop(args)) => run_crop(args),
        Some(Commands::Compile(args)) => run_compile(args),
        None => {
            println!("gridlabel {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Annotation-to-training-set reconciliation for grid micrographs.");
            println!();
            println!("Run 'gridlabel --help' for usage information.");
            Ok(())
        }
    }
}

/// Execute the reconcile subcommand.
fn run_reconcile(args: ReconcileArgs) -> Result<(), GridlabelError> {
    let config = args.common.load_config()?;
    let level = TaxonLevel::parse(&args.target)
        .ok_or_else(|| GridlabelError::UnsupportedSet(args.target.clone()))?;
    let ledger = RecordLedger::load(&config.records_csv())?;
    let pool = args.common.build_pool()?;

    let job = reconcile::ReconcileJob {
        config: &config,
        ledger: &ledger,
        level,
        source_set: args.source,
    };
    let report = reconcile::reconcile_tree(&job, &pool)?;
    finish(report, &args.common.output)
}

/// Execute the convert subcommand.
fn run_convert(args: ConvertArgs) -> Result<(), GridlabelError> {
    let config = args.common.load_config()?;
    let ledger = RecordLedger::load(&config.records_csv())?;
    let pool = args.common.build_pool()?;

    let job = convert::ConvertJob {
        config: &config,
        ledger: &ledger,
        target: args.target,
    };
    let report = convert::convert_tree(&job, &pool)?;
    finish(report, &args.common.output)
}

/// Execute the crop subcommand.
fn run_crop(args: CropArgs) -> Result<(), GridlabelError> {
    let config = args.common.load_config()?;
    let pool = args.common.build_pool()?;

    let job = crop::CropJob {
        config: &config,
        annotation_set: args.set,
    };
    let report = crop::crop_tree(&job, &pool)?;
    finish(report, &args.common.output)
}

/// Execute the compile subcommand.
fn run_compile(args: CompileArgs) -> Result<(), GridlabelError> {
    let mut config = args.common.load_config()?;
    if let Some(min_samples) = args.min_samples {
        config.min_samples = min_samples;
    }

    let report = compile::compile_dataset(&config)?;
    finish(report, &args.common.output)
}

/// Print the run report and derive the exit status.
fn finish(report: RunReport, output: &str) -> Result<(), GridlabelError> {
    match output {
        "json" => println!(
            "{}",
            serde_json::to_string_pretty(&report).expect("report serializes")
        ),
        _ => print!("{report}"),
    }

    if report.error_count() > 0 {
        Err(GridlabelError::RunFailed {
            error_count: report.error_count(),
            folder_count: report.counts.folders_processed + report.counts.folders_aborted,
        })
    } else {
        Ok(())
    }
}
