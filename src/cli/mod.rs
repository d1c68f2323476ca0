//! CLI command handlers
//!
//! Turns parsed arguments into a [`RunConfig`] (defaults, user file,
//! `--config`, environment, then flags) and drives the orchestrator.

pub mod args;

pub use args::{Cli, Commands, RunArgs};

use crate::config::{ConfigLoader, RunConfig, Strategy};
use crate::orchestrator::Orchestrator;
use crate::partition::calibration::CalibrationConfig;
use crate::partition::PartitionMode;
use anyhow::{Context, Result};
use std::process::ExitCode;
use tracing::{debug, info};

/// Process exit status of a finished command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every chunk completed and every merge succeeded
    Success,
    /// Some chunks are missing or some merges failed
    Incomplete,
    /// The run could not proceed
    Fatal,
}

impl From<RunStatus> for ExitCode {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Success => ExitCode::SUCCESS,
            RunStatus::Incomplete => ExitCode::from(1),
            RunStatus::Fatal => ExitCode::from(2),
        }
    }
}

/// Map `-v` occurrences to a tracing filter directive
pub fn log_level(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Build the layered configuration for `args`
pub fn load_config(args: &RunArgs) -> Result<RunConfig> {
    let mut loader = ConfigLoader::new()?.with_user_file()?;
    if let Some(path) = &args.config {
        loader = loader
            .with_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
    }
    let mut config = loader.with_env()?.build()?;
    apply_overrides(args, &mut config);
    Ok(config)
}

/// Apply command-line flags on top of a loaded configuration
pub fn apply_overrides(args: &RunArgs, config: &mut RunConfig) {
    if args.batch {
        config.strategy = Strategy::Remote;
    }
    if let Some(queue) = &args.queue {
        config.remote.queue = queue.clone();
    }
    if let Some(workers) = args.workers {
        config.local.workers = workers;
    }
    if let Some(records) = args.nevt {
        config.partition.mode = PartitionMode::ByRecordCount;
        config.partition.threshold = records;
    }
    if let Some(files) = args.nfile {
        config.partition.mode = PartitionMode::ByFileCount;
        config.partition.threshold = files;
    }
    if args.whole {
        config.partition.mode = PartitionMode::Whole;
    }
    if let Some(table) = &args.optim {
        match config.partition.calibration.as_mut() {
            Some(calibration) => calibration.table = table.clone(),
            None => config.partition.calibration = Some(CalibrationConfig::for_table(table)),
        }
    }
    if args.quick.is_some() {
        config.quick = args.quick;
    }
    if let Some(outdir) = &args.outdir {
        config.output_dir = outdir.clone();
    }
    config.recover |= args.recover;
    config.reuse_partitions |= args.useprev;
    config.dry_run |= args.dry_run;
    if args.nohadd {
        config.merge.enabled = false;
    }
}

/// Run `command`, printing the plan or the run summary to stdout
pub async fn execute(command: Commands) -> Result<RunStatus> {
    match command {
        Commands::Plan(args) => {
            let config = load_config(&args)?;
            let orchestrator = Orchestrator::builder(config).build()?;
            let plan = orchestrator
                .plan(&args.lists)
                .await
                .context("Failed to partition inputs")?;
            print!("{plan}");
            Ok(RunStatus::Success)
        }
        Commands::Run(args) => {
            let config = load_config(&args)?;
            debug!("Effective configuration: {:?}", config);
            info!("Run {} writing to {}", config.run_stamp(), config.output_dir.display());

            let orchestrator = Orchestrator::builder(config).build()?;
            let summary = orchestrator.run(&args.lists).await.context("Run aborted")?;
            print!("{summary}");
            Ok(if summary.success() {
                RunStatus::Success
            } else {
                RunStatus::Incomplete
            })
        }
    }
}
