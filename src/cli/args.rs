//! CLI argument structures

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Split dataset file lists into jobs, run them and merge the outputs
#[derive(Parser)]
#[command(name = "chunkrun")]
#[command(about = "chunkrun - Run per-dataset jobs in bounded chunks and merge their outputs", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Partition, execute and merge
    #[command(name = "run")]
    Run(RunArgs),

    /// Partition and print the chunk plan without running anything
    #[command(name = "plan")]
    Plan(RunArgs),
}

/// Flags shared by `run` and `plan`; each one overrides the configuration
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Dataset file lists, glob patterns or directories of `*.txt` lists
    #[arg(value_name = "LISTS")]
    pub lists: Vec<String>,

    /// Configuration file (TOML or YAML)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Submit jobs to the batch queue instead of running them locally
    #[arg(long)]
    pub batch: bool,

    /// Batch queue name
    #[arg(long, value_name = "QUEUE")]
    pub queue: Option<String>,

    /// Local worker count
    #[arg(short = 'j', long)]
    pub workers: Option<usize>,

    /// Split by record count, with at most N records per job
    #[arg(long, value_name = "N", conflicts_with = "nfile")]
    pub nevt: Option<u64>,

    /// Split by file count, with N files per job
    #[arg(long, value_name = "N")]
    pub nfile: Option<u64>,

    /// Do not split: one job per dataset
    #[arg(long, conflicts_with_all = ["nevt", "nfile"])]
    pub whole: bool,

    /// Ratio table scaling the threshold per dataset
    #[arg(long, value_name = "TABLE")]
    pub optim: Option<PathBuf>,

    /// Process 1/N of the records
    #[arg(long, value_name = "N")]
    pub quick: Option<u32>,

    /// Treat valid existing chunk outputs as done
    #[arg(long)]
    pub recover: bool,

    /// Reuse chunk lists written by an earlier run
    #[arg(long)]
    pub useprev: bool,

    /// Skip merging
    #[arg(long)]
    pub nohadd: bool,

    /// Log commands instead of running them
    #[arg(long)]
    pub dry_run: bool,

    /// Output directory
    #[arg(short = 'o', long, value_name = "DIR")]
    pub outdir: Option<PathBuf>,
}
