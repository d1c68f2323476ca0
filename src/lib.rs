//! # chunkrun
//!
//! Splits per-dataset file lists into bounded chunks, runs one job per chunk
//! on a local worker pool or a remote batch queue, and merges each dataset's
//! chunk outputs as soon as all of them are available.
//!
//! ## Usage
//!
//! ```bash
//! chunkrun run lists/*.txt --nevt 500000 [--batch --queue 8nh] [--recover]
//! chunkrun plan lists/ --nfile 10
//! ```
//!
//! ## Modules
//!
//! - `input` - Dataset list discovery and record counting
//! - `partition` - Splitting datasets into chunks, threshold calibration, chunk lists
//! - `job` - Job command lines, local execution, batch queue submission
//! - `scheduler` - Chunk state table and the local and remote scheduling loops
//! - `merge` - Progressive per-dataset merging of chunk outputs
//! - `orchestrator` - Wiring of the above into one run
//! - `config` - Layered run configuration
//! - `subprocess` - Subprocess abstraction layer for testing and dry runs
//! - `testing` - Fakes and fixtures for tests
pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod job;
pub mod layout;
pub mod merge;
pub mod orchestrator;
pub mod partition;
pub mod report;
pub mod retry;
pub mod scheduler;
pub mod subprocess;
pub mod types;

pub mod testing;

pub use config::RunConfig;
pub use error::{RunError, RunResult};
pub use orchestrator::{Orchestrator, RunPlan};
pub use report::RunSummary;
