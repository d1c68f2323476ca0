//! Run configuration
//!
//! One [`RunConfig`] value describes a whole run. It is built once by
//! [`ConfigLoader`] and handed to every component at construction time.

use crate::partition::calibration::CalibrationConfig;
use crate::partition::PartitionMode;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub mod loader;

pub use loader::ConfigLoader;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read configuration {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse configuration {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value {value:?} for {key}")]
    InvalidOverride { key: String, value: String },

    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Where chunk jobs execute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Bounded pool of local subprocesses
    #[default]
    Local,
    /// Submission to a batch queue, tracked by polling
    Remote,
}

/// How chunk inputs appear on the job command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputStyle {
    /// Every input file reference as its own argument
    #[default]
    Files,
    /// The chunk's persisted file list as a single argument
    ListFile,
}

/// Whether local jobs are started under `nice`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NicePolicy {
    /// Only when the pool is wider than three workers
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Directory receiving chunk outputs, the bad-input report and the summary
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Chunk file lists; defaults to `<output_dir>/filelists_tmp`
    #[serde(default)]
    pub partition_dir: Option<PathBuf>,

    /// Per-chunk logs; defaults to `<output_dir>/log`
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Merged per-dataset artifacts; defaults to `<output_dir>/hadd`
    #[serde(default)]
    pub merge_dir: Option<PathBuf>,

    /// Extension of output artifacts
    #[serde(default = "default_extension")]
    pub artifact_extension: String,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub partition: PartitionConfig,

    #[serde(default)]
    pub job: JobConfig,

    #[serde(default)]
    pub local: LocalConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    /// Accelerated test mode: process 1/N of the records
    #[serde(default)]
    pub quick: Option<u32>,

    /// Treat valid pre-existing chunk outputs as completed
    #[serde(default)]
    pub recover: bool,

    /// Load chunk lists persisted by an earlier run instead of partitioning
    #[serde(default)]
    pub reuse_partitions: bool,

    /// Log commands instead of running them
    #[serde(default)]
    pub dry_run: bool,

    /// Stamp used in remote job names; generated at load time when absent
    #[serde(default)]
    pub run_stamp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PartitionConfig {
    #[serde(default)]
    pub mode: PartitionMode,

    /// Records per job (by_record_count) or files per job (by_file_count)
    #[serde(default = "default_threshold")]
    pub threshold: u64,

    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,

    /// Probe printing the record count of the file given as last argument
    #[serde(default = "default_record_probe")]
    pub record_probe: Vec<String>,

    /// Concurrent record probes
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobConfig {
    /// Processing executable
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// `key=value` options passed to every job
    #[serde(default)]
    pub options: BTreeMap<String, String>,

    #[serde(default)]
    pub input_style: InputStyle,

    /// Option name used to pass the dataset's full file list, if any
    #[serde(default)]
    pub full_list_option: Option<String>,

    /// Kill local jobs running longer than this
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocalConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default)]
    pub nice: NicePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    #[serde(default = "default_queue")]
    pub queue: String,

    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Time after a dispatch or status check before the queue is asked again
    #[serde(default = "default_staleness_window", with = "humantime_serde")]
    pub staleness_window: Duration,

    /// Pause after each submission
    #[serde(default, with = "humantime_serde")]
    pub submit_spacing: Duration,

    #[serde(default = "default_submit_program")]
    pub submit_program: String,

    #[serde(default = "default_status_program")]
    pub status_program: String,

    /// Status output fragment meaning the queue does not know the job
    #[serde(default = "default_not_found_marker")]
    pub not_found_marker: String,

    /// Wrapper placed between the submit flags and the job command
    #[serde(default)]
    pub wrapper: Vec<String>,

    /// Give up on a chunk after this many dispatches
    #[serde(default)]
    pub resubmit_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reducer program followed by its fixed arguments
    #[serde(default = "default_reducer")]
    pub reducer: Vec<String>,

    /// Artifacts at or below this size in bytes are considered invalid
    #[serde(default = "default_min_valid_size")]
    pub min_valid_size: u64,
}

/// Retry budget per error kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    #[serde(default = "default_dispatch_retry")]
    pub dispatch: RetryPolicy,

    #[serde(default = "default_execution_retry")]
    pub execution: RetryPolicy,

    #[serde(default = "default_disk_retry")]
    pub disk: RetryPolicy,

    #[serde(default = "default_merge_retry")]
    pub merge: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            partition_dir: None,
            log_dir: None,
            merge_dir: None,
            artifact_extension: default_extension(),
            strategy: Strategy::default(),
            partition: PartitionConfig::default(),
            job: JobConfig::default(),
            local: LocalConfig::default(),
            remote: RemoteConfig::default(),
            merge: MergeConfig::default(),
            retry: RetryConfig::default(),
            quick: None,
            recover: false,
            reuse_partitions: false,
            dry_run: false,
            run_stamp: None,
        }
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            mode: PartitionMode::default(),
            threshold: default_threshold(),
            calibration: None,
            record_probe: default_record_probe(),
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            options: BTreeMap::new(),
            input_style: InputStyle::default(),
            full_list_option: None,
            timeout: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            nice: NicePolicy::default(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            queue: default_queue(),
            poll_interval: default_poll_interval(),
            staleness_window: default_staleness_window(),
            submit_spacing: Duration::ZERO,
            submit_program: default_submit_program(),
            status_program: default_status_program(),
            not_found_marker: default_not_found_marker(),
            wrapper: Vec::new(),
            resubmit_limit: None,
        }
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reducer: default_reducer(),
            min_valid_size: default_min_valid_size(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            dispatch: default_dispatch_retry(),
            execution: default_execution_retry(),
            disk: default_disk_retry(),
            merge: default_merge_retry(),
        }
    }
}

impl RunConfig {
    pub fn partition_dir(&self) -> PathBuf {
        self.partition_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("filelists_tmp"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("log"))
    }

    pub fn merge_dir(&self) -> PathBuf {
        self.merge_dir
            .clone()
            .unwrap_or_else(|| self.output_dir.join("hadd"))
    }

    /// Staleness window, shortened in quick mode
    pub fn effective_staleness_window(&self) -> Duration {
        match self.quick {
            Some(n) if n > 1 => self.remote.staleness_window / n,
            _ => self.remote.staleness_window,
        }
    }

    /// Whether local jobs should be wrapped in `nice`
    pub fn use_nice(&self) -> bool {
        match self.local.nice {
            NicePolicy::Always => true,
            NicePolicy::Never => false,
            NicePolicy::Auto => self.local.workers > 3,
        }
    }

    pub fn run_stamp(&self) -> &str {
        self.run_stamp.as_deref().unwrap_or("run")
    }

    /// Path of a chunk artifact inside `dir`
    pub fn artifact_path(&self, dir: &Path, stem: &str) -> PathBuf {
        dir.join(format!("{}.{}", stem, self.artifact_extension))
    }

    /// Check the configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.partition.threshold == 0 && self.partition.mode != PartitionMode::Whole {
            problems.push("partition.threshold must be greater than 0".to_string());
        }
        if self.partition.probe_concurrency == 0 {
            problems.push("partition.probe_concurrency must be greater than 0".to_string());
        }
        if self.partition.mode == PartitionMode::ByRecordCount
            && self.partition.record_probe.is_empty()
        {
            problems.push("partition.record_probe must name a program".to_string());
        }
        if self.local.workers == 0 {
            problems.push("local.workers must be greater than 0".to_string());
        }
        if self.remote.poll_interval.is_zero() {
            problems.push("remote.poll_interval must be greater than 0".to_string());
        }
        if self.remote.queue.trim().is_empty() && self.strategy == Strategy::Remote {
            problems.push("remote.queue must not be empty".to_string());
        }
        if self.merge.enabled && self.merge.reducer.is_empty() {
            problems.push("merge.reducer must name a program".to_string());
        }
        if self.merge.min_valid_size == 0 {
            problems.push("merge.min_valid_size must be greater than 0".to_string());
        }
        if self.artifact_extension.is_empty() {
            problems.push("artifact_extension must not be empty".to_string());
        }
        if self.job.binary.as_os_str().is_empty() {
            problems.push("job.binary must not be empty".to_string());
        }
        if let Some(0) = self.quick {
            problems.push("quick must be greater than 0".to_string());
        }
        for (name, policy) in [
            ("dispatch", &self.retry.dispatch),
            ("execution", &self.retry.execution),
            ("disk", &self.retry.disk),
            ("merge", &self.retry.merge),
        ] {
            problems.extend(
                policy
                    .problems()
                    .into_iter()
                    .map(|problem| format!("retry.{}: {}", name, problem)),
            );
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(problems))
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}

fn default_extension() -> String {
    "root".to_string()
}

fn default_threshold() -> u64 {
    1_000_000
}

fn default_record_probe() -> Vec<String> {
    vec!["count_records".to_string()]
}

fn default_probe_concurrency() -> usize {
    4
}

fn default_binary() -> PathBuf {
    PathBuf::from("./Analyzer")
}

fn default_workers() -> usize {
    1
}

fn default_queue() -> String {
    "1nh".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_staleness_window() -> Duration {
    Duration::from_secs(600)
}

fn default_submit_program() -> String {
    "bsub".to_string()
}

fn default_status_program() -> String {
    "bjobs".to_string()
}

fn default_not_found_marker() -> String {
    "is not found".to_string()
}

fn default_reducer() -> Vec<String> {
    vec!["hadd".to_string(), "-f".to_string(), "-v".to_string()]
}

fn default_min_valid_size() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_dispatch_retry() -> RetryPolicy {
    RetryPolicy::exponential(5, Duration::from_secs(10), Duration::from_secs(300))
}

fn default_execution_retry() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_secs(10))
}

fn default_disk_retry() -> RetryPolicy {
    RetryPolicy::fixed(20, Duration::from_secs(10))
}

fn default_merge_retry() -> RetryPolicy {
    RetryPolicy::fixed(5, Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RunConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.partition_dir(), PathBuf::from("results/filelists_tmp"));
        assert_eq!(config.merge_dir(), PathBuf::from("results/hadd"));
        assert_eq!(config.remote.poll_interval, Duration::from_secs(30));
        assert_eq!(config.retry.disk.attempts, 20);
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let mut config = RunConfig::default();
        config.partition.threshold = 0;
        config.local.workers = 0;
        config.merge.min_valid_size = 0;

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 3);
                assert!(problems.iter().any(|p| p.contains("threshold")));
                assert!(problems.iter().any(|p| p.contains("workers")));
                assert!(problems.iter().any(|p| p.contains("min_valid_size")));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unusable_backoff() {
        let mut config = RunConfig::default();
        config.retry.dispatch.backoff = crate::retry::BackoffStrategy::Exponential { base: -2.0 };
        config.retry.merge.jitter_factor = f64::NAN;

        match config.validate() {
            Err(ConfigError::Invalid(problems)) => {
                assert_eq!(problems.len(), 2);
                assert!(problems.iter().any(|p| p.starts_with("retry.dispatch") && p.contains("base")));
                assert!(problems.iter().any(|p| p.starts_with("retry.merge") && p.contains("jitter_factor")));
            }
            other => panic!("expected Invalid, got {:?}", other),
        }
    }

    #[test]
    fn test_whole_mode_ignores_threshold() {
        let mut config = RunConfig::default();
        config.partition.mode = PartitionMode::Whole;
        config.partition.threshold = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_quick_mode_shortens_staleness_window() {
        let mut config = RunConfig::default();
        assert_eq!(config.effective_staleness_window(), Duration::from_secs(600));

        config.quick = Some(100);
        assert_eq!(config.effective_staleness_window(), Duration::from_secs(6));
    }

    #[test]
    fn test_nice_policy() {
        let mut config = RunConfig::default();
        config.local.workers = 3;
        assert!(!config.use_nice());
        config.local.workers = 8;
        assert!(config.use_nice());
        config.local.nice = NicePolicy::Never;
        assert!(!config.use_nice());
    }

    #[test]
    fn test_parse_yaml_sections() {
        let yaml = r#"
output_dir: out
strategy: remote
partition:
  mode: by_file_count
  threshold: 5
remote:
  queue: 8nh
  poll_interval: 1m
  staleness_window: 10m
merge:
  enabled: false
"#;
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy, Strategy::Remote);
        assert_eq!(config.partition.mode, PartitionMode::ByFileCount);
        assert_eq!(config.partition.threshold, 5);
        assert_eq!(config.remote.queue, "8nh");
        assert_eq!(config.remote.poll_interval, Duration::from_secs(60));
        assert!(!config.merge.enabled);
        assert_eq!(config.merge.reducer, default_reducer());
    }
}
