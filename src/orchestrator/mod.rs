//! Wiring of discovery, partitioning, scheduling and merging into one run

pub mod builder;

pub use builder::OrchestratorBuilder;

use crate::artifact::ensure_dir;
use crate::config::{RunConfig, Strategy};
use crate::error::{RunError, RunResult};
use crate::input::{dataset_id, discover, expand_inputs, write_bad_items, BadItem, RecordCounter};
use crate::job::{BatchQueue, JobTemplate, LocalJobRunner, RemoteJobRunner};
use crate::layout::RunLayout;
use crate::merge::{MergeCoordinator, Reducer};
use crate::partition::calibration::CalibrationSource;
use crate::partition::lists::{load_chunk_lists, persist_chunk_lists};
use crate::partition::Partitioner;
use crate::report::RunSummary;
use crate::scheduler::{ChunkTable, LocalScheduler, RemoteScheduler, ScheduleOutcome};
use crate::subprocess::SubprocessManager;
use crate::types::Dataset;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Datasets split into chunks, plus the inputs left out
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub datasets: Vec<Dataset>,
    pub bad_items: Vec<BadItem>,
    /// Chunk lists were loaded from an earlier run
    pub reused: bool,
}

impl RunPlan {
    pub fn chunk_count(&self) -> usize {
        self.datasets.iter().map(Dataset::chunk_count).sum()
    }
}

impl fmt::Display for RunPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for dataset in &self.datasets {
            writeln!(f, "{}: {} chunk(s)", dataset.id, dataset.chunk_count())?;
            for chunk in &dataset.chunks {
                write!(f, "  {} {} file(s)", chunk.key, chunk.items.len())?;
                if chunk.items.iter().any(|item| item.records.is_some()) {
                    write!(f, ", {} record(s)", chunk.total_records())?;
                }
                writeln!(f)?;
            }
        }
        for bad in &self.bad_items {
            writeln!(f, "excluded {} ({}): {}", bad.file, bad.dataset, bad.reason)?;
        }
        Ok(())
    }
}

/// Runs one configured batch of datasets from file lists to merged artifacts
pub struct Orchestrator {
    config: RunConfig,
    layout: RunLayout,
    subprocess: SubprocessManager,
    counter: Arc<dyn RecordCounter>,
    queue: Arc<dyn BatchQueue>,
    reducer: Arc<dyn Reducer>,
    calibration: Arc<dyn CalibrationSource>,
}

impl Orchestrator {
    pub fn builder(config: RunConfig) -> OrchestratorBuilder {
        OrchestratorBuilder::new(config)
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    fn partitioner(&self) -> Partitioner {
        Partitioner::new(
            self.config.partition.mode,
            self.config.partition.threshold,
            Arc::clone(&self.calibration),
            self.layout.clone(),
        )
    }

    /// Resolve inputs and split every dataset into chunks without side effects
    pub async fn plan<S: AsRef<str>>(&self, inputs: &[S]) -> RunResult<RunPlan> {
        let lists = expand_inputs(inputs)?;
        if lists.is_empty() {
            return Err(RunError::InputDiscovery {
                file: inputs
                    .iter()
                    .map(|s| s.as_ref())
                    .collect::<Vec<_>>()
                    .join(" "),
                reason: "no dataset list found".to_string(),
            });
        }

        if self.config.reuse_partitions {
            return self.reuse_plan(lists).await;
        }

        let partitioner = self.partitioner();
        let counter = partitioner
            .mode()
            .needs_record_counts()
            .then(|| self.counter.as_ref());
        let discovered = discover(&lists, counter, self.config.partition.probe_concurrency).await?;

        let mut datasets = Vec::with_capacity(discovered.len());
        let mut bad_items = Vec::new();
        for found in discovered {
            if found.items.is_empty() {
                warn!(dataset = %found.id, "No usable input, dataset skipped");
            }
            datasets.push(partitioner.partition(found.id, found.source_list, &found.items));
            bad_items.extend(found.bad);
        }

        Ok(RunPlan {
            datasets,
            bad_items,
            reused: false,
        })
    }

    async fn reuse_plan(&self, lists: Vec<PathBuf>) -> RunResult<RunPlan> {
        let partitioner = self.partitioner();
        let mut datasets = Vec::with_capacity(lists.len());
        for list in lists {
            let id = dataset_id(&list)?;
            let groups = load_chunk_lists(&id, &self.layout.partition_dir).await?;
            let mut dataset = partitioner.assemble(id, list, groups);
            for chunk in &mut dataset.chunks {
                chunk.list_file = Some(self.layout.chunk_list(&chunk.key.dataset, chunk.key.index));
            }
            info!(dataset = %dataset.id, "Reusing {} chunk list(s)", dataset.chunk_count());
            datasets.push(dataset);
        }
        Ok(RunPlan {
            datasets,
            bad_items: Vec::new(),
            reused: true,
        })
    }

    /// Plan, execute and merge; writes the bad-item report and the summary
    pub async fn run<S: AsRef<str>>(&self, inputs: &[S]) -> RunResult<RunSummary> {
        let disk = &self.config.retry.disk;
        for dir in self.layout.directories() {
            ensure_dir(dir, disk).await?;
        }

        let mut plan = self.plan(inputs).await?;
        write_bad_items(&plan.bad_items, &self.layout.bad_items_report(), disk).await?;
        if !plan.bad_items.is_empty() {
            warn!(
                "{} input(s) excluded, see {}",
                plan.bad_items.len(),
                self.layout.bad_items_report().display()
            );
        }
        if !plan.reused {
            for dataset in &mut plan.datasets {
                persist_chunk_lists(dataset, &self.layout, disk).await?;
            }
        }

        info!(
            "{} dataset(s) split into {} chunk(s)",
            plan.datasets.len(),
            plan.chunk_count()
        );

        let table = ChunkTable::new(plan.datasets);
        let merger = MergeCoordinator::new(
            Arc::clone(&self.reducer),
            self.layout.clone(),
            self.config.merge.min_valid_size,
            self.config.retry.merge.clone(),
            disk.clone(),
        )
        .enabled(self.config.merge.enabled && !self.config.dry_run);

        let outcome = match self.config.strategy {
            Strategy::Local => self.schedule_local(table, merger).await?,
            Strategy::Remote => self.schedule_remote(table, merger).await?,
        };

        let summary = RunSummary::new(
            &outcome.table,
            outcome.merges,
            plan.bad_items,
            self.config.dry_run,
        );
        summary.write(&self.layout.summary_file(), disk).await?;
        debug!("Summary written to {}", self.layout.summary_file().display());
        Ok(summary)
    }

    async fn schedule_local(&self, table: ChunkTable, merger: MergeCoordinator) -> RunResult<ScheduleOutcome> {
        let runner = LocalJobRunner::new(
            self.subprocess.clone(),
            JobTemplate::from_config(&self.config),
            self.config.retry.execution.clone(),
            self.config.retry.disk.clone(),
        )
        .with_nice(self.config.use_nice())
        .with_timeout(self.config.job.timeout);

        LocalScheduler::new(
            Arc::new(runner),
            self.config.local.workers,
            self.config.merge.min_valid_size,
        )
        .with_recover(self.config.recover)
        .run(table, merger)
        .await
    }

    async fn schedule_remote(&self, table: ChunkTable, merger: MergeCoordinator) -> RunResult<ScheduleOutcome> {
        let runner = RemoteJobRunner::new(
            Arc::clone(&self.queue),
            JobTemplate::from_config(&self.config),
            self.config.run_stamp(),
            self.config.retry.dispatch.clone(),
        )
        .with_submit_spacing(self.config.remote.submit_spacing);

        RemoteScheduler::new(
            runner,
            self.config.remote.poll_interval,
            self.config.effective_staleness_window(),
            self.config.merge.min_valid_size,
        )
        .with_resubmit_limit(self.config.remote.resubmit_limit)
        .with_recover(self.config.recover)
        .with_dry_run(self.config.dry_run)
        .run(table, merger)
        .await
    }
}
