use super::{log_progress, merge_recovered, recover_completed, ChunkTable, ScheduleOutcome};
use crate::artifact::valid_artifact;
use crate::error::RunResult;
use crate::job::RemoteJobRunner;
use crate::merge::MergeCoordinator;
use crate::types::{ChunkKey, ChunkState};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Polling loop over a batch queue.
///
/// Each pass visits every unfinished chunk once: submit what was never
/// dispatched, complete what produced a valid artifact, and after the
/// staleness window ask the queue about the rest, resubmitting jobs it no
/// longer knows. The only suspension point is the sleep between passes.
pub struct RemoteScheduler {
    runner: RemoteJobRunner,
    poll_interval: Duration,
    staleness_window: Duration,
    min_valid_size: u64,
    resubmit_limit: Option<u32>,
    recover: bool,
    dry_run: bool,
}

impl RemoteScheduler {
    pub fn new(
        runner: RemoteJobRunner,
        poll_interval: Duration,
        staleness_window: Duration,
        min_valid_size: u64,
    ) -> Self {
        Self {
            runner,
            poll_interval,
            staleness_window,
            min_valid_size,
            resubmit_limit: None,
            recover: false,
            dry_run: false,
        }
    }

    pub fn with_resubmit_limit(mut self, limit: Option<u32>) -> Self {
        self.resubmit_limit = limit;
        self
    }

    pub fn with_recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    fn limit_reached(&self, dispatches: u32) -> bool {
        self.resubmit_limit.is_some_and(|limit| dispatches >= limit)
    }

    fn is_stale(&self, age: Option<Duration>) -> bool {
        age.is_some_and(|age| age > self.staleness_window)
    }

    pub async fn run(
        &self,
        mut table: ChunkTable,
        mut merger: MergeCoordinator,
    ) -> RunResult<ScheduleOutcome> {
        if self.recover {
            let recovered = recover_completed(&mut table, self.min_valid_size).await?;
            merge_recovered(&table, &mut merger, &recovered).await?;
        }

        loop {
            self.poll_once(&mut table, &mut merger).await?;

            let progress = table.progress();
            log_progress(&progress);

            if table.all_completed() {
                info!("All jobs finished");
                break;
            }
            if self.dry_run {
                info!("Dry run: not waiting for {} dispatched job(s)", progress.dispatched);
                break;
            }
            if self.nothing_left_to_try(&table) {
                warn!(
                    "Giving up on {} missing chunk(s) after reaching the resubmit limit",
                    progress.missing
                );
                break;
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(ScheduleOutcome {
            table,
            merges: merger.into_report(),
        })
    }

    /// One pass over every unfinished chunk
    pub async fn poll_once(
        &self,
        table: &mut ChunkTable,
        merger: &mut MergeCoordinator,
    ) -> RunResult<()> {
        let now = Instant::now();

        for key in table.keys() {
            let Some(record) = table.get(&key) else {
                continue;
            };
            let state = record.state;
            let dispatches = record.dispatches;
            let age = record.since_last_seen(now);
            let chunk = record.chunk.clone();

            match state {
                ChunkState::Completed => {}
                ChunkState::Pending => self.dispatch(table, &key).await?,
                ChunkState::Dispatched => {
                    if valid_artifact(&chunk.output, self.min_valid_size).await {
                        table.transition(&key, ChunkState::Completed)?;
                        debug!(chunk = %key, "Output is ready");
                        merger.on_chunk_completed(table, &key).await?;
                    } else if self.is_stale(age) {
                        if self.runner.is_known(&chunk).await {
                            table.refresh(&key)?;
                        } else if self.limit_reached(dispatches) {
                            warn!(chunk = %key, dispatches, "Job vanished and resubmit limit reached");
                            table.transition(&key, ChunkState::Missing)?;
                        } else {
                            info!(chunk = %key, "Job vanished from the queue, resubmitting");
                            self.dispatch(table, &key).await?;
                        }
                    }
                }
                ChunkState::Missing => {
                    if !self.limit_reached(dispatches) && self.is_stale(age) {
                        info!(chunk = %key, "Retrying missing chunk");
                        self.dispatch(table, &key).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Submit a chunk; an exhausted dispatch budget leaves it Missing
    async fn dispatch(&self, table: &mut ChunkTable, key: &ChunkKey) -> RunResult<()> {
        let Some(entry) = table.dataset(&key.dataset) else {
            return Ok(());
        };
        let source_list = entry.source_list.clone();
        let Some(chunk) = table.get(key).map(|r| r.chunk.clone()) else {
            return Ok(());
        };

        table.transition(key, ChunkState::Dispatched)?;
        match self.runner.submit(&chunk, &source_list).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(chunk = %key, "{}", e);
                table.transition(key, ChunkState::Missing)?;
                Ok(())
            }
        }
    }

    fn nothing_left_to_try(&self, table: &ChunkTable) -> bool {
        table.datasets().iter().flat_map(|d| d.records.iter()).all(|r| match r.state {
            ChunkState::Completed => true,
            ChunkState::Missing => self.limit_reached(r.dispatches),
            ChunkState::Pending | ChunkState::Dispatched => false,
        })
    }
}
