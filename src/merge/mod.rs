//! Progressive per-dataset merging
//!
//! The coordinator keeps a "next unmerged index" pointer per dataset. Each
//! completion advances the pointer over the completed prefix; the dataset is
//! merged once the pointer reaches the end. A later chunk finishing early
//! never triggers a merge on its own.

pub mod reducer;

pub use reducer::{CommandReducer, ReduceError, Reducer};

use crate::artifact::{artifact_size, copy_with_retry, remove_if_exists, valid_artifact};
use crate::error::{RunError, RunResult};
use crate::layout::RunLayout;
use crate::retry::RetryPolicy;
use crate::scheduler::state::{ChunkTable, DatasetEntry};
use crate::types::{ChunkKey, ChunkState, DatasetId};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What a completion event led to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// An earlier chunk of the dataset is not Completed yet
    NotReady,
    /// Reduced two or more chunk outputs
    Reduced,
    /// Copied the single chunk output
    Copied,
    /// The final artifact was already on disk
    SkippedExisting,
    /// This dataset was already handled in this run
    AlreadyMerged,
    /// Merging is turned off
    Disabled,
    /// Reduction kept failing
    Failed(String),
}

/// Per-dataset merge results of a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub merged: Vec<DatasetId>,
    pub skipped_existing: Vec<DatasetId>,
    pub failures: Vec<MergeFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeFailure {
    pub dataset: DatasetId,
    pub message: String,
}

#[derive(Debug, Default)]
struct Cursor {
    next_unmerged: usize,
    done: bool,
}

pub struct MergeCoordinator {
    reducer: Arc<dyn Reducer>,
    layout: RunLayout,
    enabled: bool,
    min_valid_size: u64,
    merge_policy: RetryPolicy,
    disk_policy: RetryPolicy,
    cursors: HashMap<DatasetId, Cursor>,
    report: MergeReport,
}

impl MergeCoordinator {
    pub fn new(
        reducer: Arc<dyn Reducer>,
        layout: RunLayout,
        min_valid_size: u64,
        merge_policy: RetryPolicy,
        disk_policy: RetryPolicy,
    ) -> Self {
        Self {
            reducer,
            layout,
            enabled: true,
            min_valid_size,
            merge_policy,
            disk_policy,
            cursors: HashMap::new(),
            report: MergeReport::default(),
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn report(&self) -> &MergeReport {
        &self.report
    }

    pub fn into_report(self) -> MergeReport {
        self.report
    }

    /// Handle `key` reaching Completed
    pub async fn on_chunk_completed(
        &mut self,
        table: &ChunkTable,
        key: &ChunkKey,
    ) -> RunResult<MergeOutcome> {
        match table.dataset(&key.dataset) {
            Some(entry) => self.on_dataset_progress(entry).await,
            None => Ok(MergeOutcome::NotReady),
        }
    }

    /// Re-evaluate readiness of `entry` after one of its chunks completed
    pub async fn on_dataset_progress(&mut self, entry: &DatasetEntry) -> RunResult<MergeOutcome> {
        if !self.enabled {
            return Ok(MergeOutcome::Disabled);
        }

        let cursor = self.cursors.entry(entry.id.clone()).or_default();
        if cursor.done {
            return Ok(MergeOutcome::AlreadyMerged);
        }
        let states: Vec<ChunkState> = entry.states().collect();
        while cursor.next_unmerged < states.len() && states[cursor.next_unmerged].is_completed() {
            cursor.next_unmerged += 1;
        }
        if states.is_empty() || cursor.next_unmerged < states.len() {
            debug!(
                dataset = %entry.id,
                "{}/{} chunk(s) ready for merge",
                cursor.next_unmerged,
                states.len()
            );
            return Ok(MergeOutcome::NotReady);
        }
        cursor.done = true;

        let outcome = self.merge_dataset(entry).await?;
        match &outcome {
            MergeOutcome::Reduced | MergeOutcome::Copied => self.report.merged.push(entry.id.clone()),
            MergeOutcome::SkippedExisting => self.report.skipped_existing.push(entry.id.clone()),
            MergeOutcome::Failed(message) => self.report.failures.push(MergeFailure {
                dataset: entry.id.clone(),
                message: message.clone(),
            }),
            _ => {}
        }
        Ok(outcome)
    }

    /// Merge a dataset whose chunks are all Completed
    async fn merge_dataset(&self, entry: &DatasetEntry) -> RunResult<MergeOutcome> {
        if artifact_size(&entry.final_artifact).await.is_some() {
            info!(
                dataset = %entry.id,
                "{} already exists, not merging again",
                entry.final_artifact.display()
            );
            return Ok(MergeOutcome::SkippedExisting);
        }

        let pending: Vec<u32> = entry
            .records
            .iter()
            .filter(|r| !r.state.is_completed())
            .map(|r| r.chunk.key.index)
            .collect();
        if !pending.is_empty() {
            return Err(RunError::MergeIncomplete {
                dataset: entry.id.clone(),
                pending,
            });
        }

        let inputs = entry.outputs();
        if let [single] = inputs.as_slice() {
            copy_with_retry(single, &entry.final_artifact, &self.disk_policy).await?;
            info!(dataset = %entry.id, "Copied single chunk to {}", entry.final_artifact.display());
            return Ok(MergeOutcome::Copied);
        }

        let log = self.layout.merge_log(&entry.id);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self.reducer.reduce(&entry.final_artifact, &inputs, &log).await;
            let problem = match result {
                Ok(()) => {
                    if valid_artifact(&entry.final_artifact, self.min_valid_size).await {
                        info!(
                            dataset = %entry.id,
                            "Merged {} chunk(s) into {}",
                            inputs.len(),
                            entry.final_artifact.display()
                        );
                        return Ok(MergeOutcome::Reduced);
                    }
                    format!(
                        "merged artifact is not larger than {} bytes",
                        self.min_valid_size
                    )
                }
                Err(ReduceError::Log(fatal)) => return Err(fatal),
                Err(e) => e.to_string(),
            };

            remove_if_exists(&entry.final_artifact)
                .await
                .map_err(|source| RunError::DiskWrite {
                    path: entry.final_artifact.clone(),
                    attempts: 1,
                    source,
                })?;

            if !self.merge_policy.allows_retry(attempt) {
                let err = RunError::MergeFailed {
                    dataset: entry.id.clone(),
                    attempts: attempt,
                    message: problem.clone(),
                };
                warn!("{}", err);
                return Ok(MergeOutcome::Failed(problem));
            }
            let delay = self.merge_policy.delay_for_attempt(attempt);
            warn!(
                dataset = %entry.id,
                attempt,
                "Merge failed ({}), retrying in {:?}",
                problem,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::testing::RecordingReducer;
    use crate::types::{Chunk, Dataset, WorkItem};
    use proptest::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        layout: RunLayout,
        table: ChunkTable,
    }

    fn fixture(chunks: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = RunConfig {
            output_dir: dir.path().to_path_buf(),
            ..RunConfig::default()
        };
        let layout = RunLayout::from_config(&config);
        let id = DatasetId::new("TT");
        let dataset = Dataset {
            chunks: (1..=chunks)
                .map(|index| Chunk {
                    key: ChunkKey::new(id.clone(), index),
                    items: vec![WorkItem::uncounted(format!("in_{index}"))],
                    output: layout.chunk_output(&id, index),
                    log: layout.chunk_log(&id, index),
                    list_file: None,
                })
                .collect(),
            final_artifact: layout.final_artifact(&id),
            source_list: PathBuf::from("TT.txt"),
            id,
        };
        Fixture {
            _dir: dir,
            layout,
            table: ChunkTable::new(vec![dataset]),
        }
    }

    fn key(index: u32) -> ChunkKey {
        ChunkKey::new(DatasetId::new("TT"), index)
    }

    fn complete(table: &mut ChunkTable, index: u32, layout: &RunLayout) {
        let k = key(index);
        std::fs::write(layout.chunk_output(&k.dataset, index), vec![1u8; 2000]).unwrap();
        table.transition(&k, ChunkState::Dispatched).unwrap();
        table.transition(&k, ChunkState::Completed).unwrap();
    }

    fn coordinator(reducer: Arc<RecordingReducer>, layout: &RunLayout) -> MergeCoordinator {
        MergeCoordinator::new(
            reducer,
            layout.clone(),
            1000,
            RetryPolicy::immediate(3),
            RetryPolicy::immediate(1),
        )
    }

    fn ensure_dirs(layout: &RunLayout) {
        for dir in layout.directories() {
            std::fs::create_dir_all(dir).unwrap();
        }
    }

    #[tokio::test]
    async fn test_out_of_order_completion_waits_for_prefix() {
        let mut f = fixture(3);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 3, &f.layout);
        assert_eq!(merger.on_chunk_completed(&f.table, &key(3)).await.unwrap(), MergeOutcome::NotReady);
        complete(&mut f.table, 1, &f.layout);
        assert_eq!(merger.on_chunk_completed(&f.table, &key(1)).await.unwrap(), MergeOutcome::NotReady);
        assert_eq!(reducer.calls(), 0);

        complete(&mut f.table, 2, &f.layout);
        assert_eq!(merger.on_chunk_completed(&f.table, &key(2)).await.unwrap(), MergeOutcome::Reduced);
        assert_eq!(reducer.calls(), 1);
        assert_eq!(merger.report().merged, vec![DatasetId::new("TT")]);
    }

    #[tokio::test]
    async fn test_second_trigger_does_not_reduce_again() {
        let mut f = fixture(2);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 1, &f.layout);
        complete(&mut f.table, 2, &f.layout);
        merger.on_chunk_completed(&f.table, &key(2)).await.unwrap();
        let again = merger.on_chunk_completed(&f.table, &key(2)).await.unwrap();

        assert_eq!(again, MergeOutcome::AlreadyMerged);
        assert_eq!(reducer.calls(), 1);
    }

    #[tokio::test]
    async fn test_existing_final_artifact_is_left_alone() {
        let mut f = fixture(2);
        ensure_dirs(&f.layout);
        std::fs::write(f.layout.final_artifact(&DatasetId::new("TT")), b"old").unwrap();
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 1, &f.layout);
        complete(&mut f.table, 2, &f.layout);
        let outcome = merger.on_chunk_completed(&f.table, &key(2)).await.unwrap();

        assert_eq!(outcome, MergeOutcome::SkippedExisting);
        assert_eq!(reducer.calls(), 0);
        assert_eq!(merger.report().skipped_existing.len(), 1);
    }

    #[tokio::test]
    async fn test_single_chunk_is_copied() {
        let mut f = fixture(1);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 1, &f.layout);
        let outcome = merger.on_chunk_completed(&f.table, &key(1)).await.unwrap();

        assert_eq!(outcome, MergeOutcome::Copied);
        assert_eq!(reducer.calls(), 0);
        let merged = f.layout.final_artifact(&DatasetId::new("TT"));
        assert_eq!(std::fs::metadata(merged).unwrap().len(), 2000);
    }

    #[tokio::test]
    async fn test_undersized_result_is_deleted_and_retried() {
        let mut f = fixture(2);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(10));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 1, &f.layout);
        complete(&mut f.table, 2, &f.layout);
        let outcome = merger.on_chunk_completed(&f.table, &key(2)).await.unwrap();

        assert!(matches!(outcome, MergeOutcome::Failed(_)));
        assert_eq!(reducer.calls(), 3);
        assert!(!Path::new(&f.layout.final_artifact(&DatasetId::new("TT"))).exists());
        assert_eq!(merger.report().failures.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_merging() {
        let mut f = fixture(1);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer, &f.layout).enabled(false);

        complete(&mut f.table, 1, &f.layout);
        assert_eq!(
            merger.on_chunk_completed(&f.table, &key(1)).await.unwrap(),
            MergeOutcome::Disabled
        );
    }

    #[tokio::test]
    async fn test_missing_chunk_blocks_merge() {
        let mut f = fixture(2);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        complete(&mut f.table, 2, &f.layout);
        f.table.transition(&key(1), ChunkState::Dispatched).unwrap();
        f.table.transition(&key(1), ChunkState::Missing).unwrap();

        assert_eq!(
            merger.on_chunk_completed(&f.table, &key(2)).await.unwrap(),
            MergeOutcome::NotReady
        );
        assert_eq!(reducer.calls(), 0);
    }

    /// Complete every chunk in `order`, returning the outcome of each trigger
    fn complete_in_order(order: &[u32]) -> (Vec<RunResult<MergeOutcome>>, usize) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut f = fixture(order.len() as u32);
        ensure_dirs(&f.layout);
        let reducer = Arc::new(RecordingReducer::new(5000));
        let mut merger = coordinator(reducer.clone(), &f.layout);

        let outcomes = runtime.block_on(async {
            let mut outcomes = Vec::new();
            for &index in order {
                complete(&mut f.table, index, &f.layout);
                outcomes.push(merger.on_chunk_completed(&f.table, &key(index)).await);
            }
            outcomes.push(merger.on_chunk_completed(&f.table, &key(order[0])).await);
            outcomes
        });
        (outcomes, reducer.calls())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_any_completion_order_merges_exactly_once(
            order in (1u32..7).prop_flat_map(|n| Just((1..=n).collect::<Vec<u32>>()).prop_shuffle()),
        ) {
            let (outcomes, reductions) = complete_in_order(&order);
            let n = order.len();

            for outcome in &outcomes {
                prop_assert!(
                    !matches!(outcome, Err(RunError::MergeIncomplete { .. })),
                    "merge attempted with pending chunks: {:?}",
                    outcome
                );
            }
            let outcomes: Vec<MergeOutcome> = outcomes.into_iter().map(|o| o.unwrap()).collect();

            prop_assert!(outcomes[..n - 1].iter().all(|o| *o == MergeOutcome::NotReady));
            let expected = if n == 1 { MergeOutcome::Copied } else { MergeOutcome::Reduced };
            prop_assert_eq!(&outcomes[n - 1], &expected);
            prop_assert_eq!(&outcomes[n], &MergeOutcome::AlreadyMerged);
            prop_assert_eq!(reductions, usize::from(n > 1));
        }
    }
}
