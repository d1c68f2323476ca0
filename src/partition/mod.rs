//! Splitting a dataset's work items into bounded chunks
//!
//! [`split_items`] is the pure greedy algorithm. [`Partitioner`] wraps it with
//! calibration and path assignment to produce a [`Dataset`].

pub mod calibration;
pub mod lists;

use crate::layout::RunLayout;
use crate::types::{Chunk, ChunkKey, Dataset, DatasetId, WorkItem};
use calibration::{calibrated_threshold, CalibrationSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// How chunk boundaries are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    /// Bound the summed record count of each chunk
    #[default]
    ByRecordCount,
    /// Fixed windows of `threshold` files
    ByFileCount,
    /// One chunk holding every file
    Whole,
}

impl PartitionMode {
    /// Whether record counts are needed to partition in this mode
    pub fn needs_record_counts(self) -> bool {
        matches!(self, PartitionMode::ByRecordCount)
    }
}

/// Group `items` into chunks, preserving order.
///
/// In record mode a new chunk starts when the next item would push the running
/// total over `threshold`; the first item of a chunk is always accepted.
pub fn split_items(items: &[WorkItem], threshold: u64, mode: PartitionMode) -> Vec<Vec<WorkItem>> {
    if items.is_empty() {
        return Vec::new();
    }

    match mode {
        PartitionMode::Whole => vec![items.to_vec()],
        PartitionMode::ByFileCount => {
            let window = usize::try_from(threshold.max(1)).unwrap_or(usize::MAX);
            items.chunks(window).map(<[WorkItem]>::to_vec).collect()
        }
        PartitionMode::ByRecordCount => {
            let mut groups = Vec::new();
            let mut current: Vec<WorkItem> = Vec::new();
            let mut running: u64 = 0;

            for item in items {
                let weight = item.weight();
                if !current.is_empty() && running.saturating_add(weight) > threshold {
                    groups.push(std::mem::take(&mut current));
                    running = 0;
                }
                running = running.saturating_add(weight);
                current.push(item.clone());
            }
            if !current.is_empty() {
                groups.push(current);
            }
            groups
        }
    }
}

/// Builds datasets from discovered items
pub struct Partitioner {
    mode: PartitionMode,
    threshold: u64,
    calibration: Arc<dyn CalibrationSource>,
    layout: RunLayout,
}

impl Partitioner {
    pub fn new(
        mode: PartitionMode,
        threshold: u64,
        calibration: Arc<dyn CalibrationSource>,
        layout: RunLayout,
    ) -> Self {
        Self {
            mode,
            threshold,
            calibration,
            layout,
        }
    }

    pub fn mode(&self) -> PartitionMode {
        self.mode
    }

    /// Threshold after applying the dataset's calibration factor
    ///
    /// Calibration only scales record thresholds; file windows keep their size.
    pub fn threshold_for(&self, dataset: &DatasetId) -> u64 {
        match self.mode {
            PartitionMode::ByRecordCount => {
                calibrated_threshold(self.threshold, dataset, self.calibration.as_ref())
            }
            PartitionMode::ByFileCount | PartitionMode::Whole => self.threshold,
        }
    }

    /// Partition one dataset's good items
    pub fn partition(&self, id: DatasetId, source_list: PathBuf, items: &[WorkItem]) -> Dataset {
        let threshold = self.threshold_for(&id);
        let groups = split_items(items, threshold, self.mode);
        debug!(
            dataset = %id,
            threshold,
            chunks = groups.len(),
            "Partitioned {} item(s)",
            items.len()
        );
        self.assemble(id, source_list, groups)
    }

    /// Number groups from 1 and assign their artifact paths
    pub fn assemble(&self, id: DatasetId, source_list: PathBuf, groups: Vec<Vec<WorkItem>>) -> Dataset {
        let chunks = groups
            .into_iter()
            .zip(1u32..)
            .map(|(items, index)| Chunk {
                key: ChunkKey::new(id.clone(), index),
                items,
                output: self.layout.chunk_output(&id, index),
                log: self.layout.chunk_log(&id, index),
                list_file: None,
            })
            .collect();

        Dataset {
            final_artifact: self.layout.final_artifact(&id),
            id,
            source_list,
            chunks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use calibration::NoCalibration;
    use proptest::prelude::*;

    fn counted(counts: &[u64]) -> Vec<WorkItem> {
        counts
            .iter()
            .enumerate()
            .map(|(i, n)| WorkItem::counted(format!("f{i}.root"), *n))
            .collect()
    }

    fn weights(groups: &[Vec<WorkItem>]) -> Vec<Vec<u64>> {
        groups
            .iter()
            .map(|g| g.iter().map(WorkItem::weight).collect())
            .collect()
    }

    #[test]
    fn test_greedy_record_split() {
        let groups = split_items(&counted(&[40, 30, 50, 10, 60]), 100, PartitionMode::ByRecordCount);
        assert_eq!(weights(&groups), vec![vec![40, 30], vec![50, 10], vec![60]]);
    }

    #[test]
    fn test_oversized_first_item_is_accepted_alone() {
        let groups = split_items(&counted(&[500, 20, 30]), 100, PartitionMode::ByRecordCount);
        assert_eq!(weights(&groups), vec![vec![500], vec![20, 30]]);
    }

    #[test]
    fn test_exact_threshold_stays_in_chunk() {
        let groups = split_items(&counted(&[60, 40, 1]), 100, PartitionMode::ByRecordCount);
        assert_eq!(weights(&groups), vec![vec![60, 40], vec![1]]);
    }

    #[test]
    fn test_file_count_windows() {
        let items: Vec<_> = (0..7).map(|i| WorkItem::uncounted(format!("f{i}"))).collect();
        let groups = split_items(&items, 3, PartitionMode::ByFileCount);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[test]
    fn test_whole_mode_single_chunk() {
        let groups = split_items(&counted(&[1, 2, 3]), 1, PartitionMode::Whole);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 3);
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(split_items(&[], 100, PartitionMode::ByRecordCount).is_empty());
        assert!(split_items(&[], 100, PartitionMode::Whole).is_empty());
    }

    #[test]
    fn test_partitioner_assigns_indices_and_paths() {
        let layout = RunLayout::from_config(&RunConfig::default());
        let partitioner = Partitioner::new(
            PartitionMode::ByRecordCount,
            100,
            Arc::new(NoCalibration),
            layout,
        );

        let dataset = partitioner.partition(
            DatasetId::new("QCD"),
            PathBuf::from("lists/QCD.txt"),
            &counted(&[40, 30, 50, 10, 60]),
        );

        assert_eq!(dataset.chunk_count(), 3);
        let indices: Vec<u32> = dataset.chunks.iter().map(Chunk::index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert_eq!(dataset.chunks[2].output, PathBuf::from("results/QCD_3.root"));
        assert_eq!(dataset.final_artifact, PathBuf::from("results/hadd/QCD.root"));
    }

    struct Doubling;

    impl CalibrationSource for Doubling {
        fn factor(&self, dataset: &DatasetId) -> Option<f64> {
            (dataset.as_str() == "Slow").then_some(2.0)
        }
    }

    #[test]
    fn test_calibration_scales_threshold() {
        let partitioner = Partitioner::new(
            PartitionMode::ByRecordCount,
            100,
            Arc::new(Doubling),
            RunLayout::from_config(&RunConfig::default()),
        );
        let items = counted(&[40, 30, 50, 10, 60]);

        let slow = partitioner.partition(DatasetId::new("Slow"), PathBuf::new(), &items);
        let other = partitioner.partition(DatasetId::new("Fast"), PathBuf::new(), &items);

        assert_eq!(partitioner.threshold_for(&DatasetId::new("Slow")), 200);
        assert_eq!(slow.chunk_count(), 1);
        assert_eq!(other.chunk_count(), 3);
    }

    #[test]
    fn test_calibration_leaves_file_windows_alone() {
        let partitioner = Partitioner::new(
            PartitionMode::ByFileCount,
            2,
            Arc::new(Doubling),
            RunLayout::from_config(&RunConfig::default()),
        );
        let items = counted(&[1, 1, 1, 1, 1]);

        let slow = partitioner.partition(DatasetId::new("Slow"), PathBuf::new(), &items);

        assert_eq!(partitioner.threshold_for(&DatasetId::new("Slow")), 2);
        assert_eq!(slow.chunk_count(), 3);
    }

    proptest! {
        #[test]
        fn prop_chunks_respect_threshold(
            counts in prop::collection::vec(0u64..500, 0..60),
            threshold in 1u64..400,
        ) {
            let items = counted(&counts);
            let groups = split_items(&items, threshold, PartitionMode::ByRecordCount);

            for group in &groups {
                let total: u64 = group.iter().map(WorkItem::weight).sum();
                prop_assert!(total <= threshold || group.len() == 1);
            }
        }

        #[test]
        fn prop_every_item_in_exactly_one_chunk(
            counts in prop::collection::vec(0u64..500, 0..60),
            threshold in 1u64..400,
        ) {
            let items = counted(&counts);
            let groups = split_items(&items, threshold, PartitionMode::ByRecordCount);
            let flattened: Vec<WorkItem> = groups.into_iter().flatten().collect();
            prop_assert_eq!(flattened, items);
        }

        #[test]
        fn prop_partitioning_is_deterministic(
            counts in prop::collection::vec(0u64..500, 0..40),
            threshold in 1u64..400,
        ) {
            let items = counted(&counts);
            prop_assert_eq!(
                split_items(&items, threshold, PartitionMode::ByRecordCount),
                split_items(&items, threshold, PartitionMode::ByRecordCount)
            );
        }

        #[test]
        fn prop_indices_are_contiguous(
            counts in prop::collection::vec(1u64..300, 1..40),
            threshold in 1u64..400,
        ) {
            let partitioner = Partitioner::new(
                PartitionMode::ByRecordCount,
                threshold,
                Arc::new(NoCalibration),
                RunLayout::from_config(&RunConfig::default()),
            );
            let dataset = partitioner.partition(DatasetId::new("ds"), PathBuf::new(), &counted(&counts));
            let indices: Vec<u32> = dataset.chunks.iter().map(Chunk::index).collect();
            let expected: Vec<u32> = (1..=dataset.chunk_count() as u32).collect();
            prop_assert_eq!(indices, expected);
        }
    }
}
