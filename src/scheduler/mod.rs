//! Driving chunks to completion
//!
//! Two strategies share the [`ChunkTable`] and the merge coordinator:
//! [`LocalScheduler`] runs a bounded worker pool, [`RemoteScheduler`] runs a
//! single polling loop against a batch queue.

pub mod local;
pub mod remote;
pub mod state;

pub use local::LocalScheduler;
pub use remote::RemoteScheduler;
pub use state::{ChunkRecord, ChunkTable, DatasetEntry, Progress};

use crate::artifact::valid_artifact;
use crate::error::RunResult;
use crate::merge::{MergeCoordinator, MergeReport};
use crate::types::{ChunkKey, ChunkState};
use tracing::info;

/// Final chunk states and merge results of a scheduling run
#[derive(Debug)]
pub struct ScheduleOutcome {
    pub table: ChunkTable,
    pub merges: MergeReport,
}

/// Mark chunks whose output already exists and is valid as Completed.
///
/// Returns the recovered keys so the caller can feed them to the merge
/// coordinator.
pub async fn recover_completed(table: &mut ChunkTable, min_valid_size: u64) -> RunResult<Vec<ChunkKey>> {
    let mut recovered = Vec::new();
    for key in table.keys() {
        let Some(record) = table.get(&key) else {
            continue;
        };
        if record.state != ChunkState::Pending {
            continue;
        }
        if valid_artifact(&record.chunk.output, min_valid_size).await {
            table.transition(&key, ChunkState::Completed)?;
            recovered.push(key);
        }
    }
    if !recovered.is_empty() {
        info!("Recovered {} chunk(s) from existing outputs", recovered.len());
    }
    Ok(recovered)
}

/// Feed recovered chunks to the merge coordinator
pub async fn merge_recovered(
    table: &ChunkTable,
    merger: &mut MergeCoordinator,
    recovered: &[ChunkKey],
) -> RunResult<()> {
    for key in recovered {
        merger.on_chunk_completed(table, key).await?;
    }
    Ok(())
}

fn log_progress(progress: &Progress) {
    info!(
        "Jobs done {}/{} (running {}, missing {})",
        progress.completed, progress.total, progress.dispatched, progress.missing
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Dataset, DatasetId, WorkItem};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_recover_marks_only_valid_outputs() {
        let dir = TempDir::new().unwrap();
        let id = DatasetId::new("DY");
        let chunks: Vec<Chunk> = (1..=3)
            .map(|index| Chunk {
                key: ChunkKey::new(id.clone(), index),
                items: vec![WorkItem::uncounted("x")],
                output: dir.path().join(format!("DY_{index}.root")),
                log: dir.path().join(format!("DY_{index}.log")),
                list_file: None,
            })
            .collect();
        std::fs::write(&chunks[0].output, vec![0u8; 2000]).unwrap();
        std::fs::write(&chunks[1].output, vec![0u8; 10]).unwrap();

        let mut table = ChunkTable::new(vec![Dataset {
            id: id.clone(),
            source_list: PathBuf::from("DY.txt"),
            chunks,
            final_artifact: dir.path().join("DY.root"),
        }]);

        let recovered = recover_completed(&mut table, 1000).await.unwrap();
        assert_eq!(recovered, vec![ChunkKey::new(id.clone(), 1)]);
        assert_eq!(table.state(&ChunkKey::new(id.clone(), 2)), Some(ChunkState::Pending));
        assert_eq!(table.progress().completed, 1);
    }
}
