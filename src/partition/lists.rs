//! Persisted per-chunk file lists
//!
//! Lists are a dispatch convenience and can always be regenerated from the
//! dataset's source list. They are still written with the disk retry policy
//! because jobs in `list_file` style read them.

use crate::artifact::{ensure_dir, list_dir, remove_if_exists, write_with_retry};
use crate::error::{RunError, RunResult};
use crate::layout::RunLayout;
use crate::retry::RetryPolicy;
use crate::types::{Dataset, DatasetId, WorkItem};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Chunk index encoded in a list file name `<dataset>_<n>.txt`
fn list_index(dataset: &DatasetId, file_name: &str) -> Option<u32> {
    file_name
        .strip_prefix(dataset.as_str())?
        .strip_prefix('_')?
        .strip_suffix(".txt")?
        .parse()
        .ok()
}

async fn existing_lists(dir: &Path, dataset: &DatasetId) -> RunResult<Vec<(u32, PathBuf)>> {
    let paths = list_dir(dir, |name| list_index(dataset, name).is_some()).await?;
    let mut indexed: Vec<(u32, PathBuf)> = paths
        .into_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_str()?;
            list_index(dataset, name).map(|index| (index, path.clone()))
        })
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed)
}

/// Write one list per chunk, replacing lists left by earlier runs
pub async fn persist_chunk_lists(
    dataset: &mut Dataset,
    layout: &RunLayout,
    policy: &RetryPolicy,
) -> RunResult<()> {
    ensure_dir(&layout.partition_dir, policy).await?;

    for (_, stale) in existing_lists(&layout.partition_dir, &dataset.id).await? {
        remove_if_exists(&stale).await.map_err(|source| RunError::DiskWrite {
            path: stale.clone(),
            attempts: 1,
            source,
        })?;
    }

    for chunk in &mut dataset.chunks {
        let path = layout.chunk_list(&chunk.key.dataset, chunk.key.index);
        let mut contents = String::new();
        for file in chunk.files() {
            contents.push_str(file);
            contents.push('\n');
        }
        write_with_retry(&path, contents.as_bytes(), policy).await?;
        chunk.list_file = Some(path);
    }

    debug!(
        dataset = %dataset.id,
        "Wrote {} chunk list(s) to {}",
        dataset.chunk_count(),
        layout.partition_dir.display()
    );
    Ok(())
}

/// Load the lists persisted by an earlier run, in chunk order.
///
/// Indices must run 1..N without gaps; anything else means the lists are not
/// from a single partitioning and cannot be reused.
pub async fn load_chunk_lists(
    dataset: &DatasetId,
    partition_dir: &Path,
) -> RunResult<Vec<Vec<WorkItem>>> {
    let lists = existing_lists(partition_dir, dataset).await?;
    if lists.is_empty() {
        return Err(RunError::StalePartition {
            dataset: dataset.clone(),
            message: format!("no chunk lists in {}", partition_dir.display()),
        });
    }

    let mut groups = Vec::with_capacity(lists.len());
    for (expected, (index, path)) in (1u32..).zip(lists) {
        if index != expected {
            return Err(RunError::StalePartition {
                dataset: dataset.clone(),
                message: format!("expected chunk list {} but found {}", expected, index),
            });
        }
        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| RunError::io(&path, e))?;
        let items: Vec<WorkItem> = parse_list(&content)
            .map(WorkItem::uncounted)
            .collect();
        if items.is_empty() {
            warn!(dataset = %dataset, "Chunk list {} is empty", path.display());
        }
        groups.push(items);
    }
    Ok(groups)
}

/// Non-empty, non-comment lines of a file list
pub fn parse_list(content: &str) -> impl Iterator<Item = &str> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
}
