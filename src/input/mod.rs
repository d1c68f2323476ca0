//! Input discovery: dataset file lists, record counts and bad items

pub mod counter;

pub use counter::{CommandRecordCounter, CountError, RecordCounter};

use crate::artifact::write_with_retry;
use crate::error::{RunError, RunResult};
use crate::partition::lists::parse_list;
use crate::retry::RetryPolicy;
use crate::types::{DatasetId, WorkItem};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An input excluded from partitioning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadItem {
    pub dataset: DatasetId,
    pub file: String,
    pub reason: String,
}

/// One dataset's good items plus what was excluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDataset {
    pub id: DatasetId,
    pub source_list: PathBuf,
    pub items: Vec<WorkItem>,
    pub bad: Vec<BadItem>,
}

/// Resolve command-line inputs to dataset list files.
///
/// Each argument is a list file, a glob pattern, or a directory (meaning every
/// `*.txt` inside it). Two lists resolving to the same dataset id are rejected.
pub fn expand_inputs<S: AsRef<str>>(inputs: &[S]) -> RunResult<Vec<PathBuf>> {
    let mut lists = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        let path = Path::new(input);
        if path.is_dir() {
            let pattern = path.join("*.txt");
            lists.extend(glob_paths(&pattern.to_string_lossy())?);
        } else if input.contains(['*', '?', '[']) {
            let matched = glob_paths(input)?;
            if matched.is_empty() {
                warn!("Pattern {} matched no file lists", input);
            }
            lists.extend(matched);
        } else {
            lists.push(path.to_path_buf());
        }
    }

    let mut seen = HashSet::new();
    for list in &lists {
        let id = dataset_id(list)?;
        if !seen.insert(id.clone()) {
            return Err(RunError::InputDiscovery {
                file: list.display().to_string(),
                reason: format!("dataset {} is listed more than once", id),
            });
        }
    }
    Ok(lists)
}

fn glob_paths(pattern: &str) -> RunResult<Vec<PathBuf>> {
    let paths = glob::glob(pattern).map_err(|e| RunError::InputDiscovery {
        file: pattern.to_string(),
        reason: e.to_string(),
    })?;
    let mut found: Vec<PathBuf> = paths
        .filter_map(|entry| match entry {
            Ok(path) if path.is_file() => Some(path),
            Ok(_) => None,
            Err(e) => {
                warn!("Skipping unreadable match: {}", e);
                None
            }
        })
        .collect();
    found.sort();
    Ok(found)
}

/// Dataset id of a list: its file stem
pub fn dataset_id(list: &Path) -> RunResult<DatasetId> {
    list.file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .map(DatasetId::new)
        .ok_or_else(|| RunError::InputDiscovery {
            file: list.display().to_string(),
            reason: "cannot derive a dataset name".to_string(),
        })
}

/// Read a dataset list into uncounted items
pub async fn read_list(list: &Path) -> RunResult<(DatasetId, Vec<WorkItem>)> {
    let id = dataset_id(list)?;
    let content = tokio::fs::read_to_string(list)
        .await
        .map_err(|e| RunError::io(list, e))?;
    let items = parse_list(&content).map(WorkItem::uncounted).collect();
    Ok((id, items))
}

/// Read every list and, when a counter is given, probe record counts.
///
/// Probes run with at most `concurrency` in flight; results keep list order.
/// Items whose probe fails are moved to the dataset's bad list.
pub async fn discover(
    lists: &[PathBuf],
    counter: Option<&dyn RecordCounter>,
    concurrency: usize,
) -> RunResult<Vec<DiscoveredDataset>> {
    let mut datasets = Vec::with_capacity(lists.len());

    for list in lists {
        let (id, items) = read_list(list).await?;
        let discovered = match counter {
            Some(counter) => count_items(id, list, items, counter, concurrency).await,
            None => DiscoveredDataset {
                id,
                source_list: list.clone(),
                items,
                bad: Vec::new(),
            },
        };

        info!(
            dataset = %discovered.id,
            "{} input(s), {} excluded",
            discovered.items.len(),
            discovered.bad.len()
        );
        datasets.push(discovered);
    }

    Ok(datasets)
}

async fn count_items(
    id: DatasetId,
    list: &Path,
    items: Vec<WorkItem>,
    counter: &dyn RecordCounter,
    concurrency: usize,
) -> DiscoveredDataset {
    let results: Vec<(WorkItem, Result<u64, CountError>)> = stream::iter(items)
        .map(|item| async move {
            let result = counter.count(&item.file).await;
            (item, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut good = Vec::with_capacity(results.len());
    let mut bad = Vec::new();
    for (item, result) in results {
        match result {
            Ok(records) => {
                debug!(dataset = %id, "{}: {} records", item.file, records);
                good.push(WorkItem::counted(item.file, records));
            }
            Err(reason) => {
                warn!(dataset = %id, "Excluding {}: {}", item.file, reason);
                bad.push(BadItem {
                    dataset: id.clone(),
                    file: item.file,
                    reason: reason.to_string(),
                });
            }
        }
    }

    DiscoveredDataset {
        id,
        source_list: list.to_path_buf(),
        items: good,
        bad,
    }
}

/// Write the bad-item report, one `<file> <reason>` line per item
pub async fn write_bad_items(
    bad: &[BadItem],
    report: &Path,
    policy: &RetryPolicy,
) -> RunResult<()> {
    let mut contents = String::new();
    for item in bad {
        contents.push_str(&item.file);
        contents.push(' ');
        contents.push_str(&item.reason);
        contents.push('\n');
    }
    write_with_retry(report, contents.as_bytes(), policy).await
}
