//! Artifact probes and retried disk writes
//!
//! Every write the run depends on goes through the disk retry policy. Running
//! out of attempts yields [`RunError::DiskWrite`], the one error that aborts a run.

use crate::error::{RunError, RunResult};
use crate::retry::{retry_async, RetryExhausted, RetryPolicy};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Size of `path` in bytes, `None` when it does not exist or is not a file
pub async fn artifact_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// An artifact is valid when it exists and is strictly larger than `min_size`
pub async fn valid_artifact(path: &Path, min_size: u64) -> bool {
    artifact_size(path).await.is_some_and(|size| size > min_size)
}

pub async fn remove_if_exists(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

fn disk_error(path: &Path) -> impl FnOnce(RetryExhausted<io::Error>) -> RunError + '_ {
    move |exhausted| RunError::DiskWrite {
        path: path.to_path_buf(),
        attempts: exhausted.attempts,
        source: exhausted.last_error,
    }
}

pub async fn ensure_dir(path: &Path, policy: &RetryPolicy) -> RunResult<()> {
    let label = format!("create {}", path.display());
    retry_async(policy, &label, |_| tokio::fs::create_dir_all(path))
        .await
        .map_err(disk_error(path))
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => tokio::fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

/// Replace `path` with `contents`
pub async fn write_with_retry(path: &Path, contents: &[u8], policy: &RetryPolicy) -> RunResult<()> {
    let label = format!("write {}", path.display());
    retry_async(policy, &label, |_| async move {
        ensure_parent(path).await?;
        let mut file = tokio::fs::File::create(path).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await
    })
    .await
    .map_err(disk_error(path))
}

/// Append `contents` to `path`, creating it when needed
pub async fn append_with_retry(path: &Path, contents: &[u8], policy: &RetryPolicy) -> RunResult<()> {
    let label = format!("append {}", path.display());
    retry_async(policy, &label, |_| async move {
        ensure_parent(path).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(contents).await?;
        file.flush().await
    })
    .await
    .map_err(disk_error(path))
}

pub async fn copy_with_retry(from: &Path, to: &Path, policy: &RetryPolicy) -> RunResult<()> {
    let label = format!("copy {} to {}", from.display(), to.display());
    retry_async(policy, &label, |_| async move {
        ensure_parent(to).await?;
        tokio::fs::copy(from, to).await.map(|_| ())
    })
    .await
    .map_err(disk_error(to))
}

/// Files in `dir` whose names satisfy `keep`
pub async fn list_dir(dir: &Path, keep: impl Fn(&str) -> bool) -> RunResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RunError::io(dir, e)),
    };
    let mut found = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| RunError::io(dir, e))?
    {
        if entry.file_name().to_str().is_some_and(&keep) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}
