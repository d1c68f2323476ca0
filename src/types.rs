//! Core data model: work items, chunks and datasets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a logical dataset (the stem of its file list)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One input file and, when it was probed, its record count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub file: String,
    pub records: Option<u64>,
}

impl WorkItem {
    pub fn counted(file: impl Into<String>, records: u64) -> Self {
        Self {
            file: file.into(),
            records: Some(records),
        }
    }

    pub fn uncounted(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            records: None,
        }
    }

    /// Record count used for threshold accounting
    pub fn weight(&self) -> u64 {
        self.records.unwrap_or(0)
    }
}

/// Typed key of a chunk: dataset plus 1-based chunk index
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkKey {
    pub dataset: DatasetId,
    pub index: u32,
}

impl ChunkKey {
    pub fn new(dataset: DatasetId, index: u32) -> Self {
        Self { dataset, index }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.dataset, self.index)
    }
}

/// Group of files dispatched as one job. Membership is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub key: ChunkKey,
    pub items: Vec<WorkItem>,
    pub output: PathBuf,
    pub log: PathBuf,
    /// Persisted file list for this chunk, when one was written
    pub list_file: Option<PathBuf>,
}

impl Chunk {
    pub fn dataset(&self) -> &DatasetId {
        &self.key.dataset
    }

    pub fn index(&self) -> u32 {
        self.key.index
    }

    pub fn total_records(&self) -> u64 {
        self.items.iter().map(WorkItem::weight).sum()
    }

    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.file.as_str())
    }
}

/// All chunks derived from one file list plus the merged artifact path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    /// The original file list this dataset was read from
    pub source_list: PathBuf,
    pub chunks: Vec<Chunk>,
    pub final_artifact: PathBuf,
}

impl Dataset {
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunk_outputs(&self) -> Vec<PathBuf> {
        self.chunks.iter().map(|c| c.output.clone()).collect()
    }
}

/// Lifecycle state of a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    Pending,
    Dispatched,
    Completed,
    Missing,
}

impl ChunkState {
    pub fn is_completed(self) -> bool {
        matches!(self, ChunkState::Completed)
    }

    /// Whether `self -> next` is a legal forward transition
    pub fn can_transition_to(self, next: ChunkState) -> bool {
        matches!(
            (self, next),
            (ChunkState::Pending, ChunkState::Dispatched)
                | (ChunkState::Pending, ChunkState::Completed)
                | (ChunkState::Dispatched, ChunkState::Dispatched)
                | (ChunkState::Dispatched, ChunkState::Completed)
                | (ChunkState::Dispatched, ChunkState::Missing)
                | (ChunkState::Missing, ChunkState::Dispatched)
        )
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkState::Pending => "pending",
            ChunkState::Dispatched => "dispatched",
            ChunkState::Completed => "completed",
            ChunkState::Missing => "missing",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_is_terminal() {
        for next in [
            ChunkState::Pending,
            ChunkState::Dispatched,
            ChunkState::Completed,
            ChunkState::Missing,
        ] {
            assert!(!ChunkState::Completed.can_transition_to(next));
        }
    }

    #[test]
    fn test_missing_only_reenters_dispatched() {
        assert!(ChunkState::Missing.can_transition_to(ChunkState::Dispatched));
        assert!(!ChunkState::Missing.can_transition_to(ChunkState::Completed));
        assert!(!ChunkState::Missing.can_transition_to(ChunkState::Pending));
    }

    #[test]
    fn test_nothing_returns_to_pending() {
        assert!(!ChunkState::Dispatched.can_transition_to(ChunkState::Pending));
        assert!(!ChunkState::Pending.can_transition_to(ChunkState::Pending));
    }

    #[test]
    fn test_chunk_key_display() {
        let key = ChunkKey::new(DatasetId::new("TTJets"), 3);
        assert_eq!(key.to_string(), "TTJets#3");
    }
}
