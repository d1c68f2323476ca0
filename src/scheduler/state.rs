//! Typed chunk-state table
//!
//! Every chunk of every dataset has one record here, keyed by [`ChunkKey`].
//! State only changes through [`ChunkTable::transition`], which enforces the
//! forward-only lifecycle.

use crate::error::TransitionError;
use crate::types::{Chunk, ChunkKey, ChunkState, Dataset, DatasetId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk: Chunk,
    pub state: ChunkState,
    /// Last dispatch or confirmed queue presence
    pub last_seen: Option<Instant>,
    pub dispatches: u32,
}

impl ChunkRecord {
    fn new(chunk: Chunk) -> Self {
        Self {
            chunk,
            state: ChunkState::Pending,
            last_seen: None,
            dispatches: 0,
        }
    }

    /// Time since the last dispatch or refresh; `None` if never dispatched
    pub fn since_last_seen(&self, now: Instant) -> Option<Duration> {
        self.last_seen.map(|seen| now.saturating_duration_since(seen))
    }
}

#[derive(Debug, Clone)]
pub struct DatasetEntry {
    pub id: DatasetId,
    pub source_list: PathBuf,
    pub final_artifact: PathBuf,
    pub records: Vec<ChunkRecord>,
}

impl DatasetEntry {
    pub fn states(&self) -> impl Iterator<Item = ChunkState> + '_ {
        self.records.iter().map(|r| r.state)
    }

    pub fn outputs(&self) -> Vec<PathBuf> {
        self.records.iter().map(|r| r.chunk.output.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        self.records.iter().all(|r| r.state.is_completed())
    }
}

/// Counts per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub dispatched: usize,
    pub completed: usize,
    pub missing: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkTable {
    datasets: Vec<DatasetEntry>,
    index: HashMap<DatasetId, usize>,
}

impl ChunkTable {
    pub fn new(datasets: Vec<Dataset>) -> Self {
        let mut table = Self::default();
        for dataset in datasets {
            table.index.insert(dataset.id.clone(), table.datasets.len());
            table.datasets.push(DatasetEntry {
                id: dataset.id,
                source_list: dataset.source_list,
                final_artifact: dataset.final_artifact,
                records: dataset.chunks.into_iter().map(ChunkRecord::new).collect(),
            });
        }
        table
    }

    pub fn datasets(&self) -> &[DatasetEntry] {
        &self.datasets
    }

    pub fn dataset(&self, id: &DatasetId) -> Option<&DatasetEntry> {
        self.index.get(id).map(|&i| &self.datasets[i])
    }

    /// Every chunk key, datasets in insertion order and chunks by index
    pub fn keys(&self) -> Vec<ChunkKey> {
        self.datasets
            .iter()
            .flat_map(|d| d.records.iter().map(|r| r.chunk.key.clone()))
            .collect()
    }

    pub fn get(&self, key: &ChunkKey) -> Option<&ChunkRecord> {
        let dataset = self.dataset(&key.dataset)?;
        let slot = usize::try_from(key.index).ok()?.checked_sub(1)?;
        dataset.records.get(slot)
    }

    fn get_mut(&mut self, key: &ChunkKey) -> Result<&mut ChunkRecord, TransitionError> {
        let unknown = || TransitionError::UnknownChunk(key.clone());
        let position = *self.index.get(&key.dataset).ok_or_else(unknown)?;
        let slot = usize::try_from(key.index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or_else(unknown)?;
        self.datasets[position]
            .records
            .get_mut(slot)
            .ok_or_else(unknown)
    }

    pub fn state(&self, key: &ChunkKey) -> Option<ChunkState> {
        self.get(key).map(|r| r.state)
    }

    /// Move a chunk to `to`, returning its previous state.
    ///
    /// Entering Dispatched stamps the record and counts the dispatch.
    pub fn transition(&mut self, key: &ChunkKey, to: ChunkState) -> Result<ChunkState, TransitionError> {
        let record = self.get_mut(key)?;
        let from = record.state;
        if !from.can_transition_to(to) {
            return Err(TransitionError::Invalid {
                chunk: key.clone(),
                from,
                to,
            });
        }
        record.state = to;
        if to == ChunkState::Dispatched {
            record.last_seen = Some(Instant::now());
            record.dispatches += 1;
        }
        Ok(from)
    }

    /// Note that the queue still holds the chunk's job
    pub fn refresh(&mut self, key: &ChunkKey) -> Result<(), TransitionError> {
        let record = self.get_mut(key)?;
        record.last_seen = Some(Instant::now());
        Ok(())
    }

    pub fn progress(&self) -> Progress {
        let mut progress = Progress::default();
        for record in self.datasets.iter().flat_map(|d| d.records.iter()) {
            progress.total += 1;
            match record.state {
                ChunkState::Pending => progress.pending += 1,
                ChunkState::Dispatched => progress.dispatched += 1,
                ChunkState::Completed => progress.completed += 1,
                ChunkState::Missing => progress.missing += 1,
            }
        }
        progress
    }

    pub fn all_completed(&self) -> bool {
        self.datasets.iter().all(DatasetEntry::is_complete)
    }

    pub fn missing(&self) -> Vec<ChunkKey> {
        self.datasets
            .iter()
            .flat_map(|d| d.records.iter())
            .filter(|r| r.state == ChunkState::Missing)
            .map(|r| r.chunk.key.clone())
            .collect()
    }
}
