use super::{log_progress, merge_recovered, recover_completed, ChunkTable, ScheduleOutcome};
use crate::error::{RunError, RunResult};
use crate::job::LocalJobRunner;
use crate::merge::MergeCoordinator;
use crate::types::{ChunkKey, ChunkState};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

enum WorkerEvent {
    Completed(ChunkKey),
    Missing(ChunkKey, RunError),
    Fatal(RunError),
}

/// Runs chunks on a fixed-width pool of local workers.
///
/// Workers own their chunk for the whole job and only touch the shared table
/// to record transitions. Completions flow back over a channel to this task,
/// which is the only one driving merges.
pub struct LocalScheduler {
    runner: Arc<LocalJobRunner>,
    workers: usize,
    recover: bool,
    min_valid_size: u64,
}

impl LocalScheduler {
    pub fn new(runner: Arc<LocalJobRunner>, workers: usize, min_valid_size: u64) -> Self {
        Self {
            runner,
            workers: workers.max(1),
            recover: false,
            min_valid_size,
        }
    }

    pub fn with_recover(mut self, recover: bool) -> Self {
        self.recover = recover;
        self
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

        let jobs: Vec<_> = table
            .datasets()
            .iter()
            .flat_map(|entry| {
                entry
                    .records
                    .iter()
                    .filter(|r| r.state == ChunkState::Pending)
                    .map(|r| (r.chunk.clone(), entry.source_list.clone()))
            })
            .collect();
        info!(
            "Running {} job(s) on {} local worker(s)",
            jobs.len(),
            self.workers
        );

        let table = Arc::new(Mutex::new(table));
        let semaphore = Arc::new(Semaphore::new(self.workers));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();

        for (chunk, source_list) in jobs {
            let table = Arc::clone(&table);
            let semaphore = Arc::clone(&semaphore);
            let runner = Arc::clone(&self.runner);
            let tx = tx.clone();

            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let key = chunk.key.clone();

                if let Err(e) = table.lock().await.transition(&key, ChunkState::Dispatched) {
                    let _ = tx.send(WorkerEvent::Fatal(e.into()));
                    return;
                }

                let event = match runner.run(&chunk, &source_list).await {
                    Ok(()) => match table.lock().await.transition(&key, ChunkState::Completed) {
                        Ok(_) => WorkerEvent::Completed(key),
                        Err(e) => WorkerEvent::Fatal(e.into()),
                    },
                    Err(e) if e.is_fatal() => WorkerEvent::Fatal(e),
                    Err(e) => match table.lock().await.transition(&key, ChunkState::Missing) {
                        Ok(_) => WorkerEvent::Missing(key, e),
                        Err(t) => WorkerEvent::Fatal(t.into()),
                    },
                };
                let _ = tx.send(event);
            });
        }
        drop(tx);

        while let Some(event) = rx.recv().await {
            match event {
                WorkerEvent::Completed(key) => {
                    let entry = table.lock().await.dataset(&key.dataset).cloned();
                    if let Some(entry) = entry {
                        merger.on_dataset_progress(&entry).await?;
                    }
                }
                WorkerEvent::Missing(key, reason) => {
                    warn!(chunk = %key, "Chunk is missing: {}", reason);
                }
                WorkerEvent::Fatal(err) => {
                    error!("Aborting run: {}", err);
                    workers.abort_all();
                    return Err(err);
                }
            }
            log_progress(&table.lock().await.progress());
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("Worker task failed: {}", e);
            }
        }

        let table = match Arc::try_unwrap(table) {
            Ok(table) => table.into_inner(),
            Err(shared) => shared.lock().await.clone(),
        };
        Ok(ScheduleOutcome {
            table,
            merges: merger.into_report(),
        })
    }
}
