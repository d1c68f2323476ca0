//! Orchestrator construction
//!
//! Every external collaborator can be swapped before the run starts; the
//! ones left unset are built from the configuration.

use super::Orchestrator;
use crate::config::RunConfig;
use crate::error::RunResult;
use crate::input::{CommandRecordCounter, RecordCounter};
use crate::job::{BatchQueue, CommandBatchQueue};
use crate::layout::RunLayout;
use crate::merge::{CommandReducer, Reducer};
use crate::partition::calibration::{CalibrationSource, NoCalibration, RatioTable};
use crate::subprocess::SubprocessManager;
use std::sync::Arc;

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: RunConfig,
    subprocess: Option<SubprocessManager>,
    counter: Option<Arc<dyn RecordCounter>>,
    queue: Option<Arc<dyn BatchQueue>>,
    reducer: Option<Arc<dyn Reducer>>,
    calibration: Option<Arc<dyn CalibrationSource>>,
}

impl OrchestratorBuilder {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            subprocess: None,
            counter: None,
            queue: None,
            reducer: None,
            calibration: None,
        }
    }

    /// Subprocess layer for jobs, submissions and the reducer
    pub fn with_subprocess(mut self, subprocess: SubprocessManager) -> Self {
        self.subprocess = Some(subprocess);
        self
    }

    pub fn with_counter(mut self, counter: Arc<dyn RecordCounter>) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn BatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_reducer(mut self, reducer: Arc<dyn Reducer>) -> Self {
        self.reducer = Some(reducer);
        self
    }

    pub fn with_calibration(mut self, calibration: Arc<dyn CalibrationSource>) -> Self {
        self.calibration = Some(calibration);
        self
    }

    /// Validate the configuration and fill in the missing collaborators
    pub fn build(self) -> RunResult<Orchestrator> {
        let config = self.config;
        config.validate()?;

        let subprocess = self.subprocess.unwrap_or_else(|| {
            if config.dry_run {
                SubprocessManager::dry_run()
            } else {
                SubprocessManager::production()
            }
        });

        // Record probes run for real in dry-run mode too
        let counter: Arc<dyn RecordCounter> = self.counter.unwrap_or_else(|| {
            Arc::new(CommandRecordCounter::new(
                SubprocessManager::production(),
                config.partition.record_probe.clone(),
            ))
        });

        let queue: Arc<dyn BatchQueue> = self.queue.unwrap_or_else(|| {
            Arc::new(CommandBatchQueue::new(subprocess.clone(), &config.remote))
        });

        let reducer: Arc<dyn Reducer> = self.reducer.unwrap_or_else(|| {
            Arc::new(CommandReducer::new(
                subprocess.clone(),
                config.merge.reducer.clone(),
                config.retry.disk.clone(),
            ))
        });

        let calibration: Arc<dyn CalibrationSource> = match (self.calibration, &config.partition.calibration) {
            (Some(source), _) => source,
            (None, Some(table)) => Arc::new(RatioTable::load(table)?),
            (None, None) => Arc::new(NoCalibration),
        };

        Ok(Orchestrator {
            layout: RunLayout::from_config(&config),
            config,
            subprocess,
            counter,
            queue,
            reducer,
            calibration,
        })
    }
}
