use super::{job_name, BatchQueue, JobTemplate, SubmitRequest};
use crate::error::{RunError, RunResult};
use crate::retry::{retry_async, RetryPolicy};
use crate::types::Chunk;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Submits chunks to a batch queue without waiting for them
pub struct RemoteJobRunner {
    queue: Arc<dyn BatchQueue>,
    template: JobTemplate,
    run_stamp: String,
    dispatch_policy: RetryPolicy,
    submit_spacing: Duration,
}

impl RemoteJobRunner {
    pub fn new(
        queue: Arc<dyn BatchQueue>,
        template: JobTemplate,
        run_stamp: impl Into<String>,
        dispatch_policy: RetryPolicy,
    ) -> Self {
        Self {
            queue,
            template,
            run_stamp: run_stamp.into(),
            dispatch_policy,
            submit_spacing: Duration::ZERO,
        }
    }

    pub fn with_submit_spacing(mut self, spacing: Duration) -> Self {
        self.submit_spacing = spacing;
        self
    }

    pub fn job_name(&self, chunk: &Chunk) -> String {
        job_name(&self.run_stamp, &chunk.key)
    }

    /// Submit `chunk`, retrying with the dispatch policy.
    ///
    /// Returns the job name on success and [`RunError::Dispatch`] once the
    /// attempt budget is spent.
    pub async fn submit(&self, chunk: &Chunk, source_list: &Path) -> RunResult<String> {
        let request = SubmitRequest {
            job_name: self.job_name(chunk),
            log: chunk.log.clone(),
            command: self.template.command_line(chunk, source_list),
        };
        let label = format!("submit {}", request.job_name);

        let result = retry_async(&self.dispatch_policy, &label, |_| {
            let request = &request;
            async move { self.queue.submit(request).await }
        })
        .await;

        if !self.submit_spacing.is_zero() {
            tokio::time::sleep(self.submit_spacing).await;
        }

        match result {
            Ok(()) => {
                info!(chunk = %chunk.key, job_name = %request.job_name, "Submitted");
                Ok(request.job_name)
            }
            Err(exhausted) => Err(RunError::Dispatch {
                job_name: request.job_name.clone(),
                attempts: exhausted.attempts,
                message: exhausted.last_error.to_string(),
            }),
        }
    }

    /// Whether the queue still knows the chunk's job; status errors count as known
    pub async fn is_known(&self, chunk: &Chunk) -> bool {
        let name = self.job_name(chunk);
        match self.queue.is_known(&name).await {
            Ok(known) => known,
            Err(e) => {
                warn!(job_name = %name, "Status query failed, assuming job is alive: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::testing::MockBatchQueue;
    use crate::types::{ChunkKey, DatasetId, WorkItem};
    use std::path::PathBuf;

    fn chunk() -> Chunk {
        Chunk {
            key: ChunkKey::new(DatasetId::new("ZJets"), 4),
            items: vec![WorkItem::uncounted("z.root")],
            output: PathBuf::from("out/ZJets_4.root"),
            log: PathBuf::from("out/log/ZJets_4.log"),
            list_file: None,
        }
    }

    fn runner(queue: Arc<MockBatchQueue>, attempts: u32) -> RemoteJobRunner {
        RemoteJobRunner::new(
            queue,
            JobTemplate::from_config(&RunConfig::default()),
            "stamp",
            RetryPolicy::immediate(attempts),
        )
    }

    #[tokio::test]
    async fn test_submit_names_job_after_chunk() {
        let queue = Arc::new(MockBatchQueue::new());
        let name = runner(queue.clone(), 3)
            .submit(&chunk(), Path::new("ZJets.txt"))
            .await
            .unwrap();

        assert_eq!(name, "stamp_ZJets_4");
        let submitted = queue.submissions();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].command[0], "./Analyzer");
        assert_eq!(submitted[0].log, PathBuf::from("out/log/ZJets_4.log"));
    }

    #[tokio::test]
    async fn test_transient_submit_failures_are_retried() {
        let queue = Arc::new(MockBatchQueue::new().fail_submissions(2));
        runner(queue.clone(), 3)
            .submit(&chunk(), Path::new("ZJets.txt"))
            .await
            .unwrap();
        assert_eq!(queue.submit_attempts(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_dispatch_is_not_fatal() {
        let queue = Arc::new(MockBatchQueue::new().fail_submissions(10));
        let err = runner(queue.clone(), 4)
            .submit(&chunk(), Path::new("ZJets.txt"))
            .await
            .unwrap_err();

        match &err {
            RunError::Dispatch { attempts, .. } => assert_eq!(*attempts, 4),
            other => panic!("expected Dispatch, got {other:?}"),
        }
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_forgotten_job_is_unknown() {
        let queue = Arc::new(MockBatchQueue::new());
        let runner = runner(queue.clone(), 1);
        runner.submit(&chunk(), Path::new("ZJets.txt")).await.unwrap();
        assert!(runner.is_known(&chunk()).await);

        queue.forget("stamp_ZJets_4");
        assert!(!runner.is_known(&chunk()).await);
    }
}
