use std::sync::Arc;
use std::time::Duration;

use recap_protocol::{
    JobHandle, JobId, JobStatus, ProcessingError, ProcessingJobDescriptor, ProcessingPort,
};
use tracing::{debug, info, instrument, warn};

use crate::archive::TriggerArchive;

/// Consecutive poll failures tolerated before a job is given up on.
const MAX_POLL_ERRORS: u32 = 3;

/// How a processing wait ended. Anything but `Completed` sends the caller
/// down the synthesized-result path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Completed {
        job_id: JobId,
        document_path: Option<String>,
        workflow_id: Option<String>,
    },
    TimedOut {
        job_id: JobId,
        after: Duration,
    },
    Failed {
        error: ProcessingError,
    },
}

impl ProcessingOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Completed { job_id, .. } => format!("processing job {job_id} completed"),
            Self::TimedOut { job_id, after } => {
                format!("processing job {job_id} did not finish within {after:?}")
            }
            Self::Failed { error } => error.to_string(),
        }
    }
}

/// Submits descriptors to the processing pipeline and waits on them.
#[derive(Clone)]
pub struct ProcessingCoordinator {
    port: Arc<dyn ProcessingPort>,
    poll_interval: Duration,
    archive: Option<TriggerArchive>,
}

impl ProcessingCoordinator {
    pub fn new(port: Arc<dyn ProcessingPort>) -> Self {
        Self {
            port,
            poll_interval: Duration::from_millis(500),
            archive: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_archive(mut self, archive: TriggerArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Validates and submits. Nothing reaches the pipeline if validation fails.
    #[instrument(skip(self, descriptor), fields(session_id = %descriptor.session_id))]
    pub async fn submit(
        &self,
        descriptor: &ProcessingJobDescriptor,
    ) -> Result<JobHandle, ProcessingError> {
        descriptor.validate()?;
        let trigger = descriptor.to_trigger();

        if let Some(archive) = &self.archive {
            match archive.write(&descriptor.session_id, &trigger).await {
                Ok(path) => debug!(path = %path.display(), "trigger archived"),
                Err(error) => warn!(%error, "failed to archive trigger"),
            }
        }

        let handle = self.port.submit(&descriptor.session_id, &trigger).await?;
        info!(
            job_id = %handle.job_id,
            stages = trigger.options.stages.len(),
            start = %trigger.session.time_range.start,
            end = %trigger.session.time_range.end,
            "processing job submitted"
        );
        Ok(handle)
    }

    /// Polls `handle` until it finishes or `timeout` elapses.
    #[instrument(skip(self, handle), fields(job_id = %handle.job_id, timeout_ms = timeout.as_millis() as u64))]
    pub async fn await_completion(&self, handle: &JobHandle, timeout: Duration) -> ProcessingOutcome {
        let poll = async {
            let mut errors = 0_u32;
            loop {
                match self.port.poll(handle).await {
                    Ok(JobStatus::Completed {
                        firestore_path,
                        workflow_id,
                    }) => {
                        return ProcessingOutcome::Completed {
                            job_id: handle.job_id.clone(),
                            document_path: firestore_path,
                            workflow_id,
                        };
                    }
                    Ok(JobStatus::Failed { error }) => {
                        return ProcessingOutcome::Failed {
                            error: ProcessingError::JobFailed {
                                job_id: handle.job_id.to_string(),
                                message: error,
                            },
                        };
                    }
                    Ok(status) => {
                        errors = 0;
                        debug!(?status, "processing job still running");
                    }
                    Err(error) => {
                        errors += 1;
                        warn!(%error, attempt = errors, "processing status poll failed");
                        if errors >= MAX_POLL_ERRORS {
                            return ProcessingOutcome::Failed { error };
                        }
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        };

        let outcome = match tokio::time::timeout(timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => ProcessingOutcome::TimedOut {
                job_id: handle.job_id.clone(),
                after: timeout,
            },
        };
        if outcome.is_completed() {
            info!("processing job completed");
        } else {
            warn!(outcome = %outcome.describe(), "processing job did not complete");
        }
        outcome
    }

    /// Submits then waits. A submission error becomes `Failed`.
    pub async fn run(
        &self,
        descriptor: &ProcessingJobDescriptor,
        timeout: Duration,
    ) -> ProcessingOutcome {
        match self.submit(descriptor).await {
            Ok(handle) => self.await_completion(&handle, timeout).await,
            Err(error) => {
                warn!(%error, "processing submission failed");
                ProcessingOutcome::Failed { error }
            }
        }
    }
}
