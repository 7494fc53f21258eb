use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use recap_protocol::{
    JobHandle, JobId, JobStatus, ProcessingError, ProcessingPort, SessionId, TriggerDocument,
};
use tokio::time::Instant;
use tracing::info;

/// Stage names reported while a simulated job runs.
const STAGE_NAMES: [&str; 6] = [
    "A: Data Segmentation",
    "B: Activity Detection",
    "C: Audio Transcription",
    "D: Context Analysis",
    "E: LLM Processing",
    "F: Workflow Generation",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    Completes,
    Fails,
    Hangs,
    RefusesSubmission,
}

#[derive(Debug, Clone)]
struct SimulatedJob {
    submitted: Instant,
    org_id: String,
    session_id: SessionId,
}

/// A processing pipeline that finishes every job after a fixed delay.
#[derive(Debug)]
pub struct SimulatedForge {
    delay: Duration,
    behavior: Behavior,
    jobs: Mutex<HashMap<JobId, SimulatedJob>>,
    submissions: Mutex<Vec<TriggerDocument>>,
}

impl Default for SimulatedForge {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl SimulatedForge {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            behavior: Behavior::Completes,
            jobs: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self) -> Self {
        self.behavior = Behavior::Fails;
        self
    }

    /// Jobs are accepted but never finish.
    pub fn hanging(mut self) -> Self {
        self.behavior = Behavior::Hangs;
        self
    }

    pub fn refusing(mut self) -> Self {
        self.behavior = Behavior::RefusesSubmission;
        self
    }

    /// Every trigger accepted so far.
    pub fn submissions(&self) -> Vec<TriggerDocument> {
        self.submissions.lock().clone()
    }

    fn stage_at(&self, elapsed: Duration) -> &'static str {
        if self.delay.is_zero() {
            return STAGE_NAMES[STAGE_NAMES.len() - 1];
        }
        let fraction = elapsed.as_secs_f64() / self.delay.as_secs_f64();
        let index = (fraction * STAGE_NAMES.len() as f64) as usize;
        STAGE_NAMES[index.min(STAGE_NAMES.len() - 1)]
    }
}

#[async_trait]
impl ProcessingPort for SimulatedForge {
    async fn submit(
        &self,
        session_id: &SessionId,
        trigger: &TriggerDocument,
    ) -> Result<JobHandle, ProcessingError> {
        if self.behavior == Behavior::RefusesSubmission {
            return Err(ProcessingError::Submission(
                "pipeline is not accepting jobs".to_owned(),
            ));
        }
        let job_id = JobId::new_uuid();
        self.jobs.lock().insert(
            job_id.clone(),
            SimulatedJob {
                submitted: Instant::now(),
                org_id: trigger.session.org_id.clone(),
                session_id: session_id.clone(),
            },
        );
        self.submissions.lock().push(trigger.clone());
        info!(%job_id, %session_id, delay_ms = self.delay.as_millis() as u64, "simulated job accepted");
        Ok(JobHandle {
            job_id,
            session_id: session_id.clone(),
            submitted_at: Utc::now(),
        })
    }

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, ProcessingError> {
        let job = self
            .jobs
            .lock()
            .get(&handle.job_id)
            .cloned()
            .ok_or_else(|| ProcessingError::Unavailable(format!("unknown job {}", handle.job_id)))?;
        let elapsed = job.submitted.elapsed();

        match self.behavior {
            Behavior::Fails => Ok(JobStatus::Failed {
                error: "stage C: audio transcription failed".to_owned(),
            }),
            Behavior::Hangs => Ok(JobStatus::Running {
                stage: Some(STAGE_NAMES[0].to_owned()),
            }),
            _ if elapsed < self.delay => Ok(JobStatus::Running {
                stage: Some(self.stage_at(elapsed).to_owned()),
            }),
            _ => Ok(JobStatus::Completed {
                firestore_path: Some(format!(
                    "organizations/{}/workflows/{}",
                    job.org_id, job.session_id
                )),
                workflow_id: Some(format!("workflow_{}", job.session_id)),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use recap_protocol::{JobStatus, ProcessingError, ProcessingPort};

    use super::SimulatedForge;
    use crate::testing::descriptor;

    #[tokio::test]
    async fn reports_running_stage_before_completion() {
        let forge = SimulatedForge::new(Duration::from_secs(60));
        let job = descriptor();
        let handle = forge.submit(&job.session_id, &job.to_trigger()).await.unwrap();
        let status = forge.poll(&handle).await.unwrap();
        assert_eq!(
            status,
            JobStatus::Running {
                stage: Some("A: Data Segmentation".to_owned())
            }
        );
    }

    #[tokio::test]
    async fn refusing_forge_rejects_submission() {
        let forge = SimulatedForge::new(Duration::ZERO).refusing();
        let job = descriptor();
        let err = forge
            .submit(&job.session_id, &job.to_trigger())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Submission(_)));
        assert!(forge.submissions().is_empty());
    }
}
