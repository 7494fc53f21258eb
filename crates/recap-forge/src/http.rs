use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recap_protocol::{
    JobHandle, JobId, JobStatus, ProcessingError, ProcessingPort, SessionId, TriggerDocument,
};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    job_id: String,
}

/// Processing pipeline reached over HTTP.
///
/// `POST {base}/v1/jobs` takes the trigger document and answers `{"job_id": ..}`;
/// `GET {base}/v1/jobs/{id}` answers a [`JobStatus`].
#[derive(Debug, Clone)]
pub struct HttpForge {
    client: Client,
    base_url: String,
}

impl HttpForge {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ProcessingError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| ProcessingError::Unavailable(error.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ProcessingPort for HttpForge {
    #[instrument(skip(self, trigger), fields(session_id = %session_id))]
    async fn submit(
        &self,
        session_id: &SessionId,
        trigger: &TriggerDocument,
    ) -> Result<JobHandle, ProcessingError> {
        let url = format!("{}/v1/jobs", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(trigger)
            .send()
            .await
            .map_err(|error| ProcessingError::Submission(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessingError::Submission(format!("HTTP {status}: {body}")));
        }

        let accepted: SubmitResponse = response
            .json()
            .await
            .map_err(|error| ProcessingError::Submission(format!("unexpected reply: {error}")))?;
        debug!(job_id = %accepted.job_id, "pipeline accepted job");
        Ok(JobHandle {
            job_id: JobId::from(accepted.job_id),
            session_id: session_id.clone(),
            submitted_at: Utc::now(),
        })
    }

    #[instrument(skip(self, handle), fields(job_id = %handle.job_id))]
    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, ProcessingError> {
        let url = format!("{}/v1/jobs/{}", self.base_url, handle.job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|error| ProcessingError::Unavailable(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProcessingError::Unavailable(format!("HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|error| ProcessingError::Unavailable(format!("unexpected status: {error}")))
    }
}
