use std::time::Duration;

use recap_protocol::{AgentPort, UploadError, UploadState};
use tracing::{debug, instrument, warn};

/// Polls the agent's `status` until it reports the post-stop upload as done.
#[derive(Debug, Clone, Copy)]
pub struct UploadWatcher {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for UploadWatcher {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

impl UploadWatcher {
    pub fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Resolves once the upload is confirmed. `on_phase` sees each new phase line once.
    ///
    /// An agent that reports no upload block (or `idle`) has nothing pending.
    #[instrument(skip(self, agent, on_phase), fields(timeout_ms = self.timeout.as_millis() as u64))]
    pub async fn confirm<F>(&self, agent: &dyn AgentPort, mut on_phase: F) -> Result<(), UploadError>
    where
        F: FnMut(&str) + Send,
    {
        let poll = async {
            let mut last_phase: Option<String> = None;
            loop {
                let status = agent.status().await?;
                let Some(upload) = status.upload else {
                    debug!("agent reports no pending upload");
                    return Ok(());
                };
                match upload.state {
                    UploadState::Complete | UploadState::Idle => {
                        debug!(state = ?upload.state, "upload confirmed");
                        return Ok(());
                    }
                    UploadState::Failed => {
                        let message = upload
                            .error
                            .unwrap_or_else(|| "upload failed".to_owned());
                        warn!(%message, "agent reported upload failure");
                        return Err(UploadError::Failed(message));
                    }
                    UploadState::Uploading => {
                        if let Some(phase) = upload.phase
                            && last_phase.as_deref() != Some(phase.as_str())
                        {
                            on_phase(&phase);
                            last_phase = Some(phase);
                        }
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        };

        match tokio::time::timeout(self.timeout, poll).await {
            Ok(outcome) => outcome,
            Err(_) => Err(UploadError::Timeout(self.timeout)),
        }
    }
}
