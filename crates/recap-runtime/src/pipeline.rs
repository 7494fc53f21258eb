//! The stop pipeline: everything that happens after the user presses stop.
//!
//! Stages run in [`PipelineStage::ORDER`]. Each one publishes `started`
//! before it runs and exactly one of `completed`, `degraded` or `failed`
//! afterwards, then hands a [`Carry`] to the next stage. Before every stage
//! the pipeline checks that its session is still the active one; a
//! superseded session's pipeline stops there.

use std::sync::Arc;

use chrono::Utc;
use recap_forge::ProcessingCoordinator;
use recap_protocol::{
    AgentCommand, AgentPort, FailureReason, PipelineStage, ProcessingJobDescriptor, Session,
    SessionFailure, SessionId, StageStatus, TimeRange,
};
use recap_store::{FallbackCause, ResultFallbackChain};
use tracing::{info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::machine::{SessionStateMachine, Transition};

/// Output of one stage, consumed by the next.
#[derive(Debug, Clone)]
enum Carry {
    Begin,
    Stopped,
    Uploaded,
    Described(Box<ProcessingJobDescriptor>),
    /// No valid descriptor could be built; processing is skipped.
    Undescribed { org_id: String, reason: String },
    Processed {
        org_id: String,
        degraded: Option<String>,
    },
}

#[derive(Debug)]
enum Step {
    Continue(Carry),
    Finished,
}

#[derive(Clone)]
pub struct StopPipeline {
    machine: SessionStateMachine,
    agent: Arc<dyn AgentPort>,
    coordinator: ProcessingCoordinator,
    results: ResultFallbackChain,
    config: Arc<RuntimeConfig>,
}

impl StopPipeline {
    pub fn new(
        machine: SessionStateMachine,
        agent: Arc<dyn AgentPort>,
        coordinator: ProcessingCoordinator,
        results: ResultFallbackChain,
        config: Arc<RuntimeConfig>,
    ) -> Self {
        Self {
            machine,
            agent,
            coordinator,
            results,
            config,
        }
    }

    /// Drives `session`, already in `Stopping`, to `Ready` or `Failed`.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn run(&self, session: Session) {
        let mut carry = Carry::Begin;
        for stage in PipelineStage::ORDER {
            if !self.machine.owns_pipeline(&session.id) {
                info!(%stage, "session superseded, stop pipeline halted");
                return;
            }
            self.report(&session.id, stage, StageStatus::Started, stage.label());

            let step = match stage {
                PipelineStage::StopAgent => self.stop_agent(&session).await,
                PipelineStage::ConfirmUpload => self.confirm_upload(&session).await,
                PipelineStage::BuildDescriptor => self.build_descriptor(&session).await,
                PipelineStage::Process => self.process(&session, carry).await,
                PipelineStage::Retrieve => self.retrieve(&session, carry).await,
            };
            match step {
                Step::Continue(next) => carry = next,
                Step::Finished => return,
            }
        }
    }

    fn report(
        &self,
        session_id: &SessionId,
        stage: PipelineStage,
        status: StageStatus,
        message: impl Into<String>,
    ) {
        self.machine.progress(session_id, stage, status, message);
    }

    /// Applies `transition`; a rejection ends the run.
    fn transition(&self, session_id: &SessionId, transition: Transition) -> bool {
        match self.machine.apply(session_id, transition) {
            Ok(_) => true,
            Err(error) => {
                warn!(%error, "stop pipeline transition rejected");
                false
            }
        }
    }

    fn advance(&self, session_id: &SessionId, transition: Transition, carry: Carry) -> Step {
        if self.transition(session_id, transition) {
            Step::Continue(carry)
        } else {
            Step::Finished
        }
    }

    async fn stop_agent(&self, session: &Session) -> Step {
        let stage = PipelineStage::StopAgent;
        let mut command = AgentCommand::stop();
        if let Some(timeout) = self.config.stop_timeout {
            command = command.with_timeout(timeout);
        }

        match self.agent.send(command).await {
            Ok(_) => {
                self.report(&session.id, stage, StageStatus::Completed, "Collection agent stopped");
                self.advance(&session.id, Transition::AgentStopAcknowledged, Carry::Stopped)
            }
            Err(error) => {
                let reason = if error.is_rejection() {
                    FailureReason::AgentRejected
                } else {
                    FailureReason::AgentUnreachable
                };
                warn!(%error, %reason, "agent stop failed");
                self.report(&session.id, stage, StageStatus::Failed, error.to_string());
                self.transition(
                    &session.id,
                    Transition::AgentStopFailed(SessionFailure::new(reason, error.to_string())),
                );
                Step::Finished
            }
        }
    }

    async fn confirm_upload(&self, session: &Session) -> Step {
        let stage = PipelineStage::ConfirmUpload;
        let confirmed = self
            .config
            .upload
            .confirm(self.agent.as_ref(), |phase| {
                self.report(&session.id, stage, StageStatus::Running, phase);
            })
            .await;

        match confirmed {
            Ok(()) => {
                self.report(&session.id, stage, StageStatus::Completed, "Uploads verified");
                Step::Continue(Carry::Uploaded)
            }
            Err(error) => {
                warn!(%error, "upload confirmation failed");
                self.report(&session.id, stage, StageStatus::Failed, error.to_string());
                self.transition(
                    &session.id,
                    Transition::UploadFailed(SessionFailure::new(
                        FailureReason::UploadFailed,
                        error.to_string(),
                    )),
                );
                Step::Finished
            }
        }
    }

    /// Config pins win; otherwise the agent's `status` supplies the identity.
    async fn resolve_identity(&self) -> (Option<String>, Option<String>) {
        let mut org_id = self.config.org_id.clone();
        let mut device_id = self.config.device_id.clone();
        if org_id.is_some() && device_id.is_some() {
            return (org_id, device_id);
        }
        match self.agent.status().await {
            Ok(status) => {
                org_id = org_id.or(status.org_id);
                device_id = device_id.or(status.device_id);
            }
            Err(error) => warn!(%error, "agent identity unavailable"),
        }
        (org_id, device_id)
    }

    async fn build_descriptor(&self, session: &Session) -> Step {
        let stage = PipelineStage::BuildDescriptor;
        let (org_id, device_id) = self.resolve_identity().await;
        let org_id = org_id.unwrap_or_default();

        let descriptor = ProcessingJobDescriptor {
            session_id: session.id.clone(),
            org_id: org_id.clone(),
            device_id: device_id.unwrap_or_default(),
            time_range: TimeRange {
                start: session.started_at,
                end: session.stopped_at.unwrap_or_else(Utc::now),
            },
            timezone: self.config.timezone.clone(),
            stages: self.config.stages.clone(),
            options: self.config.options,
            visibility: self.config.visibility.clone(),
            pipeline_version: self.config.pipeline_version.clone(),
            config_path: self.config.config_path.clone(),
        };

        match descriptor.validate() {
            Ok(()) => {
                let message = format!(
                    "Trigger ready for {} stages ({})",
                    descriptor.stages.len(),
                    descriptor.org_id
                );
                self.report(&session.id, stage, StageStatus::Completed, message);
                Step::Continue(Carry::Described(Box::new(descriptor)))
            }
            Err(error) => {
                warn!(%error, "processing descriptor invalid, skipping processing");
                self.machine.mark_degraded(&session.id);
                self.report(&session.id, stage, StageStatus::Degraded, error.to_string());
                Step::Continue(Carry::Undescribed {
                    org_id,
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn process(&self, session: &Session, carry: Carry) -> Step {
        let stage = PipelineStage::Process;
        match carry {
            Carry::Described(descriptor) => {
                let outcome = self
                    .coordinator
                    .run(&descriptor, self.config.processing_timeout)
                    .await;
                if outcome.is_completed() {
                    self.report(&session.id, stage, StageStatus::Completed, outcome.describe());
                    self.advance(
                        &session.id,
                        Transition::ProcessingCompleted,
                        Carry::Processed {
                            org_id: descriptor.org_id.clone(),
                            degraded: None,
                        },
                    )
                } else {
                    self.degrade(session, descriptor.org_id.clone(), outcome.describe())
                }
            }
            Carry::Undescribed { org_id, reason } => self.degrade(session, org_id, reason),
            other => {
                warn!(carry = ?other, "process stage reached without a descriptor");
                Step::Finished
            }
        }
    }

    fn degrade(&self, session: &Session, org_id: String, reason: String) -> Step {
        let stage = PipelineStage::Process;
        if !self.config.degrade_on_processing_failure {
            self.report(&session.id, stage, StageStatus::Failed, reason.clone());
            self.transition(
                &session.id,
                Transition::ProcessingFailed(SessionFailure::new(
                    FailureReason::ProcessingFailed,
                    reason,
                )),
            );
            return Step::Finished;
        }

        info!(%reason, "processing degraded, result will be synthesized");
        self.machine.mark_degraded(&session.id);
        self.report(&session.id, stage, StageStatus::Degraded, reason.clone());
        self.advance(
            &session.id,
            Transition::ProcessingCompleted,
            Carry::Processed {
                org_id,
                degraded: Some(reason),
            },
        )
    }

    async fn retrieve(&self, session: &Session, carry: Carry) -> Step {
        let stage = PipelineStage::Retrieve;
        let (org_id, degraded) = match carry {
            Carry::Processed { org_id, degraded } => (org_id, degraded),
            other => {
                warn!(carry = ?other, "retrieve stage reached before processing");
                return Step::Finished;
            }
        };

        let collection = self.config.collection_for(&org_id);
        let outcome = match degraded {
            Some(reason) => self
                .results
                .synthesize(&collection, FallbackCause::ProcessingDegraded(reason)),
            None => self.results.fetch_outcome(&collection).await,
        };

        match outcome {
            Ok(outcome) => {
                if outcome.is_fallback() {
                    self.machine.mark_degraded(&session.id);
                    self.report(
                        &session.id,
                        stage,
                        StageStatus::Degraded,
                        "Serving synthesized workflow",
                    );
                } else {
                    let message = format!("Retrieved {}", outcome.result().document_ref);
                    self.report(&session.id, stage, StageStatus::Completed, message);
                }
                self.transition(
                    &session.id,
                    Transition::ResultRetrieved(Box::new(outcome.into_result())),
                );
            }
            Err(error) => {
                warn!(%error, "no workflow result could be produced");
                self.report(&session.id, stage, StageStatus::Failed, error.to_string());
                self.transition(
                    &session.id,
                    Transition::RetrievalFailed(SessionFailure::new(
                        FailureReason::RetrievalFailed,
                        error.to_string(),
                    )),
                );
            }
        }
        Step::Finished
    }
}
