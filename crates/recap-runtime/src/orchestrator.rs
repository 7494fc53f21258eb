use std::sync::Arc;

use chrono::Utc;
use recap_events::EventBroadcaster;
use recap_forge::ProcessingCoordinator;
use recap_protocol::{
    AgentCommand, AgentPort, AgentStatus, Event, Session, SessionFailure, SessionId,
    SessionState, SessionStateError, TransportError, Trigger,
};
use recap_store::ResultFallbackChain;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, instrument, warn};

use crate::config::RuntimeConfig;
use crate::executor::{BackgroundTaskExecutor, ExecutorError};
use crate::machine::{SessionStateMachine, Transition};
use crate::pipeline::StopPipeline;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Agent(#[from] TransportError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

/// Session control entry points.
///
/// `start_session` waits for the agent to accept; `stop_session` returns as
/// soon as the session is in `Stopping` and leaves the rest to the stop
/// pipeline.
#[derive(Clone)]
pub struct SessionOrchestrator {
    machine: SessionStateMachine,
    agent: Arc<dyn AgentPort>,
    pipeline: StopPipeline,
    executor: BackgroundTaskExecutor,
    starting: Arc<Mutex<()>>,
}

impl SessionOrchestrator {
    pub fn new(
        config: RuntimeConfig,
        agent: Arc<dyn AgentPort>,
        coordinator: ProcessingCoordinator,
        results: ResultFallbackChain,
        events: EventBroadcaster,
    ) -> Self {
        let machine = SessionStateMachine::new(events);
        let pipeline = StopPipeline::new(
            machine.clone(),
            agent.clone(),
            coordinator,
            results,
            Arc::new(config),
        );
        Self {
            machine,
            agent,
            pipeline,
            executor: BackgroundTaskExecutor::new(),
            starting: Arc::new(Mutex::new(())),
        }
    }

    pub fn machine(&self) -> &SessionStateMachine {
        &self.machine
    }

    pub fn events(&self) -> &EventBroadcaster {
        self.machine.events()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.machine.events().subscribe()
    }

    #[instrument(skip(self))]
    pub async fn start_session(&self) -> Result<Session, OrchestratorError> {
        let _starting = self.starting.lock().await;
        let from = self.machine.state();
        if !from.accepts_start() {
            warn!(%from, "start rejected");
            return Err(SessionStateError::InvalidTransition {
                from,
                trigger: Trigger::StartRequested,
            }
            .into());
        }

        if let Err(error) = self.agent.send(AgentCommand::start()).await {
            warn!(%error, "agent refused to start recording");
            return Err(error.into());
        }
        let session = self.machine.start_session(Utc::now())?;
        info!(session_id = %session.id, "recording started");
        Ok(session)
    }

    /// Moves the active session to `Stopping` and hands it to the stop pipeline.
    #[instrument(skip(self))]
    pub fn stop_session(&self) -> Result<Session, OrchestratorError> {
        let session = self
            .machine
            .apply_active(Transition::Stop { at: Utc::now() })?;

        let pipeline = self.pipeline.clone();
        let stopping = session.clone();
        if let Err(error) = self
            .executor
            .run(session.id.clone(), async move { pipeline.run(stopping).await })
        {
            warn!(%error, "stop pipeline not started");
            return Err(error.into());
        }
        info!(session_id = %session.id, "stop requested, pipeline running");
        Ok(session)
    }

    pub fn reset(&self) -> Option<Session> {
        self.machine.reset()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.machine.current()
    }

    pub fn state(&self) -> SessionState {
        self.machine.state()
    }

    pub fn last_error(&self) -> Option<SessionFailure> {
        self.machine.current().and_then(|session| session.last_error)
    }

    /// Agent status, independent of any session.
    pub async fn agent_status(&self) -> Result<AgentStatus, TransportError> {
        self.agent.status().await
    }

    pub async fn ping(&self) -> bool {
        self.agent.is_running().await
    }

    /// Waits for the stop pipeline of `session_id`, if one is running.
    pub async fn wait_for_pipeline(&self, session_id: &SessionId) -> bool {
        self.executor.wait(session_id).await
    }

    pub fn pipelines_in_flight(&self) -> usize {
        self.executor.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use chrono::Utc;
    use parking_lot::Mutex;
    use recap_agent::{SimulatedAgent, UploadWatcher};
    use recap_events::EventBroadcaster;
    use recap_forge::{ProcessingCoordinator, SimulatedForge};
    use recap_protocol::{
        AgentPort, CommandKind, DocumentStorePort, Event, EventKind, FailureReason,
        PipelineStage, Session, SessionState, SessionStateError, StageStatus, StoredDocument,
        TransportError, Trigger, WorkflowSource,
    };
    use recap_store::{ResultFallbackChain, SelectionRng, StaticDocumentStore};
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::{OrchestratorError, SessionOrchestrator};
    use crate::config::RuntimeConfig;

    struct Harness {
        orchestrator: SessionOrchestrator,
        agent: Arc<SimulatedAgent>,
        forge: Arc<SimulatedForge>,
    }

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
            .with_identity("diligent4", "DESKTOP-OBMAPKG-40770579")
            .with_processing_timeout(Duration::from_secs(2))
            .with_upload(UploadWatcher::new(Duration::from_millis(2), Duration::from_secs(2)))
    }

    fn harness_with(
        config: RuntimeConfig,
        agent: SimulatedAgent,
        forge: SimulatedForge,
        store: Option<Arc<dyn DocumentStorePort>>,
        events: EventBroadcaster,
    ) -> Harness {
        let agent = Arc::new(agent);
        let forge = Arc::new(forge);
        let coordinator =
            ProcessingCoordinator::new(forge.clone()).with_poll_interval(Duration::from_millis(5));
        let results = ResultFallbackChain::new(store, Arc::new(SelectionRng::seeded(42)));
        let orchestrator =
            SessionOrchestrator::new(config, agent.clone(), coordinator, results, events);
        Harness {
            orchestrator,
            agent,
            forge,
        }
    }

    fn harness(agent: SimulatedAgent, forge: SimulatedForge) -> Harness {
        harness_with(config(), agent, forge, None, EventBroadcaster::default())
    }

    fn quick_agent() -> SimulatedAgent {
        SimulatedAgent::new().with_latency(Duration::from_millis(1))
    }

    fn quick_forge() -> SimulatedForge {
        SimulatedForge::new(Duration::from_millis(10))
    }

    fn candidates(count: usize) -> Vec<StoredDocument> {
        (0..count)
            .map(|i| {
                let id = format!("wf_{i}");
                let fields = json!({ "title": format!("Published {i}"), "duration": 240 });
                StoredDocument {
                    path: format!("organizations/diligent4/published/meta/workflows_versions/{id}"),
                    id,
                    fields: fields.as_object().cloned().unwrap_or_default(),
                    updated_at: None,
                }
            })
            .collect()
    }

    fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        seen
    }

    async fn record_then_stop(h: &Harness) -> Result<Session> {
        h.orchestrator.start_session().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let stopping = h.orchestrator.stop_session()?;
        assert_eq!(stopping.state, SessionState::Stopping);
        h.orchestrator.wait_for_pipeline(&stopping.id).await;
        Ok(stopping)
    }

    #[tokio::test]
    async fn full_success_serves_one_of_the_candidates() -> Result<()> {
        let docs = candidates(5);
        let refs: HashSet<_> = docs.iter().map(|d| d.path.clone()).collect();
        let h = harness_with(
            config(),
            quick_agent(),
            quick_forge(),
            Some(Arc::new(StaticDocumentStore::new(docs))),
            EventBroadcaster::default(),
        );
        let mut events = h.orchestrator.subscribe();

        record_then_stop(&h).await?;

        let session = h.orchestrator.current_session().unwrap();
        assert_eq!(session.state, SessionState::Ready);
        assert!(!session.degraded);
        let result = session.result.unwrap();
        assert_eq!(result.source, WorkflowSource::Real);
        assert!(refs.contains(&result.document_ref));
        assert_eq!(h.forge.submissions().len(), 1);

        let seen = drain(&mut events);
        let states: Vec<_> = seen.iter().filter_map(|e| e.kind.entered_state()).collect();
        assert_eq!(
            states,
            vec![
                SessionState::Recording,
                SessionState::Stopping,
                SessionState::Processing,
                SessionState::Retrieving,
                SessionState::Ready,
            ]
        );
        assert!(seen.windows(2).all(|w| w[0].seq + 1 == w[1].seq));
        assert!(seen.iter().any(|e| matches!(
            e.kind,
            EventKind::Progress { stage: PipelineStage::ConfirmUpload, status: StageStatus::Running, .. }
        )));
        Ok(())
    }

    #[tokio::test]
    async fn stopping_is_published_before_agent_hears_stop() -> Result<()> {
        let events = EventBroadcaster::default();
        let watcher = Arc::new(Mutex::new(events.subscribe()));
        let stopping_seen = Arc::new(Mutex::new(None::<bool>));

        let observed = stopping_seen.clone();
        let agent = quick_agent().with_observer(move |kind| {
            if kind != CommandKind::Stop {
                return;
            }
            let mut receiver = watcher.lock();
            let mut seen = false;
            while let Ok(event) = receiver.try_recv() {
                seen |= event.kind.entered_state() == Some(SessionState::Stopping);
            }
            *observed.lock() = Some(seen);
        });
        let h = harness_with(config(), agent, quick_forge(), None, events);

        record_then_stop(&h).await?;
        assert_eq!(*stopping_seen.lock(), Some(true));
        Ok(())
    }

    #[tokio::test]
    async fn processing_timeout_still_ends_ready_with_synthesized_result() -> Result<()> {
        let h = harness_with(
            config().with_processing_timeout(Duration::from_millis(50)),
            quick_agent(),
            quick_forge().hanging(),
            Some(Arc::new(StaticDocumentStore::new(candidates(3)))),
            EventBroadcaster::default(),
        );
        let mut events = h.orchestrator.subscribe();

        record_then_stop(&h).await?;

        let session = h.orchestrator.current_session().unwrap();
        assert_eq!(session.state, SessionState::Ready);
        assert!(session.degraded);
        let result = session.result.clone().unwrap();
        assert_eq!(result.source, WorkflowSource::Synthesized);

        let seen = drain(&mut events);
        assert!(seen.iter().any(|e| matches!(
            e.kind,
            EventKind::Progress { stage: PipelineStage::Process, status: StageStatus::Degraded, .. }
        )));
        match &seen.last().unwrap().kind {
            EventKind::ResultReady { result: published } => assert_eq!(**published, result),
            other => panic!("expected result_ready last, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn agent_timeout_on_stop_fails_without_submitting() -> Result<()> {
        let mut config = config();
        config.stop_timeout = Some(Duration::from_millis(30));
        let h = harness_with(
            config,
            SimulatedAgent::new().hanging(),
            quick_forge(),
            None,
            EventBroadcaster::default(),
        );
        // the hanging agent would never acknowledge a start either
        h.orchestrator.machine().start_session(Utc::now())?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let mut events = h.orchestrator.subscribe();
        let stopping = h.orchestrator.stop_session()?;
        h.orchestrator.wait_for_pipeline(&stopping.id).await;

        let session = h.orchestrator.current_session().unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(
            session.last_error.map(|f| f.reason),
            Some(FailureReason::AgentUnreachable)
        );
        assert!(h.forge.submissions().is_empty());
        assert_eq!(h.agent.commands(), vec![CommandKind::Stop]);

        let seen = drain(&mut events);
        assert!(matches!(
            seen.last().map(|e| &e.kind),
            Some(EventKind::Error { reason: FailureReason::AgentUnreachable, .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn stop_without_recording_is_a_state_error() -> Result<()> {
        let h = harness(quick_agent(), quick_forge());
        let err = h.orchestrator.stop_session().unwrap_err();
        assert_eq!(
            err,
            OrchestratorError::State(SessionStateError::InvalidTransition {
                from: SessionState::Idle,
                trigger: Trigger::StopRequested
            })
        );
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.agent.commands().is_empty());
        assert_eq!(h.orchestrator.pipelines_in_flight(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_start_leaves_state_unchanged() -> Result<()> {
        let h = harness(quick_agent().rejecting(), quick_forge());
        let err = h.orchestrator.start_session().await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Agent(ref e) if e.is_rejection()));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.orchestrator.current_session().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn failed_upload_is_terminal() -> Result<()> {
        let h = harness(quick_agent().with_failed_upload(), quick_forge());
        record_then_stop(&h).await?;
        let session = h.orchestrator.current_session().unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert!(session.state.is_terminal());
        assert_eq!(
            h.orchestrator.last_error().map(|f| f.reason),
            Some(FailureReason::UploadFailed)
        );
        assert!(h.forge.submissions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn processing_failure_fails_session_when_degradation_disabled() -> Result<()> {
        let mut config = config();
        config.degrade_on_processing_failure = false;
        let h = harness_with(
            config,
            quick_agent(),
            quick_forge().failing(),
            None,
            EventBroadcaster::default(),
        );
        record_then_stop(&h).await?;
        let session = h.orchestrator.current_session().unwrap();
        assert_eq!(session.state, SessionState::Failed);
        assert_eq!(
            session.last_error.map(|f| f.reason),
            Some(FailureReason::ProcessingFailed)
        );
        Ok(())
    }

    #[tokio::test]
    async fn identity_comes_from_agent_status_when_not_pinned() -> Result<()> {
        let mut config = config();
        config.org_id = None;
        config.device_id = None;
        let h = harness_with(
            config,
            quick_agent().with_identity("acme", "LAPTOP-7"),
            quick_forge(),
            None,
            EventBroadcaster::default(),
        );
        record_then_stop(&h).await?;
        let submissions = h.forge.submissions();
        assert_eq!(submissions.len(), 1);
        assert_eq!(submissions[0].session.org_id, "acme");
        assert_eq!(submissions[0].session.device_id, "LAPTOP-7");
        let result = h.orchestrator.current_session().unwrap().result.unwrap();
        assert!(result.document_ref.starts_with("organizations/acme/"));
        Ok(())
    }

    #[tokio::test]
    async fn superseded_pipeline_never_reaches_processing() -> Result<()> {
        let h = harness(
            quick_agent().with_latency(Duration::from_millis(40)),
            quick_forge(),
        );
        h.orchestrator.start_session().await?;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let old = h.orchestrator.stop_session()?;
        h.orchestrator.reset();
        h.orchestrator.wait_for_pipeline(&old.id).await;

        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.forge.submissions().is_empty());
        assert!(h.agent.is_running().await);
        Ok(())
    }

    #[tokio::test]
    async fn reset_mid_stage_silences_the_abandoned_pipeline() -> Result<()> {
        let h = harness(
            quick_agent().with_latency(Duration::from_millis(40)),
            quick_forge(),
        );
        let mut events = h.orchestrator.subscribe();
        h.orchestrator.start_session().await?;
        let old = h.orchestrator.stop_session()?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.orchestrator.reset();
        h.orchestrator.wait_for_pipeline(&old.id).await;

        let seen = drain(&mut events);
        let idle_at = seen
            .iter()
            .position(|e| e.kind.entered_state() == Some(SessionState::Idle))
            .unwrap();
        let after: Vec<_> = seen[idle_at + 1..].iter().map(|e| &e.kind).collect();
        assert!(after.is_empty(), "events after reset: {after:?}");
        assert!(h.forge.submissions().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn offline_agent_start_is_unreachable() -> Result<()> {
        let h = harness(quick_agent().offline(), quick_forge());
        let err = h.orchestrator.start_session().await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Agent(TransportError::Unreachable { .. })
        ));
        assert_eq!(h.orchestrator.state(), SessionState::Idle);
        assert!(h.orchestrator.last_error().is_none());
        assert_eq!(h.orchestrator.pipelines_in_flight(), 0);
        Ok(())
    }
}
