use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use recap_events::EventBroadcaster;
use recap_protocol::{
    Event, EventKind, PipelineStage, Session, SessionFailure, SessionId, SessionState,
    SessionStateError, StageStatus, Trigger, WorkflowResult,
};
use tracing::{debug, info, warn};

/// A state-machine input together with the data it records on the session.
#[derive(Debug, Clone)]
pub enum Transition {
    Stop { at: DateTime<Utc> },
    AgentStopAcknowledged,
    AgentStopFailed(SessionFailure),
    UploadFailed(SessionFailure),
    ProcessingCompleted,
    ProcessingFailed(SessionFailure),
    ResultRetrieved(Box<WorkflowResult>),
    RetrievalFailed(SessionFailure),
}

impl Transition {
    pub fn trigger(&self) -> Trigger {
        match self {
            Self::Stop { .. } => Trigger::StopRequested,
            Self::AgentStopAcknowledged => Trigger::AgentStopAcknowledged,
            Self::AgentStopFailed(_) => Trigger::AgentStopFailed,
            Self::UploadFailed(_) => Trigger::UploadFailed,
            Self::ProcessingCompleted => Trigger::ProcessingCompleted,
            Self::ProcessingFailed(_) => Trigger::ProcessingFailed,
            Self::ResultRetrieved(_) => Trigger::ResultRetrieved,
            Self::RetrievalFailed(_) => Trigger::RetrievalFailed,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    active: Option<SessionId>,
}

impl Registry {
    fn active_session(&self) -> Option<&Session> {
        self.active.as_ref().and_then(|id| self.sessions.get(id))
    }

    fn state(&self) -> SessionState {
        self.active_session()
            .map(|session| session.state)
            .unwrap_or(SessionState::Idle)
    }
}

/// Single writer of session state.
///
/// Every transition runs under one registry lock, and its `state_changed`
/// event is emitted before the lock is released, so observers see events in
/// transition order. The lock is never held across an await.
#[derive(Clone, Debug)]
pub struct SessionStateMachine {
    registry: Arc<Mutex<Registry>>,
    events: EventBroadcaster,
}

impl SessionStateMachine {
    pub fn new(events: EventBroadcaster) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            events,
        }
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }

    /// State of the active session, `Idle` when there is none.
    pub fn state(&self) -> SessionState {
        self.registry.lock().state()
    }

    pub fn current(&self) -> Option<Session> {
        self.registry.lock().active_session().cloned()
    }

    pub fn active_id(&self) -> Option<SessionId> {
        self.registry.lock().active.clone()
    }

    /// True while `session_id` is active and its stop pipeline still owns it.
    pub fn owns_pipeline(&self, session_id: &SessionId) -> bool {
        let registry = self.registry.lock();
        registry.active.as_ref() == Some(session_id) && registry.state().is_in_flight()
    }

    /// Creates a new active session in `Recording`. The superseded session is dropped.
    pub fn start_session(&self, started_at: DateTime<Utc>) -> Result<Session, SessionStateError> {
        let mut registry = self.registry.lock();
        let from = registry.state();
        let to = from.apply(Trigger::StartRequested)?;

        if let Some(previous) = registry.active.take() {
            registry.sessions.remove(&previous);
            self.events.forget(&previous);
            debug!(session_id = %previous, "superseded session dropped");
        }

        let mut session = Session::start(started_at);
        session.state = to;
        registry.active = Some(session.id.clone());
        registry.sessions.insert(session.id.clone(), session.clone());

        self.events.emit(
            &session.id,
            EventKind::StateChanged {
                from,
                to,
                trigger: Trigger::StartRequested,
                error: None,
            },
        );
        info!(session_id = %session.id, %from, %to, "session started");
        Ok(session)
    }

    /// Applies `transition` to the active session, whatever its id.
    pub fn apply_active(&self, transition: Transition) -> Result<Session, SessionStateError> {
        let mut registry = self.registry.lock();
        match registry.active.clone() {
            Some(session_id) => self.apply_locked(&mut registry, &session_id, transition),
            None => Err(SessionStateError::InvalidTransition {
                from: SessionState::Idle,
                trigger: transition.trigger(),
            }),
        }
    }

    /// Applies `transition` on behalf of `session_id`. Inputs for a session
    /// that is no longer active are rejected as stale.
    pub fn apply(
        &self,
        session_id: &SessionId,
        transition: Transition,
    ) -> Result<Session, SessionStateError> {
        let mut registry = self.registry.lock();
        self.apply_locked(&mut registry, session_id, transition)
    }

    fn apply_locked(
        &self,
        registry: &mut Registry,
        session_id: &SessionId,
        transition: Transition,
    ) -> Result<Session, SessionStateError> {
        let trigger = transition.trigger();
        if registry.active.as_ref() != Some(session_id) {
            warn!(%session_id, %trigger, "transition for stale session rejected");
            return Err(SessionStateError::StaleSession {
                session_id: session_id.clone(),
                trigger,
            });
        }
        let Some(session) = registry.sessions.get_mut(session_id) else {
            return Err(SessionStateError::NoActiveSession);
        };

        let from = session.state;
        let to = match from.apply(trigger) {
            Ok(to) => to,
            Err(error) => {
                warn!(%session_id, %error, "transition rejected");
                return Err(error);
            }
        };

        let mut failure = None;
        let mut result = None;
        match transition {
            Transition::Stop { at } => session.stopped_at = Some(at),
            Transition::AgentStopFailed(f)
            | Transition::UploadFailed(f)
            | Transition::ProcessingFailed(f)
            | Transition::RetrievalFailed(f) => {
                session.last_error = Some(f.clone());
                failure = Some(f);
            }
            Transition::ResultRetrieved(r) => {
                session.result = Some((*r).clone());
                result = Some(r);
            }
            Transition::AgentStopAcknowledged | Transition::ProcessingCompleted => {}
        }
        session.state = to;
        let snapshot = session.clone();

        self.events.emit(
            session_id,
            EventKind::StateChanged {
                from,
                to,
                trigger,
                error: failure.clone(),
            },
        );
        if let Some(result) = result {
            self.events
                .emit(session_id, EventKind::ResultReady { result });
        }
        if let Some(failure) = failure {
            self.events.emit(
                session_id,
                EventKind::Error {
                    reason: failure.reason,
                    message: failure.message,
                },
            );
        }

        info!(%session_id, %from, %to, %trigger, "session transitioned");
        Ok(snapshot)
    }

    /// Returns the active session to `Idle` and clears its error.
    pub fn reset(&self) -> Option<Session> {
        let mut registry = self.registry.lock();
        let session_id = registry.active.clone()?;
        let session = registry.sessions.get_mut(&session_id)?;
        let from = session.state;
        session.state = SessionState::Idle;
        session.last_error = None;
        let snapshot = session.clone();

        self.events.emit(
            &session_id,
            EventKind::StateChanged {
                from,
                to: SessionState::Idle,
                trigger: Trigger::Reset,
                error: None,
            },
        );
        info!(%session_id, %from, "session reset");
        Some(snapshot)
    }

    pub fn mark_degraded(&self, session_id: &SessionId) {
        let mut registry = self.registry.lock();
        if let Some(session) = registry.sessions.get_mut(session_id) {
            session.degraded = true;
        }
    }

    /// Publishes a progress event while the stop pipeline still owns `session_id`.
    pub fn progress(
        &self,
        session_id: &SessionId,
        stage: PipelineStage,
        status: StageStatus,
        message: impl Into<String>,
    ) -> Option<Event> {
        let registry = self.registry.lock();
        if registry.active.as_ref() != Some(session_id) || !registry.state().is_in_flight() {
            debug!(%session_id, %stage, "progress for abandoned pipeline dropped");
            return None;
        }
        Some(self.events.emit(
            session_id,
            EventKind::Progress {
                stage,
                status,
                message: message.into(),
            },
        ))
    }
}
