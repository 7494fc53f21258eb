//! Session lifecycle: states, triggers, and the transition table.

use crate::error::SessionStateError;
use crate::ids::SessionId;
use crate::workflow::WorkflowResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Stopping,
    Processing,
    Retrieving,
    Ready,
    Failed,
}

impl SessionState {
    pub const ALL: [SessionState; 7] = [
        SessionState::Idle,
        SessionState::Recording,
        SessionState::Stopping,
        SessionState::Processing,
        SessionState::Retrieving,
        SessionState::Ready,
        SessionState::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Stopping => "stopping",
            Self::Processing => "processing",
            Self::Retrieving => "retrieving",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// States from which a new session may be started.
    pub fn accepts_start(&self) -> bool {
        matches!(self, Self::Idle | Self::Ready | Self::Failed)
    }

    /// States in which the background pipeline owns the session.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Stopping | Self::Processing | Self::Retrieving)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }

    /// Applies `trigger` to the current state.
    ///
    /// This is the whole lifecycle table; anything not listed is rejected and
    /// the caller keeps its current state.
    pub fn apply(self, trigger: Trigger) -> Result<SessionState, SessionStateError> {
        use SessionState::*;
        use Trigger::*;

        match (self, trigger) {
            (_, Reset) => Ok(Idle),
            (Idle | Ready | Failed, StartRequested) => Ok(Recording),
            (Recording, StopRequested) => Ok(Stopping),
            (Stopping, AgentStopAcknowledged) => Ok(Processing),
            (Stopping, AgentStopFailed) => Ok(Failed),
            (Processing, UploadFailed) => Ok(Failed),
            (Processing, ProcessingCompleted) => Ok(Retrieving),
            (Processing, ProcessingFailed) => Ok(Failed),
            (Retrieving, ResultRetrieved) => Ok(Ready),
            (Retrieving, RetrievalFailed) => Ok(Failed),
            (from, trigger) => Err(SessionStateError::InvalidTransition { from, trigger }),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs that drive the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    StartRequested,
    StopRequested,
    AgentStopAcknowledged,
    AgentStopFailed,
    UploadFailed,
    ProcessingCompleted,
    ProcessingFailed,
    ResultRetrieved,
    RetrievalFailed,
    Reset,
}

impl Trigger {
    pub const ALL: [Trigger; 10] = [
        Trigger::StartRequested,
        Trigger::StopRequested,
        Trigger::AgentStopAcknowledged,
        Trigger::AgentStopFailed,
        Trigger::UploadFailed,
        Trigger::ProcessingCompleted,
        Trigger::ProcessingFailed,
        Trigger::ResultRetrieved,
        Trigger::RetrievalFailed,
        Trigger::Reset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartRequested => "start_requested",
            Self::StopRequested => "stop_requested",
            Self::AgentStopAcknowledged => "agent_stop_acknowledged",
            Self::AgentStopFailed => "agent_stop_failed",
            Self::UploadFailed => "upload_failed",
            Self::ProcessingCompleted => "processing_completed",
            Self::ProcessingFailed => "processing_failed",
            Self::ResultRetrieved => "result_retrieved",
            Self::RetrievalFailed => "retrieval_failed",
            Self::Reset => "reset",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AgentUnreachable,
    AgentRejected,
    UploadFailed,
    ProcessingFailed,
    RetrievalFailed,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentUnreachable => "agent_unreachable",
            Self::AgentRejected => "agent_rejected",
            Self::UploadFailed => "upload_failed",
            Self::ProcessingFailed => "processing_failed",
            Self::RetrievalFailed => "retrieval_failed",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl SessionFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// A single recording session and everything the orchestrator knows about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<SessionFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WorkflowResult>,
    /// Set once any pipeline stage fell back to a degraded path.
    #[serde(default)]
    pub degraded: bool,
}

impl Session {
    /// A freshly started session, already in `Recording`.
    pub fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new_uuid(),
            state: SessionState::Recording,
            started_at,
            stopped_at: None,
            last_error: None,
            result: None,
            degraded: false,
        }
    }
}
