//! Events published to observers.
//!
//! Every event carries a per-session `seq` starting at 1 so observers can
//! detect dropped or reordered delivery.

use crate::ids::{EventId, SeqNo, SessionId};
use crate::session::{FailureReason, SessionFailure, SessionState, Trigger};
use crate::workflow::WorkflowResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub session_id: SessionId,
    pub seq: SeqNo,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(session_id: SessionId, seq: SeqNo, kind: EventKind) -> Self {
        Self {
            event_id: EventId::new_uuid(),
            session_id,
            seq,
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    StateChanged {
        from: SessionState,
        to: SessionState,
        trigger: Trigger,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<SessionFailure>,
    },
    Progress {
        stage: PipelineStage,
        status: StageStatus,
        message: String,
    },
    ResultReady {
        result: Box<WorkflowResult>,
    },
    Error {
        reason: FailureReason,
        message: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::ResultReady { .. } => "result_ready",
            Self::Error { .. } => "error",
        }
    }

    /// Target state when this is a `state_changed` event.
    pub fn entered_state(&self) -> Option<SessionState> {
        match self {
            Self::StateChanged { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Ordered stages of the stop pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    StopAgent,
    ConfirmUpload,
    BuildDescriptor,
    Process,
    Retrieve,
}

impl PipelineStage {
    pub const ORDER: [PipelineStage; 5] = [
        PipelineStage::StopAgent,
        PipelineStage::ConfirmUpload,
        PipelineStage::BuildDescriptor,
        PipelineStage::Process,
        PipelineStage::Retrieve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StopAgent => "stop_agent",
            Self::ConfirmUpload => "confirm_upload",
            Self::BuildDescriptor => "build_descriptor",
            Self::Process => "process",
            Self::Retrieve => "retrieve",
        }
    }

    /// Progress line shown while the stage runs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::StopAgent => "Stopping collection agent...",
            Self::ConfirmUpload => "Verifying uploads...",
            Self::BuildDescriptor => "Generating processing trigger...",
            Self::Process => "Processing workflow (stages A-F)...",
            Self::Retrieve => "Retrieving processed workflow...",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Started,
    /// Intermediate report inside a running stage.
    Running,
    Completed,
    /// The stage finished on a fallback path.
    Degraded,
    Failed,
}
