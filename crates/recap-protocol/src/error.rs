//! Error taxonomy for session orchestration.

use crate::command::CommandKind;
use crate::ids::SessionId;
use crate::session::{SessionState, Trigger};
use std::time::Duration;
use thiserror::Error;

/// Failures talking to the local collection agent.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("agent did not answer {kind} within {after:?}")]
    Timeout { kind: CommandKind, after: Duration },
    #[error("agent unreachable for {kind}: {message}")]
    Unreachable { kind: CommandKind, message: String },
    #[error("malformed agent reply to {kind}: {message}")]
    Protocol { kind: CommandKind, message: String },
    #[error("agent rejected {kind}: {message}")]
    Rejected { kind: CommandKind, message: String },
}

impl TransportError {
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Timeout { kind, .. }
            | Self::Unreachable { kind, .. }
            | Self::Protocol { kind, .. }
            | Self::Rejected { kind, .. } => *kind,
        }
    }

    /// True when the agent answered but refused the command.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// Rejected state-machine inputs. State is unchanged when one of these is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionStateError {
    #[error("invalid transition: {trigger} is not allowed from {from}")]
    InvalidTransition { from: SessionState, trigger: Trigger },
    #[error("stale session {session_id}: {trigger} ignored")]
    StaleSession {
        session_id: SessionId,
        trigger: Trigger,
    },
    #[error("no active session")]
    NoActiveSession,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("processing descriptor has an empty stage set")]
    EmptyStages,
    #[error("processing time range is empty: start {start} is not before end {end}")]
    EmptyTimeRange { start: String, end: String },
    #[error("processing descriptor is missing {0}")]
    MissingIdentity(&'static str),
}

/// Failures reported by the processing pipeline collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessingError {
    #[error(transparent)]
    InvalidDescriptor(#[from] DescriptorError),
    #[error("processing submission failed: {0}")]
    Submission(String),
    #[error("processing job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },
    #[error("processing status unavailable: {0}")]
    Unavailable(String),
}

/// Why the primary document-store lookup produced nothing usable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RetrievalError {
    #[error("document store not configured")]
    NotConfigured,
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document store permission denied: {0}")]
    PermissionDenied(String),
    #[error("collection {0} is empty")]
    Empty(String),
    #[error("document store query timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed document {id}: {message}")]
    Malformed { id: String, message: String },
}

/// Both the primary lookup and the synthesizer failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("no workflow result could be produced: {reason}")]
pub struct FallbackExhaustedError {
    pub reason: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UploadError {
    #[error("agent reported upload failure: {0}")]
    Failed(String),
    #[error("upload not confirmed within {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_error_reports_its_command() {
        let err = TransportError::Timeout {
            kind: CommandKind::Stop,
            after: Duration::from_secs(5),
        };
        assert_eq!(err.kind(), CommandKind::Stop);
        assert_eq!(err.to_string(), "agent did not answer audio_stop within 5s");
        assert!(!err.is_rejection());
    }

    #[test]
    fn descriptor_error_converts_into_processing_error() {
        let err: ProcessingError = DescriptorError::EmptyStages.into();
        assert_eq!(err.to_string(), "processing descriptor has an empty stage set");
    }
}
