//! # recap-protocol: session orchestration contracts
//!
//! Shared types, event taxonomy, and collaborator ports for the recap
//! session engine. Every other crate in the workspace depends on this one.
//!
//! ## Module Overview
//!
//! - [`ids`]: Typed ID wrappers (SessionId, EventId, JobId, WorkflowId)
//! - [`session`]: Session, SessionState, Trigger and the transition table
//! - [`event`]: Event + EventKind, pipeline stage markers
//! - [`workflow`]: WorkflowResult and StepRecord (real and synthesized share one shape)
//! - [`job`]: ProcessingJobDescriptor and the bit-exact trigger document
//! - [`command`]: Agent IPC commands, replies, and status parsing
//! - [`ports`]: Collaborator boundaries (agent, processing pipeline, document store)
//! - [`error`]: Error taxonomy shared across crates

pub mod command;
pub mod error;
pub mod event;
pub mod ids;
pub mod job;
pub mod ports;
pub mod session;
pub mod workflow;

pub use command::{
    AgentAck, AgentCommand, AgentReply, AgentStatus, CommandKind, UploadProgress, UploadState,
};
pub use error::{
    DescriptorError, FallbackExhaustedError, ProcessingError, RetrievalError, SessionStateError,
    TransportError, UploadError,
};
pub use event::{Event, EventKind, PipelineStage, StageStatus};
pub use ids::{EventId, JobId, SeqNo, SessionId, WorkflowId};
pub use job::{
    DEFAULT_STAGES, ProcessingJobDescriptor, ProcessingOptions, TRIGGER_VERSION, TimeRange,
    TriggerDocument, TriggerOptions, TriggerSession, TriggerTimeRange,
};
pub use ports::{
    AgentPort, CollectionRef, DocumentStorePort, JobHandle, JobStatus, ProcessingPort,
    StoredDocument,
};
pub use session::{FailureReason, Session, SessionFailure, SessionState, Trigger};
pub use workflow::{StepRecord, WorkflowResult, WorkflowSource};
