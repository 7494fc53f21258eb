//! Collaborator ports.
//!
//! These traits are the only boundary between the orchestration engine and
//! the outside world: the local collection agent, the remote processing
//! pipeline, and the document store holding processed workflows.
//!
//! Object-safety note:
//! - Traits use `async-trait` for async dyn-dispatch.
//! - Implementations are shared as `Arc<dyn Port>`.

use crate::command::{AgentAck, AgentCommand, AgentStatus};
use crate::error::{ProcessingError, RetrievalError, TransportError};
use crate::ids::{JobId, SessionId};
use crate::job::TriggerDocument;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[async_trait]
pub trait AgentPort: Send + Sync {
    /// Sends one command and waits for its reply.
    async fn send(&self, command: AgentCommand) -> Result<AgentAck, TransportError>;

    async fn status(&self) -> Result<AgentStatus, TransportError> {
        let ack = self.send(AgentCommand::status()).await?;
        AgentStatus::from_ack(&ack)
    }

    async fn is_running(&self) -> bool {
        self.send(AgentCommand::ping()).await.is_ok()
    }
}

/// Reference to a job accepted by the processing pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub job_id: JobId,
    pub session_id: SessionId,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
    Completed {
        /// Document path where the pipeline wrote its output.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        firestore_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        workflow_id: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

#[async_trait]
pub trait ProcessingPort: Send + Sync {
    async fn submit(
        &self,
        session_id: &SessionId,
        trigger: &TriggerDocument,
    ) -> Result<JobHandle, ProcessingError>;

    async fn poll(&self, handle: &JobHandle) -> Result<JobStatus, ProcessingError>;
}

/// Path of a document collection, e.g.
/// `organizations/diligent4/published/meta/workflows_versions`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionRef(String);

impl CollectionRef {
    pub const DEFAULT_TEMPLATE: &'static str =
        "organizations/{org_id}/published/meta/workflows_versions";

    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into().trim_matches('/').to_owned())
    }

    /// Expands `{org_id}` in `template`.
    pub fn from_template(template: &str, org_id: &str) -> Self {
        Self::new(template.replace("{org_id}", org_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn document_path(&self, document_id: &str) -> String {
        format!("{}/{}", self.0, document_id)
    }
}

impl fmt::Display for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A document as returned by a store, with its fields decoded to plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,
    pub path: String,
    pub fields: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait DocumentStorePort: Send + Sync {
    /// Lists up to `limit` recent documents from `collection`.
    async fn list_recent(
        &self,
        collection: &CollectionRef,
        limit: usize,
    ) -> Result<Vec<StoredDocument>, RetrievalError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AgentReply, CommandKind};
    use serde_json::json;

    struct ScriptedAgent;

    #[async_trait]
    impl AgentPort for ScriptedAgent {
        async fn send(&self, command: AgentCommand) -> Result<AgentAck, TransportError> {
            match command.kind {
                CommandKind::Status => {
                    AgentReply::ok(json!({ "device_id": "dev-9", "org_id": "acme" }))
                        .into_ack(command.kind)
                }
                kind => Err(TransportError::Unreachable {
                    kind,
                    message: "no socket".to_owned(),
                }),
            }
        }
    }

    #[tokio::test]
    async fn default_status_parses_reply_data() {
        let status = ScriptedAgent.status().await.unwrap();
        assert_eq!(status.device_id.as_deref(), Some("dev-9"));
        assert!(!ScriptedAgent.is_running().await);
    }

    #[test]
    fn collection_template_expands_org() {
        let collection = CollectionRef::from_template(CollectionRef::DEFAULT_TEMPLATE, "diligent4");
        assert_eq!(
            collection.as_str(),
            "organizations/diligent4/published/meta/workflows_versions"
        );
        assert_eq!(
            collection.document_path("wf1"),
            "organizations/diligent4/published/meta/workflows_versions/wf1"
        );
    }

    #[test]
    fn job_status_reads_pipeline_shape() {
        let status: JobStatus = serde_json::from_value(json!({
            "status": "completed",
            "firestore_path": "organizations/acme/workflows/s1",
            "workflow_id": "wf-1"
        }))
        .unwrap();
        assert!(status.is_finished());
        let queued: JobStatus = serde_json::from_value(json!({ "status": "queued" })).unwrap();
        assert_eq!(queued, JobStatus::Queued);
    }
}
