use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use recap_protocol::{
    AgentAck, AgentCommand, AgentPort, AgentReply, CommandKind, TransportError,
};
use serde_json::{Value, json};
use tracing::debug;

/// Upload steps a real agent walks through after `audio_stop`.
pub const UPLOAD_PHASES: [&str; 5] = [
    "Starting data flush...",
    "Uploading audio...",
    "Uploading screenshots...",
    "Uploading telemetry (mouse, keyboard, window changes)...",
    "Verifying uploads...",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reachability {
    Online,
    Offline,
    Rejecting,
    /// Accepts the connection but never answers.
    Hanging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadScript {
    Completes,
    Fails,
    Stuck,
}

#[derive(Debug, Default)]
struct AgentState {
    recording: bool,
    upload_cursor: Option<usize>,
    log: Vec<CommandKind>,
}

type CommandObserver = Arc<dyn Fn(CommandKind) + Send + Sync>;

/// In-process stand-in for the collection agent.
///
/// Answers the same commands as the real agent and walks through the same
/// upload phases, one per `status` poll.
pub struct SimulatedAgent {
    latency: Duration,
    timeout: Duration,
    device_id: String,
    org_id: String,
    reachability: Reachability,
    upload: UploadScript,
    observer: Option<CommandObserver>,
    state: Mutex<AgentState>,
}

impl std::fmt::Debug for SimulatedAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedAgent")
            .field("latency", &self.latency)
            .field("device_id", &self.device_id)
            .field("org_id", &self.org_id)
            .field("reachability", &self.reachability)
            .field("upload", &self.upload)
            .finish_non_exhaustive()
    }
}

impl Default for SimulatedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAgent {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(50),
            timeout: crate::DEFAULT_TIMEOUT,
            device_id: "SIMULATED-DEVICE-0001".to_owned(),
            org_id: "local".to_owned(),
            reachability: Reachability::Online,
            upload: UploadScript::Completes,
            observer: None,
            state: Mutex::new(AgentState::default()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// How long a hanging agent keeps callers waiting before they give up.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_identity(mut self, org_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self.device_id = device_id.into();
        self
    }

    pub fn offline(mut self) -> Self {
        self.reachability = Reachability::Offline;
        self
    }

    pub fn rejecting(mut self) -> Self {
        self.reachability = Reachability::Rejecting;
        self
    }

    pub fn hanging(mut self) -> Self {
        self.reachability = Reachability::Hanging;
        self
    }

    pub fn with_failed_upload(mut self) -> Self {
        self.upload = UploadScript::Fails;
        self
    }

    pub fn with_stuck_upload(mut self) -> Self {
        self.upload = UploadScript::Stuck;
        self
    }

    /// Called with each command kind before it is handled.
    pub fn with_observer(mut self, observer: impl Fn(CommandKind) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Commands received so far, in arrival order.
    pub fn commands(&self) -> Vec<CommandKind> {
        self.state.lock().log.clone()
    }

    pub fn is_recording(&self) -> bool {
        self.state.lock().recording
    }

    fn handle(&self, kind: CommandKind) -> AgentReply {
        let mut state = self.state.lock();
        match kind {
            CommandKind::Ping => AgentReply::ok(json!({ "pong": true })),
            CommandKind::Start => {
                if state.recording {
                    return AgentReply::refused("already recording");
                }
                state.recording = true;
                state.upload_cursor = None;
                AgentReply::ok(json!({ "recording": true }))
            }
            CommandKind::Stop => {
                state.recording = false;
                state.upload_cursor = Some(0);
                AgentReply::ok(json!({ "recording": false }))
            }
            CommandKind::Status => {
                let upload = self.upload_block(&mut state);
                let mut data = json!({
                    "device_id": self.device_id,
                    "org_id": self.org_id,
                    "recording": state.recording,
                });
                if let (Some(upload), Value::Object(map)) = (upload, &mut data) {
                    map.insert("upload".to_owned(), upload);
                }
                AgentReply::ok(data)
            }
        }
    }

    fn upload_block(&self, state: &mut AgentState) -> Option<Value> {
        let cursor = state.upload_cursor?;
        if let Some(phase) = UPLOAD_PHASES.get(cursor) {
            state.upload_cursor = Some(cursor + 1);
            return Some(json!({ "state": "uploading", "phase": phase }));
        }
        match self.upload {
            UploadScript::Completes => Some(json!({ "state": "complete" })),
            UploadScript::Fails => Some(json!({
                "state": "failed",
                "error": "screenshot upload rejected by storage"
            })),
            UploadScript::Stuck => Some(json!({
                "state": "uploading",
                "phase": UPLOAD_PHASES[UPLOAD_PHASES.len() - 1]
            })),
        }
    }
}

#[async_trait]
impl AgentPort for SimulatedAgent {
    async fn send(&self, command: AgentCommand) -> Result<AgentAck, TransportError> {
        let kind = command.kind;
        self.state.lock().log.push(kind);
        if let Some(observer) = &self.observer {
            observer(kind);
        }

        match self.reachability {
            Reachability::Offline => {
                return Err(TransportError::Unreachable {
                    kind,
                    message: "connection refused".to_owned(),
                });
            }
            Reachability::Hanging => {
                let after = command.timeout.unwrap_or(self.timeout);
                tokio::time::sleep(after).await;
                return Err(TransportError::Timeout { kind, after });
            }
            Reachability::Rejecting if kind != CommandKind::Ping => {
                tokio::time::sleep(self.latency).await;
                return AgentReply::refused("collectors unavailable").into_ack(kind);
            }
            _ => {}
        }

        tokio::time::sleep(self.latency).await;
        let reply = self.handle(kind);
        debug!(command = %kind, success = reply.success, "simulated agent replied");
        reply.into_ack(kind)
    }
}
