//! Commands and replies exchanged with the local collection agent.
//!
//! The wire format is one JSON object per line in each direction:
//!
//! ```text
//! -> {"command": "audio_stop", "timestamp": 1724245689.066}
//! <- {"success": true, "data": {...}}
//! ```

use crate::error::TransportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "status")]
    Status,
    #[serde(rename = "audio_start")]
    Start,
    #[serde(rename = "audio_stop")]
    Stop,
}

impl CommandKind {
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Start => "audio_start",
            Self::Stop => "audio_stop",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

/// An immutable request to the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentCommand {
    pub kind: CommandKind,
    pub payload: Option<Map<String, Value>>,
    /// Overrides the client's default timeout when set.
    pub timeout: Option<Duration>,
}

impl AgentCommand {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            payload: None,
            timeout: None,
        }
    }

    pub fn ping() -> Self {
        Self::new(CommandKind::Ping)
    }

    pub fn status() -> Self {
        Self::new(CommandKind::Status)
    }

    pub fn start() -> Self {
        Self::new(CommandKind::Start)
    }

    pub fn stop() -> Self {
        Self::new(CommandKind::Stop)
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Renders the request line body. Payload keys never shadow `command` or `timestamp`.
    pub fn to_wire(&self, sent_at: DateTime<Utc>) -> Value {
        let mut body = Map::new();
        if let Some(payload) = &self.payload {
            for (key, value) in payload {
                body.insert(key.clone(), value.clone());
            }
        }
        body.insert(
            "command".to_owned(),
            Value::String(self.kind.wire_name().to_owned()),
        );
        let timestamp = sent_at.timestamp_micros() as f64 / 1_000_000.0;
        body.insert("timestamp".to_owned(), Value::from(timestamp));
        Value::Object(body)
    }
}

/// Raw reply line from the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AgentReply {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn refused(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_ack(self, kind: CommandKind) -> Result<AgentAck, TransportError> {
        if self.success {
            Ok(AgentAck {
                kind,
                data: self.data.unwrap_or(Value::Null),
            })
        } else {
            Err(TransportError::Rejected {
                kind,
                message: self
                    .error
                    .unwrap_or_else(|| "agent returned success=false".to_owned()),
            })
        }
    }
}

/// A successful agent reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentAck {
    pub kind: CommandKind,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Idle,
    Uploading,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub state: UploadState,
    /// Human-readable step the agent is on, e.g. "Uploading screenshots...".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The `data` object of a `status` reply. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadProgress>,
}

impl AgentStatus {
    pub fn from_ack(ack: &AgentAck) -> Result<Self, TransportError> {
        if ack.data.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(ack.data.clone()).map_err(|error| TransportError::Protocol {
            kind: ack.kind,
            message: format!("unexpected status shape: {error}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn wire_body_carries_command_and_timestamp() {
        let sent_at = Utc.timestamp_millis_opt(1_724_245_689_066).unwrap();
        let mut payload = Map::new();
        payload.insert("command".to_owned(), json!("spoofed"));
        payload.insert("reason".to_owned(), json!("user"));
        let body = AgentCommand::stop().with_payload(payload).to_wire(sent_at);

        assert_eq!(body["command"], "audio_stop");
        assert_eq!(body["reason"], "user");
        let ts = body["timestamp"].as_f64().unwrap();
        assert!((ts - 1_724_245_689.066).abs() < 1e-6);
    }

    #[test]
    fn refused_reply_becomes_rejection() {
        let err = AgentReply::refused("collectors busy")
            .into_ack(CommandKind::Start)
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Rejected {
                kind: CommandKind::Start,
                message: "collectors busy".to_owned()
            }
        );
    }

    #[test]
    fn status_reply_parses_identity_and_upload() {
        let reply: AgentReply = serde_json::from_value(json!({
            "success": true,
            "data": {
                "device_id": "DESKTOP-40770579",
                "org_id": "diligent4",
                "upload": { "state": "uploading", "phase": "Uploading audio..." },
                "uptime": 42
            }
        }))
        .unwrap();
        let ack = reply.into_ack(CommandKind::Status).unwrap();
        let status = AgentStatus::from_ack(&ack).unwrap();
        assert_eq!(status.device_id.as_deref(), Some("DESKTOP-40770579"));
        assert_eq!(status.org_id.as_deref(), Some("diligent4"));
        let upload = status.upload.unwrap();
        assert_eq!(upload.state, UploadState::Uploading);
        assert_eq!(upload.phase.as_deref(), Some("Uploading audio..."));
    }

    #[test]
    fn status_with_wrong_types_is_a_protocol_error() {
        let ack = AgentAck {
            kind: CommandKind::Status,
            data: json!({ "device_id": 17 }),
        };
        let err = AgentStatus::from_ack(&ack).unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));
    }
}
