use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use recap_protocol::{AgentAck, AgentCommand, AgentPort, AgentReply, CommandKind, TransportError};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tracing::{debug, instrument, warn};

pub const DEFAULT_SOCKET_PATH: &str = "/tmp/flingoos_bridge.sock";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Replies longer than this are treated as protocol errors.
const MAX_REPLY_BYTES: usize = 1024 * 1024;

/// Talks to the collection agent over its Unix socket.
///
/// Every command opens a fresh connection, writes one JSON line, and reads one
/// JSON line back. Concurrent callers queue on `channel`; the timeout only
/// covers the exchange itself, not the time spent waiting in that queue.
#[derive(Debug)]
pub struct AgentClient {
    socket_path: PathBuf,
    timeout: Duration,
    channel: Mutex<()>,
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new(DEFAULT_SOCKET_PATH)
    }
}

impl AgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout: DEFAULT_TIMEOUT,
            channel: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn exchange(&self, command: &AgentCommand) -> Result<AgentAck, TransportError> {
        let kind = command.kind;
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|error| TransportError::Unreachable {
                kind,
                message: format!("{}: {error}", self.socket_path.display()),
            })?;
        let (read, write) = stream.into_split();
        let mut lines_out = FramedWrite::new(write, LinesCodec::new());
        let mut lines_in = FramedRead::new(read, LinesCodec::new_with_max_length(MAX_REPLY_BYTES));

        let request = command.to_wire(Utc::now()).to_string();
        lines_out
            .send(request)
            .await
            .map_err(|error| codec_error(kind, error))?;

        let line = match lines_in.next().await {
            Some(Ok(line)) => line,
            Some(Err(error)) => return Err(codec_error(kind, error)),
            None => {
                return Err(TransportError::Unreachable {
                    kind,
                    message: "agent closed the connection without replying".to_owned(),
                });
            }
        };

        let reply: AgentReply =
            serde_json::from_str(&line).map_err(|error| TransportError::Protocol {
                kind,
                message: error.to_string(),
            })?;
        reply.into_ack(kind)
    }
}

fn codec_error(kind: CommandKind, error: LinesCodecError) -> TransportError {
    match error {
        LinesCodecError::MaxLineLengthExceeded => TransportError::Protocol {
            kind,
            message: format!("reply exceeds {MAX_REPLY_BYTES} bytes"),
        },
        LinesCodecError::Io(error) => TransportError::Unreachable {
            kind,
            message: error.to_string(),
        },
    }
}

#[async_trait]
impl AgentPort for AgentClient {
    #[instrument(skip(self, command), fields(command = %command.kind))]
    async fn send(&self, command: AgentCommand) -> Result<AgentAck, TransportError> {
        let timeout = command.timeout.unwrap_or(self.timeout);
        let _channel = self.channel.lock().await;
        match tokio::time::timeout(timeout, self.exchange(&command)).await {
            Ok(Ok(ack)) => {
                debug!("agent acknowledged command");
                Ok(ack)
            }
            Ok(Err(error)) => {
                warn!(%error, "agent command failed");
                Err(error)
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "agent command timed out");
                Err(TransportError::Timeout {
                    kind: command.kind,
                    after: timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use anyhow::Result;
    use futures_util::{SinkExt, StreamExt};
    use recap_protocol::{AgentCommand, AgentPort, CommandKind, TransportError};
    use serde_json::{Value, json};
    use tokio::net::UnixListener;
    use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};

    use super::AgentClient;

    fn unique_socket(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!("{name}-{nanos}.sock"))
    }

    /// Serves each connection with `reply`, after `delay`.
    fn spawn_agent<F>(path: &PathBuf, delay: Duration, reply: F) -> Result<Arc<AtomicUsize>>
    where
        F: Fn(Value) -> Option<String> + Send + Sync + 'static,
    {
        let listener = UnixListener::bind(path)?;
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let reply = Arc::new(reply);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let reply = reply.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    let mut lines_in = FramedRead::new(read, LinesCodec::new());
                    let mut lines_out = FramedWrite::new(write, LinesCodec::new());
                    if let Some(Ok(line)) = lines_in.next().await {
                        counter.fetch_add(1, Ordering::SeqCst);
                        let request: Value = serde_json::from_str(&line).unwrap_or(Value::Null);
                        tokio::time::sleep(delay).await;
                        if let Some(answer) = reply(request) {
                            let _ = lines_out.send(answer).await;
                        }
                    }
                });
            }
        });
        Ok(served)
    }

    #[tokio::test]
    async fn sends_wire_command_and_parses_ack() -> Result<()> {
        let path = unique_socket("recap-agent-ack");
        spawn_agent(&path, Duration::ZERO, |request| {
            let echoed = request["command"].clone();
            let has_ts = request["timestamp"].is_f64();
            Some(json!({ "success": true, "data": { "echo": echoed, "ts": has_ts } }).to_string())
        })?;

        let client = AgentClient::new(&path);
        let ack = client.send(AgentCommand::stop()).await?;
        assert_eq!(ack.kind, CommandKind::Stop);
        assert_eq!(ack.data["echo"], "audio_stop");
        assert_eq!(ack.data["ts"], true);

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[tokio::test]
    async fn missing_socket_is_unreachable() -> Result<()> {
        let client = AgentClient::new(unique_socket("recap-agent-missing"));
        let err = client.send(AgentCommand::ping()).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Unreachable {
                kind: CommandKind::Ping,
                ..
            }
        ));
        assert!(!client.is_running().await);
        Ok(())
    }

    #[tokio::test]
    async fn slow_agent_times_out() -> Result<()> {
        let path = unique_socket("recap-agent-slow");
        spawn_agent(&path, Duration::from_millis(500), |_| {
            Some(json!({ "success": true }).to_string())
        })?;

        let client = AgentClient::new(&path).with_timeout(Duration::from_millis(50));
        let err = client.send(AgentCommand::stop()).await.unwrap_err();
        assert_eq!(
            err,
            TransportError::Timeout {
                kind: CommandKind::Stop,
                after: Duration::from_millis(50)
            }
        );

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_reply_is_a_protocol_error() -> Result<()> {
        let path = unique_socket("recap-agent-garbage");
        spawn_agent(&path, Duration::ZERO, |_| Some("not json".to_owned()))?;

        let err = AgentClient::new(&path)
            .send(AgentCommand::status())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Protocol { .. }));

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[tokio::test]
    async fn hangup_without_reply_is_unreachable() -> Result<()> {
        let path = unique_socket("recap-agent-hangup");
        spawn_agent(&path, Duration::ZERO, |_| None)?;

        let err = AgentClient::new(&path)
            .send(AgentCommand::start())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[tokio::test]
    async fn rejection_carries_agent_message() -> Result<()> {
        let path = unique_socket("recap-agent-reject");
        spawn_agent(&path, Duration::ZERO, |_| {
            Some(json!({ "success": false, "error": "audio device busy" }).to_string())
        })?;

        let err = AgentClient::new(&path)
            .send(AgentCommand::start())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::Rejected {
                kind: CommandKind::Start,
                message: "audio device busy".to_owned()
            }
        );

        let _ = std::fs::remove_file(path);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_callers_are_serialized() -> Result<()> {
        let path = unique_socket("recap-agent-serial");
        let served = spawn_agent(&path, Duration::from_millis(40), |_| {
            Some(json!({ "success": true }).to_string())
        })?;

        let client = Arc::new(AgentClient::new(&path).with_timeout(Duration::from_millis(100)));
        let started = tokio::time::Instant::now();
        let a = tokio::spawn({
            let client = client.clone();
            async move { client.send(AgentCommand::ping()).await }
        });
        let b = tokio::spawn({
            let client = client.clone();
            async move { client.send(AgentCommand::status()).await }
        });
        // Each exchange fits its own timeout even though together they exceed it.
        assert!(a.await?.is_ok());
        assert!(b.await?.is_ok());
        assert!(started.elapsed() >= Duration::from_millis(80));
        assert_eq!(served.load(Ordering::SeqCst), 2);

        let _ = std::fs::remove_file(path);
        Ok(())
    }
}
