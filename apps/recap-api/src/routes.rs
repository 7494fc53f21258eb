use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use recap_kernel::RecapKernel;
use recap_protocol::{AgentStatus, Session, SessionId, SessionState, TransportError};
use recap_runtime::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub kernel: RecapKernel,
}

#[derive(Debug, Serialize)]
struct SessionSnapshot {
    state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
}

#[derive(Debug, Deserialize, Default)]
struct EventStreamQuery {
    session_id: Option<String>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_gateway(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            message: error.to_string(),
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(error: OrchestratorError) -> Self {
        let status = match &error {
            OrchestratorError::State(_) | OrchestratorError::Executor(_) => StatusCode::CONFLICT,
            OrchestratorError::Agent(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: error.to_string(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(error: TransportError) -> Self {
        Self::bad_gateway(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

pub fn build_router(kernel: RecapKernel) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/session", get(current_session))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/session/reset", post(reset_session))
        .route("/agent/status", get(agent_status))
        .route("/events/stream", get(stream_events))
        .with_state(AppState { kernel })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "recap-api"
    }))
}

fn snapshot(state: &AppState) -> SessionSnapshot {
    SessionSnapshot {
        state: state.kernel.state(),
        session: state.kernel.current_session(),
    }
}

async fn current_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    Json(snapshot(&state))
}

async fn start_session(State(state): State<AppState>) -> ApiResult<Json<Session>> {
    Ok(Json(state.kernel.start_session().await?))
}

/// Answers as soon as the session is `stopping`; progress arrives on the event stream.
async fn stop_session(State(state): State<AppState>) -> ApiResult<(StatusCode, Json<Session>)> {
    let session = state.kernel.stop_session()?;
    Ok((StatusCode::ACCEPTED, Json(session)))
}

async fn reset_session(State(state): State<AppState>) -> Json<SessionSnapshot> {
    state.kernel.reset();
    Json(snapshot(&state))
}

async fn agent_status(State(state): State<AppState>) -> ApiResult<Json<AgentStatus>> {
    Ok(Json(state.kernel.agent_status().await?))
}

async fn stream_events(
    Query(query): Query<EventStreamQuery>,
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id = query.session_id.map(SessionId::from);
    let mut subscription = state.kernel.subscribe_events();

    let stream = stream! {
        loop {
            match subscription.recv().await {
                Ok(event) => {
                    if session_id.as_ref().is_some_and(|id| *id != event.session_id) {
                        continue;
                    }
                    yield Ok(as_sse_event("recap.event", &event));
                }
                Err(RecvError::Lagged(skipped)) => {
                    let lag_payload = json!({ "skipped": skipped }).to_string();
                    yield Ok(Event::default().event("stream.lagged").data(lag_payload));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn as_sse_event(event_name: &str, event: &recap_protocol::Event) -> Event {
    let payload = serde_json::to_string(event)
        .unwrap_or_else(|error| json!({ "error": error.to_string() }).to_string());
    Event::default()
        .id(event.seq.to_string())
        .event(event_name)
        .data(payload)
}
