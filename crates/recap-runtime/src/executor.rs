use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use recap_protocol::SessionId;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("a stop pipeline is already running for session {0}")]
    AlreadyRunning(SessionId),
}

/// Owns the lifetimes of background pipeline runs, one per session.
///
/// It has no authority over session state; the futures it runs go through
/// the state machine like any other caller.
#[derive(Clone, Debug, Default)]
pub struct BackgroundTaskExecutor {
    tasks: Arc<Mutex<HashMap<SessionId, JoinHandle<()>>>>,
}

impl BackgroundTaskExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run<F>(&self, session_id: SessionId, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        if tasks.contains_key(&session_id) {
            return Err(ExecutorError::AlreadyRunning(session_id));
        }
        debug!(%session_id, "background run spawned");
        tasks.insert(session_id, tokio::spawn(task));
        Ok(())
    }

    /// Waits for the run of `session_id`. Returns false when there was none.
    pub async fn wait(&self, session_id: &SessionId) -> bool {
        let Some(handle) = self.tasks.lock().remove(session_id) else {
            return false;
        };
        if let Err(error) = handle.await {
            warn!(%session_id, %error, "background run ended abnormally");
        }
        true
    }

    pub fn in_flight(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.len()
    }
}
