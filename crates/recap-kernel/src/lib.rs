mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use recap_agent::{AgentClient, SimulatedAgent};
use recap_events::EventBroadcaster;
use recap_forge::{HttpForge, ProcessingCoordinator, SimulatedForge, TriggerArchive};
use recap_protocol::{
    AgentPort, AgentStatus, DocumentStorePort, Event, ProcessingPort, Session, SessionId,
    SessionState, TransportError,
};
use recap_runtime::{OrchestratorError, SessionOrchestrator};
use recap_store::{
    FileDocumentStore, RestDocumentStore, ResultFallbackChain, SelectionRng,
};
use tokio::sync::broadcast;
use tracing::{info, instrument};

pub use config::{
    AgentConfig, AgentMode, ENV_PREFIX, FallbackConfig, ProcessingConfig, ProcessingMode,
    RecapConfig, ServiceConfig, SessionConfig, StoreBackend, StoreConfig,
};

/// Wires collaborators from [`RecapConfig`], with per-port overrides for
/// tests and embedding.
#[derive(Clone, Default)]
pub struct KernelBuilder {
    config: RecapConfig,
    agent: Option<Arc<dyn AgentPort>>,
    processing: Option<Arc<dyn ProcessingPort>>,
    document_store: Option<Arc<dyn DocumentStorePort>>,
    seed: Option<u64>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: RecapConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn agent(mut self, agent: Arc<dyn AgentPort>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn processing(mut self, processing: Arc<dyn ProcessingPort>) -> Self {
        self.processing = Some(processing);
        self
    }

    pub fn document_store(mut self, store: Arc<dyn DocumentStorePort>) -> Self {
        self.document_store = Some(store);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    fn build_agent(&self) -> Arc<dyn AgentPort> {
        if let Some(agent) = &self.agent {
            return agent.clone();
        }
        let agent = &self.config.agent;
        let timeout = Duration::from_millis(agent.timeout_ms);
        match agent.mode {
            AgentMode::Socket => {
                Arc::new(AgentClient::new(agent.socket_path.clone()).with_timeout(timeout))
            }
            AgentMode::Simulated => Arc::new(
                SimulatedAgent::new()
                    .with_latency(Duration::from_millis(agent.simulated_latency_ms))
                    .with_timeout(timeout),
            ),
        }
    }

    fn build_processing(&self) -> Result<Arc<dyn ProcessingPort>> {
        if let Some(processing) = &self.processing {
            return Ok(processing.clone());
        }
        let processing = &self.config.processing;
        Ok(match processing.mode {
            ProcessingMode::Simulated => Arc::new(SimulatedForge::new(Duration::from_millis(
                processing.simulated_delay_ms,
            ))),
            ProcessingMode::Http => {
                let base_url = processing
                    .base_url
                    .clone()
                    .context("processing.base_url is required when processing.mode = \"http\"")?;
                let forge = HttpForge::new(
                    base_url,
                    Duration::from_millis(processing.request_timeout_ms),
                )
                .context("failed to build processing HTTP client")?;
                Arc::new(forge)
            }
        })
    }

    fn build_document_store(&self) -> Result<Option<Arc<dyn DocumentStorePort>>> {
        if let Some(store) = &self.document_store {
            return Ok(Some(store.clone()));
        }
        let store = &self.config.store;
        Ok(match store.backend {
            StoreBackend::None => None,
            StoreBackend::File => {
                let root = store
                    .root
                    .clone()
                    .context("store.root is required when store.backend = \"file\"")?;
                Some(Arc::new(FileDocumentStore::new(root)))
            }
            StoreBackend::Rest => {
                let base_url = store
                    .base_url
                    .clone()
                    .context("store.base_url is required when store.backend = \"rest\"")?;
                let mut rest = RestDocumentStore::new(base_url, Duration::from_millis(store.timeout_ms))
                    .context("failed to build document store HTTP client")?;
                if let Some(token) = &store.bearer_token {
                    rest = rest.with_bearer_token(token.clone());
                }
                Some(Arc::new(rest))
            }
        })
    }

    pub fn build(self) -> Result<RecapKernel> {
        let agent = self.build_agent();
        let processing = self.build_processing()?;
        let store = self.build_document_store()?;

        let mut coordinator = ProcessingCoordinator::new(processing)
            .with_poll_interval(Duration::from_millis(self.config.processing.poll_ms));
        if let Some(dir) = &self.config.processing.trigger_dir {
            coordinator = coordinator.with_archive(TriggerArchive::new(dir.clone()));
        }

        let rng = SelectionRng::from_seed_option(self.seed.or(self.config.fallback.seed));
        let results = ResultFallbackChain::new(store, Arc::new(rng))
            .with_query_timeout(Duration::from_millis(self.config.store.timeout_ms))
            .with_limit(self.config.store.limit);

        let events = EventBroadcaster::new(self.config.service.event_capacity);
        let orchestrator = SessionOrchestrator::new(
            self.config.runtime_config(),
            agent,
            coordinator,
            results,
            events,
        );
        info!(
            agent_mode = ?self.config.agent.mode,
            processing_mode = ?self.config.processing.mode,
            store_backend = ?self.config.store.backend,
            "recap kernel built"
        );

        Ok(RecapKernel {
            orchestrator,
            config: Arc::new(self.config),
        })
    }
}

#[derive(Clone)]
pub struct RecapKernel {
    orchestrator: SessionOrchestrator,
    config: Arc<RecapConfig>,
}

impl RecapKernel {
    pub fn config(&self) -> &RecapConfig {
        &self.config
    }

    #[instrument(skip(self))]
    pub async fn start_session(&self) -> Result<Session, OrchestratorError> {
        self.orchestrator.start_session().await
    }

    #[instrument(skip(self))]
    pub fn stop_session(&self) -> Result<Session, OrchestratorError> {
        self.orchestrator.stop_session()
    }

    pub fn reset(&self) -> Option<Session> {
        self.orchestrator.reset()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.orchestrator.current_session()
    }

    pub fn state(&self) -> SessionState {
        self.orchestrator.state()
    }

    pub async fn agent_status(&self) -> Result<AgentStatus, TransportError> {
        self.orchestrator.agent_status().await
    }

    pub async fn ping_agent(&self) -> bool {
        self.orchestrator.ping().await
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.orchestrator.subscribe()
    }

    pub fn events(&self) -> &EventBroadcaster {
        self.orchestrator.events()
    }

    pub async fn wait_for_pipeline(&self, session_id: &SessionId) -> bool {
        self.orchestrator.wait_for_pipeline(session_id).await
    }
}
