use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use recap_protocol::{
    CollectionRef, DocumentStorePort, FallbackExhaustedError, RetrievalError, WorkflowResult,
};
use tracing::{info, instrument, warn};

use crate::mapping::map_document;
use crate::rng::SelectionRng;
use crate::synth::WorkflowSynthesizer;

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_LIMIT: usize = 100;

/// Why a result was synthesized instead of read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackCause {
    Retrieval(RetrievalError),
    /// Processing never produced output, so the store was not consulted.
    ProcessingDegraded(String),
}

impl fmt::Display for FallbackCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retrieval(error) => write!(f, "{error}"),
            Self::ProcessingDegraded(reason) => write!(f, "processing degraded: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Primary {
        result: WorkflowResult,
        candidates: usize,
    },
    Fallback {
        result: WorkflowResult,
        cause: FallbackCause,
    },
}

impl RetrievalOutcome {
    pub fn result(&self) -> &WorkflowResult {
        match self {
            Self::Primary { result, .. } | Self::Fallback { result, .. } => result,
        }
    }

    pub fn into_result(self) -> WorkflowResult {
        match self {
            Self::Primary { result, .. } | Self::Fallback { result, .. } => result,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Reads a recent real workflow, or synthesizes one when that is not possible.
///
/// A missing store, an empty collection, a refused or slow query, and an
/// unmappable document all lead to the synthesizer. Only the synthesizer
/// itself failing is an error.
#[derive(Clone)]
pub struct ResultFallbackChain {
    store: Option<Arc<dyn DocumentStorePort>>,
    synthesizer: WorkflowSynthesizer,
    rng: Arc<SelectionRng>,
    query_timeout: Duration,
    limit: usize,
}

impl ResultFallbackChain {
    pub fn new(store: Option<Arc<dyn DocumentStorePort>>, rng: Arc<SelectionRng>) -> Self {
        Self {
            store,
            synthesizer: WorkflowSynthesizer::default(),
            rng,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: WorkflowSynthesizer) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    async fn primary(
        &self,
        collection: &CollectionRef,
    ) -> Result<(WorkflowResult, usize), RetrievalError> {
        let store = self.store.as_ref().ok_or(RetrievalError::NotConfigured)?;
        let documents = tokio::time::timeout(
            self.query_timeout,
            store.list_recent(collection, self.limit),
        )
        .await
        .map_err(|_| RetrievalError::Timeout(self.query_timeout))??;

        let index = self
            .rng
            .index(documents.len())
            .ok_or_else(|| RetrievalError::Empty(collection.to_string()))?;
        let result = map_document(&documents[index])?;
        Ok((result, documents.len()))
    }

    #[instrument(skip(self), fields(collection = %collection))]
    pub async fn fetch_outcome(
        &self,
        collection: &CollectionRef,
    ) -> Result<RetrievalOutcome, FallbackExhaustedError> {
        match self.primary(collection).await {
            Ok((result, candidates)) => {
                info!(
                    workflow_id = %result.workflow_id,
                    document_ref = %result.document_ref,
                    candidates,
                    "workflow retrieved from document store"
                );
                Ok(RetrievalOutcome::Primary { result, candidates })
            }
            Err(error) => {
                warn!(%error, "document store lookup failed, synthesizing workflow");
                self.synthesize(collection, FallbackCause::Retrieval(error))
            }
        }
    }

    pub async fn fetch_recent(
        &self,
        collection: &CollectionRef,
    ) -> Result<WorkflowResult, FallbackExhaustedError> {
        self.fetch_outcome(collection)
            .await
            .map(RetrievalOutcome::into_result)
    }

    /// Skips the store and goes straight to the synthesizer.
    pub fn synthesize(
        &self,
        collection: &CollectionRef,
        cause: FallbackCause,
    ) -> Result<RetrievalOutcome, FallbackExhaustedError> {
        let result = self.synthesizer.synthesize(&self.rng, collection)?;
        info!(
            workflow_id = %result.workflow_id,
            %cause,
            "synthesized workflow served"
        );
        Ok(RetrievalOutcome::Fallback { result, cause })
    }
}
