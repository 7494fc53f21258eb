//! Workflow result retrieval.
//!
//! [`ResultFallbackChain`] reads a recent published workflow through a
//! [`DocumentStorePort`](recap_protocol::DocumentStorePort) and falls back to
//! [`WorkflowSynthesizer`] whenever that lookup cannot produce a result.

mod chain;
pub mod mapping;
mod rest;
mod rng;
mod stores;
mod synth;

pub use chain::{
    DEFAULT_LIMIT, DEFAULT_QUERY_TIMEOUT, FallbackCause, ResultFallbackChain, RetrievalOutcome,
};
pub use rest::{RestDocumentStore, decode_fields, decode_value};
pub use rng::SelectionRng;
pub use stores::{FileDocumentStore, StaticDocumentStore};
pub use synth::{WorkflowSynthesizer, WorkflowTemplate, builtin_templates};
