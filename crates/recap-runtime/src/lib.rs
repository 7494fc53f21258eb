//! Session runtime.
//!
//! - [`SessionStateMachine`] is the only writer of session state and emits
//!   `state_changed` under the same lock as the transition.
//! - [`StopPipeline`] runs the ordered stop stages in the background.
//! - [`BackgroundTaskExecutor`] owns those background runs.
//! - [`SessionOrchestrator`] is the control surface that ties them together.

mod config;
mod executor;
mod machine;
mod orchestrator;
mod pipeline;

pub use config::RuntimeConfig;
pub use executor::{BackgroundTaskExecutor, ExecutorError};
pub use machine::{SessionStateMachine, Transition};
pub use orchestrator::{OrchestratorError, SessionOrchestrator};
pub use pipeline::StopPipeline;
