//! Collection agent transport.
//!
//! - [`AgentClient`] speaks newline-delimited JSON over the agent's Unix socket.
//! - [`UploadWatcher`] waits for the post-stop upload to be confirmed.
//! - [`SimulatedAgent`] answers the same protocol in-process.

mod client;
pub mod simulated;
mod upload;

pub use client::{AgentClient, DEFAULT_SOCKET_PATH, DEFAULT_TIMEOUT};
pub use simulated::SimulatedAgent;
pub use upload::UploadWatcher;
