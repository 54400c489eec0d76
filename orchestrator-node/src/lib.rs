//! Orchestrator Node library
//!
//! Houses the REST/WebSocket control surface and process configuration
//! for the network orchestrator binary. The control-plane logic itself
//! lives in `orchestrator-core`; this crate only wires it to the network.

pub mod api;
pub mod config;
pub mod ws;

pub use api::{router, AppState};
pub use config::OrchestratorNodeConfig;
pub use ws::{EventBroadcaster, EventType};
