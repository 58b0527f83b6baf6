// src/switchboard/mod.rs

pub mod agent;
pub mod agents;
pub mod callback;
pub mod classifier;
pub mod message;
pub mod orchestrator;
pub mod registry;
pub mod retriever;
pub mod storage;
pub mod stream;

// Export the main entry points here so callers reach them as
// switchboard::Orchestrator instead of switchboard::orchestrator::Orchestrator.
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError, RequestOptions};
