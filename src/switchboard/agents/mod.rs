//! Composite agents that own sub-agents and compose through the same
//! capability interface, so the orchestrator needs no special handling
//! for them.

pub mod chain;
pub mod parallel;

pub use chain::ChainAgent;
pub use parallel::ParallelAgent;
