// src/lib.rs

// Import the top-level `switchboard` module.
pub mod switchboard;

// Re-exporting key items for easier external access, so integrations can
// write `switchboard::Orchestrator` without walking the module tree.

pub use switchboard::agent::{
    derive_agent_id, Agent, AgentOptions, AgentOutput, AgentResponse, ContentBlockStream,
    PromptTemplate, RequestMetadata, ResponseOutput,
};
pub use switchboard::agents::{ChainAgent, ParallelAgent};
pub use switchboard::callback::{AgentCallbacks, AgentEndPayload, AgentStartPayload};
pub use switchboard::classifier::{Classifier, ClassifierResult};
pub use switchboard::message::{
    ContentBlock, ConversationMessage, ParticipantRole, TimestampedMessage,
};
pub use switchboard::orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorError, RequestOptions,
};
pub use switchboard::registry::AgentRegistry;
pub use switchboard::retriever::{RetrievalResult, Retriever};
pub use switchboard::storage::{ChatStorage, InMemoryChatStorage, SqliteChatStorage};
pub use switchboard::stream::{stream_channel, StreamEvent, StreamReceiver, StreamSender};

/// Initialise env_logger for tests and examples. Safe to call more than
/// once; later calls are no-ops.
pub fn init_logger() {
    let _ = env_logger::try_init();
}
