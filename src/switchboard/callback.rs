//! Callback surface for dispatch observability and token streaming.
//!
//! Implement [`AgentCallbacks`] to be notified when an agent starts and
//! finishes handling a turn, and (for streaming agents) as each token
//! arrives. All methods have default no-op implementations, so an
//! implementor only overrides what it cares about. Handlers are shared as
//! `Arc<dyn AgentCallbacks>` and must therefore synchronise any internal
//! state themselves.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::switchboard::message::ConversationMessage;

/// Context handed to [`AgentCallbacks::on_agent_start`].
#[derive(Debug, Clone)]
pub struct AgentStartPayload {
    pub agent_id: String,
    pub agent_name: String,
    /// The user utterance being dispatched.
    pub input: String,
    /// The agent-scoped history the agent will see.
    pub messages: Vec<ConversationMessage>,
    pub additional_params: HashMap<String, String>,
    pub user_id: String,
    pub session_id: String,
}

/// Context handed to [`AgentCallbacks::on_agent_end`].
#[derive(Debug, Clone)]
pub struct AgentEndPayload {
    pub agent_id: String,
    pub agent_name: String,
    /// The assistant turn the agent produced (assembled, for streams).
    pub response: ConversationMessage,
    pub messages: Vec<ConversationMessage>,
    /// Whatever [`AgentCallbacks::on_agent_start`] returned for this turn.
    pub tracking: serde_json::Value,
}

/// Observer for agent dispatch lifecycle and streamed tokens.
#[async_trait]
pub trait AgentCallbacks: Send + Sync {
    /// Called immediately before an agent is dispatched. The returned
    /// value is threaded through to [`on_agent_end`](Self::on_agent_end)
    /// as `tracking`, letting implementors correlate the two without
    /// external state.
    async fn on_agent_start(&self, _payload: &AgentStartPayload) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Called after the agent's reply is complete. For streaming agents
    /// this fires once the stream has been fully consumed.
    async fn on_agent_end(&self, _payload: &AgentEndPayload) {}

    /// Called for every token produced by a streaming agent.
    async fn on_llm_new_token(&self, _token: &str) {}
}
