//! The agent capability: the one interface every backend must satisfy.
//!
//! An [`Agent`] turns `(utterance, history)` into a reply. The orchestrator
//! treats agents opaquely: it never knows whether a reply came from a
//! hosted LLM, a remote function, or an ensemble of sub-agents. Identity
//! and per-agent behaviour (history persistence, streaming, callbacks,
//! retrieval, system-prompt overrides) live in [`AgentOptions`], which
//! every implementation exposes through [`Agent::options`].
//!
//! # Implementing an agent
//!
//! ```
//! use async_trait::async_trait;
//! use std::collections::HashMap;
//! use std::error::Error;
//! use switchboard::{Agent, AgentOptions, AgentOutput, ConversationMessage};
//!
//! struct EchoAgent {
//!     options: AgentOptions,
//! }
//!
//! #[async_trait]
//! impl Agent for EchoAgent {
//!     fn options(&self) -> &AgentOptions {
//!         &self.options
//!     }
//!
//!     async fn process_request(
//!         &self,
//!         input_text: &str,
//!         _user_id: &str,
//!         _session_id: &str,
//!         _chat_history: &[ConversationMessage],
//!         _additional_params: &HashMap<String, String>,
//!     ) -> Result<AgentOutput, Box<dyn Error + Send + Sync>> {
//!         Ok(AgentOutput::Message(ConversationMessage::assistant(
//!             input_text,
//!         )))
//!     }
//! }
//!
//! let agent = EchoAgent {
//!     options: AgentOptions::new("Echo Agent", "Repeats whatever it hears"),
//! };
//! assert_eq!(agent.id(), "echo-agent");
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::Stream;

use crate::switchboard::callback::AgentCallbacks;
use crate::switchboard::message::{ContentBlock, ConversationMessage};
use crate::switchboard::retriever::Retriever;
use crate::switchboard::stream::StreamReceiver;

/// Derive a stable agent id from a display name: keep ASCII letters,
/// whitespace and hyphens, collapse whitespace runs to a single hyphen,
/// and lowercase the result. The derivation is idempotent.
///
/// # Examples
///
/// ```
/// use switchboard::derive_agent_id;
///
/// assert_eq!(derive_agent_id("Tech Agent"), "tech-agent");
/// assert_eq!(derive_agent_id("Billing & Orders  Desk"), "billing-orders-desk");
/// assert_eq!(derive_agent_id(&derive_agent_id("Tech Agent")), "tech-agent");
/// ```
pub fn derive_agent_id(name: &str) -> String {
    let filtered: String = name
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || c.is_whitespace() || *c == '-')
        .collect();
    filtered
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .to_lowercase()
}

/// A system-prompt override: a template with `{{name}}` placeholders and
/// the variables to substitute. Placeholders without a matching variable
/// are left intact.
///
/// # Examples
///
/// ```
/// use switchboard::PromptTemplate;
///
/// let template = PromptTemplate::new("You are {{role}} in {{domain}}.")
///     .with_variable("role", "a travel planner");
/// assert_eq!(template.render(), "You are a travel planner in {{domain}}.");
/// ```
#[derive(Debug, Clone, Default)]
pub struct PromptTemplate {
    pub template: String,
    pub variables: HashMap<String, String>,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            variables: HashMap::new(),
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Substitute every `{{name}}` whose variable is known.
    pub fn render(&self) -> String {
        let mut out = self.template.clone();
        for (name, value) in &self.variables {
            out = out.replace(&format!("{{{{{}}}}}", name), value);
        }
        out
    }
}

/// Identity and universal per-agent behaviour.
///
/// Built with [`AgentOptions::new`] and the `with_*` builders. The id is
/// derived from the name via [`derive_agent_id`]; id collisions between
/// registered agents are a configuration error caught by the registry.
#[derive(Clone)]
pub struct AgentOptions {
    /// Stable identifier derived from `name`.
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// What this agent is good at. Fed verbatim to the classifier.
    pub description: String,
    /// Persist both sides of each exchange under this agent's key.
    pub save_chat: bool,
    /// Whether `process_request` replies with a token stream.
    pub streaming: bool,
    /// Mention this agent's history activity in operational logs.
    pub log_agent_chat: bool,
    /// Optional dispatch/stream observer.
    pub callbacks: Option<Arc<dyn AgentCallbacks>>,
    /// Optional retrieval collaborator the agent may consult.
    pub retriever: Option<Arc<dyn Retriever>>,
    /// Optional system-prompt override.
    pub custom_system_prompt: Option<PromptTemplate>,
}

impl AgentOptions {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: derive_agent_id(&name),
            name,
            description: description.into(),
            save_chat: true,
            streaming: false,
            log_agent_chat: false,
            callbacks: None,
            retriever: None,
            custom_system_prompt: None,
        }
    }

    pub fn with_save_chat(mut self, save_chat: bool) -> Self {
        self.save_chat = save_chat;
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    pub fn with_log_agent_chat(mut self, log_agent_chat: bool) -> Self {
        self.log_agent_chat = log_agent_chat;
        self
    }

    pub fn with_callbacks(mut self, callbacks: Arc<dyn AgentCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn with_custom_system_prompt(mut self, template: PromptTemplate) -> Self {
        self.custom_system_prompt = Some(template);
        self
    }
}

impl fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentOptions")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("description", &self.description)
            .field("save_chat", &self.save_chat)
            .field("streaming", &self.streaming)
            .field("log_agent_chat", &self.log_agent_chat)
            .field("callbacks", &self.callbacks.is_some())
            .field("retriever", &self.retriever.is_some())
            .field("custom_system_prompt", &self.custom_system_prompt)
            .finish()
    }
}

/// What an agent hands back from [`Agent::process_request`].
pub enum AgentOutput {
    /// A complete assistant turn.
    Message(ConversationMessage),
    /// A lazy token stream; see [`crate::switchboard::stream`].
    Stream(StreamReceiver),
}

impl fmt::Debug for AgentOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentOutput::Message(msg) => f.debug_tuple("Message").field(msg).finish(),
            AgentOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// A pluggable conversational capability.
///
/// Implementations must be thread-safe (`Send + Sync`) so the orchestrator
/// can dispatch to them from concurrent turns. All identity and behaviour
/// flags are read from [`Agent::options`]; the provided accessors exist so
/// call sites stay terse.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Identity and universal behaviour for this agent.
    fn options(&self) -> &AgentOptions;

    fn id(&self) -> &str {
        &self.options().id
    }

    fn name(&self) -> &str {
        &self.options().name
    }

    fn description(&self) -> &str {
        &self.options().description
    }

    fn save_chat(&self) -> bool {
        self.options().save_chat
    }

    fn is_streaming(&self) -> bool {
        self.options().streaming
    }

    fn log_agent_chat(&self) -> bool {
        self.options().log_agent_chat
    }

    fn callbacks(&self) -> Option<Arc<dyn AgentCallbacks>> {
        self.options().callbacks.clone()
    }

    fn retriever(&self) -> Option<Arc<dyn Retriever>> {
        self.options().retriever.clone()
    }

    /// Process one utterance given this agent's own history.
    ///
    /// Non-streaming agents return [`AgentOutput::Message`]; streaming
    /// agents return [`AgentOutput::Stream`] and feed events through the
    /// channel. Errors propagate to the orchestrator, which surfaces them
    /// as dispatch failures without persisting either side of the turn.
    async fn process_request(
        &self,
        input_text: &str,
        user_id: &str,
        session_id: &str,
        chat_history: &[ConversationMessage],
        additional_params: &HashMap<String, String>,
    ) -> Result<AgentOutput, Box<dyn Error + Send + Sync>>;
}

/// Caller-facing stream of reply fragments.
pub type ContentBlockStream =
    Pin<Box<dyn Stream<Item = Result<ContentBlock, Box<dyn Error + Send + Sync>>> + Send>>;

/// Identity of a routed request, echoed back in every [`AgentResponse`].
#[derive(Debug, Clone)]
pub struct RequestMetadata {
    pub agent_id: String,
    pub agent_name: String,
    pub user_input: String,
    pub user_id: String,
    pub session_id: String,
    pub additional_params: HashMap<String, String>,
}

/// Reply payload inside an [`AgentResponse`].
pub enum ResponseOutput {
    Message(ConversationMessage),
    Stream(ContentBlockStream),
}

impl ResponseOutput {
    /// The complete message, if this is a non-streaming reply.
    pub fn as_message(&self) -> Option<&ConversationMessage> {
        match self {
            ResponseOutput::Message(msg) => Some(msg),
            ResponseOutput::Stream(_) => None,
        }
    }
}

impl fmt::Debug for ResponseOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseOutput::Message(msg) => f.debug_tuple("Message").field(msg).finish(),
            ResponseOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Envelope returned from the orchestrator: which agent was selected, the
/// request identity, and the reply (complete or streaming).
#[derive(Debug)]
pub struct AgentResponse {
    pub metadata: RequestMetadata,
    pub output: ResponseOutput,
    pub streaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_agent_id_basic() {
        assert_eq!(derive_agent_id("Tech Agent"), "tech-agent");
        assert_eq!(derive_agent_id("travel"), "travel");
    }

    #[test]
    fn test_derive_agent_id_strips_and_collapses() {
        assert_eq!(derive_agent_id("Orders & Billing 24/7"), "orders-billing");
        assert_eq!(derive_agent_id("  spaced   out  "), "spaced-out");
        assert_eq!(derive_agent_id("Self-Service Desk"), "self-service-desk");
    }

    #[test]
    fn test_derive_agent_id_idempotent() {
        for name in ["Tech Agent", "A  B-C", "weird!!name##here"] {
            let once = derive_agent_id(name);
            assert_eq!(derive_agent_id(&once), once);
        }
    }

    #[test]
    fn test_prompt_template_unresolved_placeholders_survive() {
        let t = PromptTemplate::new("{{a}} and {{b}} and {{a}}").with_variable("a", "x");
        assert_eq!(t.render(), "x and {{b}} and x");
    }

    #[test]
    fn test_agent_options_defaults() {
        let options = AgentOptions::new("Travel Agent", "Books trips");
        assert_eq!(options.id, "travel-agent");
        assert!(options.save_chat);
        assert!(!options.streaming);
        assert!(!options.log_agent_chat);
        assert!(options.callbacks.is_none());
    }
}
