//! The classifier contract and its default prompt machinery.
//!
//! A classifier looks at one utterance plus the merged cross-agent history
//! and proposes which registered agent should handle the turn, with a
//! confidence in `[0, 1]`. Concrete back-ends (hosted LLMs, local models)
//! live outside this crate; what lives here is everything they share:
//!
//! - the system-prompt template that enumerates agents as
//!   `"<id>:<name>:<description>"` lines and embeds recent history,
//! - the `analyzePrompt` structured-selection schema
//!   (`{userinput, selected_agent, confidence}`) back-ends register as a
//!   tool/function call,
//! - [`selection_from_value`], which turns a raw structured payload into a
//!   [`ClassifierResult`]: unknown agent ids become "no selection",
//!   confidence is clamped, and a missing or non-numeric confidence is a
//!   hard failure for the attempt.
//!
//! Back-ends may override their own choice from history (for example
//! "continue with the previous agent"); the template below instructs the
//! model accordingly, and the orchestrator stays out of it.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::switchboard::agent::{Agent, PromptTemplate};
use crate::switchboard::message::ConversationMessage;
use crate::switchboard::registry::AgentRegistry;

/// How many merged-history messages the default prompt embeds, newest
/// last. Keeps classifier prompts bounded on long sessions.
pub const CLASSIFIER_HISTORY_LIMIT: usize = 20;

/// Tool name back-ends register for the structured selection.
pub const ANALYZE_PROMPT_TOOL_NAME: &str = "analyzePrompt";

const CLASSIFIER_PROMPT_TEMPLATE: &str = "\
You are AgentMatcher, an intelligent assistant designed to analyze user \
queries and match them with the most suitable agent. Your task is to \
understand the request, identify key entities and intents, and determine \
which agent would be best equipped to handle the query.

Important: the user's input may be a follow-up to a previous interaction. \
The conversation history, including the id of the previously selected \
agent, is provided below. If the input appears to continue the previous \
conversation (for example \"yes\", \"ok\", \"tell me more\", or a bare \
number), select the same agent as before.

The available agents are listed one per line as id:name:description.

<agents>
{{AGENT_DESCRIPTIONS}}
</agents>

Guidelines:
- Pick exactly one agent id from the list, or the literal string \
\"unknown\" when no agent fits.
- Confidence is a number between 0 and 1. Use high values for clear \
requests or clear follow-ups, low values for vague requests that could \
match several agents.
- Report your selection through the analyzePrompt tool with fields \
userinput, selected_agent and confidence.

Here is the conversation history to take into account:

<history>
{{HISTORY}}
</history>";

/// The classifier's verdict for one turn.
///
/// A `None` agent means "no selection"; confidence attached to a missing
/// agent carries no meaning.
#[derive(Clone)]
pub struct ClassifierResult {
    pub selected_agent: Option<Arc<dyn Agent>>,
    pub confidence: f64,
}

impl ClassifierResult {
    pub fn selected(agent: Arc<dyn Agent>, confidence: f64) -> Self {
        Self {
            selected_agent: Some(agent),
            confidence,
        }
    }

    pub fn none() -> Self {
        Self {
            selected_agent: None,
            confidence: 0.0,
        }
    }
}

impl fmt::Debug for ClassifierResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierResult")
            .field(
                "selected_agent",
                &self.selected_agent.as_ref().map(|a| a.id().to_string()),
            )
            .field("confidence", &self.confidence)
            .finish()
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    /// Select an agent for `input_text` given the merged history. The
    /// registry supplies the candidate set; ids outside it must come back
    /// as "no selection". Structural failures (back-end unavailable,
    /// malformed structured output, missing fields) are errors and subject
    /// to the orchestrator's retry policy.
    async fn classify(
        &self,
        input_text: &str,
        registry: &AgentRegistry,
        chat_history: &[ConversationMessage],
    ) -> Result<ClassifierResult, Box<dyn Error + Send + Sync>>;
}

/// One `"<id>:<name>:<description>"` line per registered agent, in
/// registration order.
pub fn format_agent_descriptions(registry: &AgentRegistry) -> String {
    registry
        .list()
        .iter()
        .map(|agent| format!("{}:{}:{}", agent.id(), agent.name(), agent.description()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the most recent `limit` history messages as `"role: text"`
/// lines. Assistant lines already carry their `[agent_id]` tag from the
/// merged view.
pub fn format_chat_history(history: &[ConversationMessage], limit: usize) -> String {
    let start = history.len().saturating_sub(limit);
    history[start..]
        .iter()
        .map(|msg| format!("{}: {}", msg.role, msg.first_text().unwrap_or_default()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Compose the default classifier system prompt for this registry and
/// history.
pub fn build_classifier_prompt(
    registry: &AgentRegistry,
    chat_history: &[ConversationMessage],
) -> String {
    PromptTemplate::new(CLASSIFIER_PROMPT_TEMPLATE)
        .with_variable("AGENT_DESCRIPTIONS", format_agent_descriptions(registry))
        .with_variable(
            "HISTORY",
            format_chat_history(chat_history, CLASSIFIER_HISTORY_LIMIT),
        )
        .render()
}

/// JSON Schema for the `analyzePrompt` tool back-ends register to obtain
/// a structured selection.
pub fn analyze_prompt_tool_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "userinput": {
                "type": "string",
                "description": "The original user input"
            },
            "selected_agent": {
                "type": "string",
                "description": "The id of the selected agent"
            },
            "confidence": {
                "type": "number",
                "description": "Confidence level between 0 and 1"
            }
        },
        "required": ["userinput", "selected_agent", "confidence"]
    })
}

/// Interpret a structured `analyzePrompt` payload.
///
/// Unknown or empty agent ids (including the literal `"unknown"`) yield a
/// result with no selection. Confidence is clamped into `[0, 1]`; a
/// missing or non-numeric confidence is an error, as is a missing
/// `selected_agent` field.
pub fn selection_from_value(
    value: &serde_json::Value,
    registry: &AgentRegistry,
) -> Result<ClassifierResult, Box<dyn Error + Send + Sync>> {
    let selected = value
        .get("selected_agent")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Box::<dyn Error + Send + Sync>::from(
                "structured selection is missing the selected_agent field",
            )
        })?;

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| {
            Box::<dyn Error + Send + Sync>::from(
                "structured selection carries a missing or non-numeric confidence",
            )
        })?
        .clamp(0.0, 1.0);

    let selected_agent = match selected {
        "" | "unknown" => None,
        id => registry.get_agent(id),
    };

    Ok(ClassifierResult {
        selected_agent,
        confidence,
    })
}
