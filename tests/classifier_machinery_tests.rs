//! Drives the default classifier prompt machinery through a fake
//! structured back-end, the way a hosted-LLM classifier would use it.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use switchboard::switchboard::classifier::{
    analyze_prompt_tool_schema, build_classifier_prompt, selection_from_value,
    ANALYZE_PROMPT_TOOL_NAME,
};
use switchboard::{
    Agent, AgentOptions, AgentOutput, AgentRegistry, Classifier, ClassifierResult,
    ConversationMessage, Orchestrator, OrchestratorConfig, RequestOptions,
};

struct CannedAgent {
    options: AgentOptions,
}

impl CannedAgent {
    fn new(name: &str, description: &str) -> Arc<Self> {
        Arc::new(Self {
            options: AgentOptions::new(name, description),
        })
    }
}

#[async_trait]
impl Agent for CannedAgent {
    fn options(&self) -> &AgentOptions {
        &self.options
    }

    async fn process_request(
        &self,
        _input_text: &str,
        _user_id: &str,
        _session_id: &str,
        _chat_history: &[ConversationMessage],
        _additional_params: &HashMap<String, String>,
    ) -> Result<AgentOutput, Box<dyn Error + Send + Sync>> {
        Ok(AgentOutput::Message(ConversationMessage::assistant(
            format!("handled by {}", self.id()),
        )))
    }
}

/// Stands in for a hosted model with function calling: composes the real
/// system prompt, then "returns" a canned structured payload which is
/// decoded by the shared machinery.
struct FakeStructuredBackend {
    payload: serde_json::Value,
}

#[async_trait]
impl Classifier for FakeStructuredBackend {
    async fn classify(
        &self,
        _input_text: &str,
        registry: &AgentRegistry,
        chat_history: &[ConversationMessage],
    ) -> Result<ClassifierResult, Box<dyn Error + Send + Sync>> {
        let prompt = build_classifier_prompt(registry, chat_history);
        // A real back-end would send `prompt` plus the analyzePrompt tool
        // schema; here we only check the pieces line up.
        assert!(prompt.contains("<agents>"));
        assert_eq!(ANALYZE_PROMPT_TOOL_NAME, "analyzePrompt");
        assert!(analyze_prompt_tool_schema()["properties"]["confidence"].is_object());

        selection_from_value(&self.payload, registry)
    }
}

fn build_orchestrator(payload: serde_json::Value) -> Orchestrator {
    let config = OrchestratorConfig {
        max_retries: 0,
        use_default_agent_if_none_identified: true,
        ..OrchestratorConfig::default()
    };
    let mut orchestrator = Orchestrator::new(config)
        .with_classifier(Arc::new(FakeStructuredBackend { payload }));
    orchestrator
        .add_agent(CannedAgent::new("Tech", "technical support"))
        .unwrap();
    orchestrator
        .add_agent(CannedAgent::new("Travel", "trip planning"))
        .unwrap();
    orchestrator.set_default_agent("travel").unwrap();
    orchestrator
}

#[tokio::test]
async fn test_structured_selection_routes_to_named_agent() {
    switchboard::init_logger();

    let orchestrator = build_orchestrator(serde_json::json!({
        "userinput": "my laptop is broken",
        "selected_agent": "tech",
        "confidence": 0.87
    }));

    let response = orchestrator
        .route_request("my laptop is broken", "u", "s", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata.agent_id, "tech");
}

#[tokio::test]
async fn test_unknown_selection_falls_back_to_default() {
    let orchestrator = build_orchestrator(serde_json::json!({
        "userinput": "hello",
        "selected_agent": "billing",
        "confidence": 0.9
    }));

    let response = orchestrator
        .route_request("hello", "u", "s", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata.agent_id, "travel");
}

#[tokio::test]
async fn test_malformed_payload_is_a_hard_failure() {
    // With retries exhausted, a malformed payload becomes a terminal
    // assistant message rather than a dispatch.
    let orchestrator = build_orchestrator(serde_json::json!({
        "userinput": "hello",
        "selected_agent": "tech",
        "confidence": "very"
    }));

    let response = orchestrator
        .route_request("hello", "u", "s", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(response.metadata.agent_id, "no-agent-selected");
    assert!(!response.streaming);
}
