//! Fan-out ensemble: every sub-agent answers the same utterance at once.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::switchboard::agent::{Agent, AgentOptions, AgentOutput};
use crate::switchboard::message::ConversationMessage;

const DEFAULT_PARALLEL_OUTPUT: &str = "No output generated by the ensemble.";

/// Dispatches the utterance to every sub-agent in parallel and combines
/// the replies into one assistant turn, one `"<name>: <text>"` section
/// per sub-agent in registration order.
///
/// Sub-agents must be non-streaming; a streaming reply is replaced with
/// the default output. A sub-agent error fails the whole ensemble.
pub struct ParallelAgent {
    options: AgentOptions,
    agents: Vec<Arc<dyn Agent>>,
    default_output: String,
}

impl ParallelAgent {
    pub fn new(
        options: AgentOptions,
        agents: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if agents.is_empty() {
            return Err("ParallelAgent requires at least one sub-agent".into());
        }
        Ok(Self {
            options,
            agents,
            default_output: DEFAULT_PARALLEL_OUTPUT.to_string(),
        })
    }

    /// Override the text substituted for empty or streaming sub-replies.
    pub fn with_default_output(mut self, text: impl Into<String>) -> Self {
        self.default_output = text.into();
        self
    }
}

#[async_trait]
impl Agent for ParallelAgent {
    fn options(&self) -> &AgentOptions {
        &self.options
    }

    async fn process_request(
        &self,
        input_text: &str,
        user_id: &str,
        session_id: &str,
        chat_history: &[ConversationMessage],
        additional_params: &HashMap<String, String>,
    ) -> Result<AgentOutput, Box<dyn Error + Send + Sync>> {
        let mut tasks = Vec::new();
        for agent in &self.agents {
            let agent = Arc::clone(agent);
            let input = input_text.to_string();
            let user_id = user_id.to_string();
            let session_id = session_id.to_string();
            let history = chat_history.to_vec();
            let params = additional_params.clone();

            tasks.push(tokio::spawn(async move {
                let result = agent
                    .process_request(&input, &user_id, &session_id, &history, &params)
                    .await;
                (agent.id().to_string(), agent.name().to_string(), result)
            }));
        }

        let mut sections = Vec::new();
        for task in tasks {
            let (agent_id, agent_name, result) = task.await.map_err(|e| {
                Box::<dyn Error + Send + Sync>::from(format!("task join error: {}", e))
            })?;

            let text = match result {
                Ok(AgentOutput::Message(message)) => match message.first_text() {
                    Some(t) if !t.is_empty() => t.to_string(),
                    _ => {
                        log::warn!("sub-agent '{}' returned no text content", agent_id);
                        self.default_output.clone()
                    }
                },
                Ok(AgentOutput::Stream(_)) => {
                    log::warn!(
                        "sub-agent '{}' replied with a stream; streaming is not supported inside an ensemble",
                        agent_id
                    );
                    self.default_output.clone()
                }
                Err(e) => {
                    return Err(format!("sub-agent '{}' failed: {}", agent_id, e).into());
                }
            };
            sections.push(format!("{}: {}", agent_name, text));
        }

        Ok(AgentOutput::Message(ConversationMessage::assistant(
            sections.join("\n\n"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switchboard::stream::stream_channel;

    struct FixedAgent {
        options: AgentOptions,
        reply: Option<String>,
        streaming_reply: bool,
    }

    impl FixedAgent {
        fn replying(name: &str, reply: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                options: AgentOptions::new(name, "fixed"),
                reply: Some(reply.to_string()),
                streaming_reply: false,
            })
        }

        fn silent(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                options: AgentOptions::new(name, "fixed"),
                reply: None,
                streaming_reply: false,
            })
        }

        fn streaming(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                options: AgentOptions::new(name, "fixed").with_streaming(true),
                reply: None,
                streaming_reply: true,
            })
        }
    }

    #[async_trait]
    impl Agent for FixedAgent {
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
            if self.streaming_reply {
                let (_tx, rx) = stream_channel();
                return Ok(AgentOutput::Stream(rx));
            }
            match &self.reply {
                Some(text) => Ok(AgentOutput::Message(ConversationMessage::assistant(text))),
                None => Ok(AgentOutput::Message(ConversationMessage::new(
                    crate::switchboard::message::ParticipantRole::Assistant,
                    vec![],
                ))),
            }
        }
    }

    #[test]
    fn test_requires_at_least_one_sub_agent() {
        assert!(ParallelAgent::new(AgentOptions::new("Ensemble", "combines"), vec![]).is_err());
    }

    #[tokio::test]
    async fn test_combines_replies_in_registration_order() {
        let ensemble = ParallelAgent::new(
            AgentOptions::new("Ensemble", "combines"),
            vec![
                FixedAgent::replying("First", "alpha"),
                FixedAgent::replying("Second", "beta"),
            ],
        )
        .unwrap();

        let output = ensemble
            .process_request("q", "u", "s", &[], &HashMap::new())
            .await
            .unwrap();
        match output {
            AgentOutput::Message(message) => {
                assert_eq!(message.first_text(), Some("First: alpha\n\nSecond: beta"));
            }
            AgentOutput::Stream(_) => panic!("expected a message"),
        }
    }

    #[tokio::test]
    async fn test_empty_and_streaming_replies_fall_back_to_default() {
        let ensemble = ParallelAgent::new(
            AgentOptions::new("Ensemble", "combines"),
            vec![FixedAgent::silent("Quiet"), FixedAgent::streaming("Streamy")],
        )
        .unwrap()
        .with_default_output("(nothing)");

        let output = ensemble
            .process_request("q", "u", "s", &[], &HashMap::new())
            .await
            .unwrap();
        match output {
            AgentOutput::Message(message) => {
                assert_eq!(
                    message.first_text(),
                    Some("Quiet: (nothing)\n\nStreamy: (nothing)")
                );
            }
            AgentOutput::Stream(_) => panic!("expected a message"),
        }
    }
}
