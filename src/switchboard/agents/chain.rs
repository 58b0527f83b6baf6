//! Sequential pipeline: each sub-agent receives the previous reply as its
//! input; the last sub-agent's reply is the result.

use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;

use crate::switchboard::agent::{Agent, AgentOptions, AgentOutput};
use crate::switchboard::message::ConversationMessage;

const DEFAULT_CHAIN_OUTPUT: &str = "No output generated by the chain.";

pub struct ChainAgent {
    options: AgentOptions,
    agents: Vec<Arc<dyn Agent>>,
    default_output: String,
}

impl ChainAgent {
    pub fn new(
        options: AgentOptions,
        agents: Vec<Arc<dyn Agent>>,
    ) -> Result<Self, Box<dyn Error + Send + Sync>> {
        if agents.is_empty() {
            return Err("ChainAgent requires at least one sub-agent".into());
        }
        Ok(Self {
            options,
            agents,
            default_output: DEFAULT_CHAIN_OUTPUT.to_string(),
        })
    }

    /// Override the text used when a sub-agent produces no text.
    pub fn with_default_output(mut self, text: impl Into<String>) -> Self {
        self.default_output = text.into();
        self
    }
}

#[async_trait]
impl Agent for ChainAgent {
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
        let mut current = input_text.to_string();
        let mut last_message: Option<ConversationMessage> = None;

        for agent in &self.agents {
            let output = agent
                .process_request(&current, user_id, session_id, chat_history, additional_params)
                .await
                .map_err(|e| {
                    Box::<dyn Error + Send + Sync>::from(format!(
                        "sub-agent '{}' failed: {}",
                        agent.id(),
                        e
                    ))
                })?;

            match output {
                AgentOutput::Message(message) => {
                    current = match message.first_text() {
                        Some(text) if !text.is_empty() => text.to_string(),
                        _ => {
                            log::warn!("sub-agent '{}' returned no text content", agent.id());
                            self.default_output.clone()
                        }
                    };
                    last_message = Some(message);
                }
                AgentOutput::Stream(_) => {
                    return Err(format!(
                        "sub-agent '{}' replied with a stream; streaming is not supported inside a chain",
                        agent.id()
                    )
                    .into());
                }
            }
        }

        Ok(AgentOutput::Message(last_message.unwrap_or_else(|| {
            ConversationMessage::assistant(self.default_output.clone())
        })))
    }
}
