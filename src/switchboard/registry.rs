//! Deterministic agent-id to agent map with a designated default.
//!
//! Registration order is preserved: classifier prompts enumerate agents in
//! the order they were added, so selection behaviour is reproducible run
//! to run.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

use crate::switchboard::agent::Agent;

/// Errors raised while configuring the registry.
#[derive(Debug, Clone)]
pub enum RegistryError {
    /// An agent with this id is already registered.
    DuplicateAgentId(String),
    /// No agent with this id is registered.
    UnknownAgentId(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateAgentId(id) => {
                write!(f, "agent with id '{}' already exists", id)
            }
            RegistryError::UnknownAgentId(id) => write!(f, "no agent with id '{}'", id),
        }
    }
}

impl Error for RegistryError {}

/// Holds every registered agent for the process lifetime.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
    agent_order: Vec<String>,
    default_agent_id: Option<String>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent. Duplicate ids are a configuration error.
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) -> Result<(), RegistryError> {
        let id = agent.id().to_string();
        if self.agents.contains_key(&id) {
            return Err(RegistryError::DuplicateAgentId(id));
        }
        self.agent_order.push(id.clone());
        self.agents.insert(id, agent);
        Ok(())
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(id).cloned()
    }

    /// Mark a registered agent as the fallback used when selection
    /// reconciliation opts into the default.
    pub fn set_default(&mut self, id: &str) -> Result<(), RegistryError> {
        if !self.agents.contains_key(id) {
            return Err(RegistryError::UnknownAgentId(id.to_string()));
        }
        self.default_agent_id = Some(id.to_string());
        Ok(())
    }

    pub fn default_agent(&self) -> Option<Arc<dyn Agent>> {
        self.default_agent_id
            .as_deref()
            .and_then(|id| self.get_agent(id))
    }

    /// Agents in registration order.
    pub fn list(&self) -> Vec<Arc<dyn Agent>> {
        self.agent_order
            .iter()
            .filter_map(|id| self.agents.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.agent_order)
            .field("default_agent_id", &self.default_agent_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::switchboard::agent::{AgentOptions, AgentOutput};
    use crate::switchboard::message::ConversationMessage;
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;

    struct StubAgent {
        options: AgentOptions,
    }

    impl StubAgent {
        fn new(name: &str) -> Arc<dyn Agent> {
            Arc::new(Self {
                options: AgentOptions::new(name, "stub"),
            })
        }
    }

    #[async_trait]
    impl Agent for StubAgent {
        fn options(&self) -> &AgentOptions {
            &self.options
        }

        async fn process_request(
            &self,
            input_text: &str,
            _user_id: &str,
            _session_id: &str,
            _chat_history: &[ConversationMessage],
            _additional_params: &StdHashMap<String, String>,
        ) -> Result<AgentOutput, Box<dyn Error + Send + Sync>> {
            Ok(AgentOutput::Message(ConversationMessage::assistant(
                input_text,
            )))
        }
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut registry = AgentRegistry::new();
        registry.add_agent(StubAgent::new("Tech")).unwrap();
        let err = registry.add_agent(StubAgent::new("Tech")).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateAgentId(id) if id == "tech"));
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut registry = AgentRegistry::new();
        registry.add_agent(StubAgent::new("Bravo")).unwrap();
        registry.add_agent(StubAgent::new("Alpha")).unwrap();
        let ids: Vec<_> = registry.list().iter().map(|a| a.id().to_string()).collect();
        assert_eq!(ids, vec!["bravo", "alpha"]);
    }

    #[test]
    fn test_default_agent_must_exist() {
        let mut registry = AgentRegistry::new();
        assert!(registry.set_default("missing").is_err());
        registry.add_agent(StubAgent::new("Travel")).unwrap();
        registry.set_default("travel").unwrap();
        assert_eq!(registry.default_agent().unwrap().id(), "travel");
    }
}
