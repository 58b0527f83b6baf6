//! The routing engine: classify, select, dispatch, persist, reply.
//!
//! [`Orchestrator::route_request`] is the single entry point for a turn.
//! It reads the merged cross-agent history, asks the [`Classifier`] which
//! agent should handle the utterance (retrying hard failures), reconciles
//! the answer against the registry's default, dispatches to the chosen
//! agent with that agent's own history, persists both sides of the
//! exchange, and returns an [`AgentResponse`] envelope describing the
//! selection and output.
//!
//! A turn moves through these stages:
//!
//! ```text
//! RECEIVED -> CLASSIFYING -> (RETRYING)* -> SELECTED | NO_SELECTION | CLASSIFIER_FAILED
//!   SELECTED -> DISPATCHING -> (STREAMING?) -> PERSISTING -> DONE | DISPATCH_FAILED
//! ```
//!
//! `NO_SELECTION` and `CLASSIFIER_FAILED` return fabricated terminal
//! assistant messages without dispatching or persisting anything.
//! Dispatch failures surface as [`OrchestratorError::Dispatch`] and leave
//! storage untouched. Storage faults never fail a turn: reads degrade to
//! an empty history, writes are logged and swallowed so the reply still
//! reaches the caller.
//!
//! The orchestrator itself is stateless across turns; everything is keyed
//! by `(user_id, session_id, agent_id)` and independent turns may run
//! concurrently. The storage back-end is the only shared mutable state.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::{Orchestrator, OrchestratorConfig, RequestOptions};
//! # use switchboard::{Classifier};
//! # async fn demo(classifier: Arc<dyn Classifier>) -> Result<(), Box<dyn std::error::Error>> {
//! let mut orchestrator =
//!     Orchestrator::new(OrchestratorConfig::default()).with_classifier(classifier);
//! // orchestrator.add_agent(...)?;
//! // orchestrator.set_default_agent("travel")?;
//!
//! let response = orchestrator
//!     .route_request("hello", "user-1", "session-1", RequestOptions::default())
//!     .await?;
//! println!("handled by {}", response.metadata.agent_id);
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::switchboard::agent::{
    Agent, AgentOutput, AgentResponse, ContentBlockStream, RequestMetadata, ResponseOutput,
};
use crate::switchboard::callback::{AgentCallbacks, AgentEndPayload, AgentStartPayload};
use crate::switchboard::classifier::{Classifier, ClassifierResult};
use crate::switchboard::message::{ContentBlock, ConversationMessage, ParticipantRole};
use crate::switchboard::registry::AgentRegistry;
use crate::switchboard::storage::{ChatStorage, InMemoryChatStorage};
use crate::switchboard::stream::{StreamEvent, StreamReceiver};

/// Agent id and name stamped on fabricated terminal responses.
pub const TERMINAL_AGENT_ID: &str = "no-agent-selected";

const DEFAULT_NO_SELECTED_AGENT_MESSAGE: &str = "I'm sorry, I couldn't determine which agent \
     should handle your request. Could you please rephrase it?";
const DEFAULT_ROUTING_ERROR_MESSAGE: &str =
    "An error occurred while processing your request. Please try again later.";

/// Marker block appended to a persisted assistant turn when the caller
/// cancelled mid-stream.
pub const STREAM_TRUNCATION_MARKER: &str = "[response truncated]";

/// Errors surfaced to the caller. Terminal classification and selection
/// outcomes are not errors; they come back as fabricated assistant
/// messages (see the module docs).
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid wiring: duplicate agent id, classifier unset, or a missing
    /// default agent when the configuration requires one.
    Configuration(String),
    /// The selected agent raised while processing the turn. Nothing was
    /// persisted.
    Dispatch {
        agent_id: String,
        source: Box<dyn Error + Send + Sync>,
    },
    /// The caller cancelled the turn. Distinct from failure.
    Canceled,
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorError::Configuration(msg) => write!(f, "configuration error: {}", msg),
            OrchestratorError::Dispatch { agent_id, source } => {
                write!(f, "agent '{}' failed: {}", agent_id, source)
            }
            OrchestratorError::Canceled => write!(f, "request canceled"),
        }
    }
}

impl Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            OrchestratorError::Dispatch { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Flat configuration record for the orchestrator. Build the record, hand
/// it to [`Orchestrator::new`]; there are no post-construction knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Mention per-agent history activity in operational logs.
    pub log_agent_chat: bool,
    /// Log the history handed to the classifier.
    pub log_classifier_chat: bool,
    /// Log the classifier's raw result before reconciliation.
    pub log_classifier_raw_output: bool,
    /// Log the reconciled selection and confidence.
    pub log_classifier_output: bool,
    /// Record wall-clock duration per stage.
    pub log_execution_times: bool,
    /// Extra classifier attempts after a hard failure.
    pub max_retries: u32,
    /// Fall through to the registry's default agent when classification
    /// yields no agent; otherwise the turn ends with a terminal message.
    pub use_default_agent_if_none_identified: bool,
    /// Caller-facing text for terminal classifier failure.
    pub classification_error_message: Option<String>,
    /// Caller-facing text when no agent was selected and no default is
    /// permitted.
    pub no_selected_agent_message: Option<String>,
    /// Fallback text for either terminal outcome when the specific
    /// message is unset.
    pub general_routing_error_message_to_user: Option<String>,
    /// Trimming bound in message pairs (one user + one assistant turn);
    /// the stored bound is twice this value. Must be at least 1.
    pub max_message_pairs_per_agent: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            log_agent_chat: false,
            log_classifier_chat: false,
            log_classifier_raw_output: false,
            log_classifier_output: false,
            log_execution_times: false,
            max_retries: 3,
            use_default_agent_if_none_identified: true,
            classification_error_message: None,
            no_selected_agent_message: None,
            general_routing_error_message_to_user: None,
            max_message_pairs_per_agent: 100,
        }
    }
}

/// Per-request extras: opaque hints forwarded to the agent and an
/// optional cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub additional_params: HashMap<String, String>,
    pub cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_params.insert(key.into(), value.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// The control plane in front of a heterogeneous set of agents.
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: AgentRegistry,
    classifier: Option<Arc<dyn Classifier>>,
    storage: Arc<dyn ChatStorage>,
}

impl Orchestrator {
    /// Create an orchestrator with the given configuration, an empty
    /// registry, no classifier, and in-memory storage.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            registry: AgentRegistry::new(),
            classifier: None,
            storage: Arc::new(InMemoryChatStorage::new()),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn ChatStorage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn set_classifier(&mut self, classifier: Arc<dyn Classifier>) {
        self.classifier = Some(classifier);
    }

    pub fn set_storage(&mut self, storage: Arc<dyn ChatStorage>) {
        self.storage = storage;
    }

    /// Register an agent. Duplicate ids are a configuration error.
    pub fn add_agent(&mut self, agent: Arc<dyn Agent>) -> Result<(), OrchestratorError> {
        self.registry
            .add_agent(agent)
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }

    /// Designate the fallback agent used when selection reconciliation
    /// opts in.
    pub fn set_default_agent(&mut self, agent_id: &str) -> Result<(), OrchestratorError> {
        self.registry
            .set_default(agent_id)
            .map_err(|e| OrchestratorError::Configuration(e.to_string()))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Classify `user_input`, dispatch it to the selected agent, persist
    /// the exchange, and return the reply envelope.
    pub async fn route_request(
        &self,
        user_input: &str,
        user_id: &str,
        session_id: &str,
        options: RequestOptions,
    ) -> Result<AgentResponse, OrchestratorError> {
        let request_id = Uuid::new_v4();
        log::debug!(
            "routing request {} for user '{}' session '{}'",
            request_id,
            user_id,
            session_id
        );

        let classifier = self.classifier.clone().ok_or_else(|| {
            OrchestratorError::Configuration("no classifier configured".to_string())
        })?;
        let cancellation = options.cancellation.clone().unwrap_or_default();

        // Context assembly. A failed read degrades to an empty history.
        let merged_history = match self.storage.fetch_all_chats(user_id, session_id).await {
            Ok(history) => history,
            Err(e) => {
                log::error!(
                    "failed to fetch merged history for '{}'/'{}': {}",
                    user_id,
                    session_id,
                    e
                );
                Vec::new()
            }
        };
        if self.config.log_classifier_chat {
            log::info!(
                "request {}: classifier sees {} history messages",
                request_id,
                merged_history.len()
            );
        }

        // Classification, retrying hard failures and empty selections.
        let started = Instant::now();
        let mut classification: Option<ClassifierResult> = None;
        for attempt in 0..=self.config.max_retries {
            let outcome = tokio::select! {
                _ = cancellation.cancelled() => return Err(OrchestratorError::Canceled),
                outcome = classifier.classify(user_input, &self.registry, &merged_history) => outcome,
            };
            match outcome {
                Ok(result) => {
                    if self.config.log_classifier_raw_output {
                        log::info!("request {}: classifier raw output {:?}", request_id, result);
                    }
                    let has_selection = result.selected_agent.is_some();
                    classification = Some(result);
                    if has_selection {
                        if attempt > 0 {
                            log::info!(
                                "request {}: classification succeeded after {} retries",
                                request_id,
                                attempt
                            );
                        }
                        break;
                    }
                    if attempt < self.config.max_retries {
                        log::debug!(
                            "request {}: no agent identified on attempt {}, retrying",
                            request_id,
                            attempt + 1
                        );
                    }
                }
                Err(e) => {
                    log::error!(
                        "request {}: classification attempt {} failed: {}",
                        request_id,
                        attempt + 1,
                        e
                    );
                }
            }
        }
        if self.config.log_execution_times {
            log::info!(
                "request {}: classification took {}ms",
                request_id,
                started.elapsed().as_millis()
            );
        }

        let classification = match classification {
            Some(result) => result,
            None => {
                // Every attempt failed hard.
                let text = self
                    .config
                    .classification_error_message
                    .clone()
                    .or_else(|| self.config.general_routing_error_message_to_user.clone())
                    .unwrap_or_else(|| DEFAULT_ROUTING_ERROR_MESSAGE.to_string());
                return Ok(self.terminal_response(
                    user_input,
                    user_id,
                    session_id,
                    &options.additional_params,
                    text,
                ));
            }
        };

        if self.config.log_classifier_output {
            match &classification.selected_agent {
                Some(agent) => log::info!(
                    "request {}: selected agent '{}' with confidence {:.2}",
                    request_id,
                    agent.id(),
                    classification.confidence
                ),
                None => log::info!(
                    "request {}: no agent selected (confidence {:.2})",
                    request_id,
                    classification.confidence
                ),
            }
        }

        // Selection reconciliation.
        let selected = match classification.selected_agent {
            Some(agent) => agent,
            None if self.config.use_default_agent_if_none_identified => {
                self.registry.default_agent().ok_or_else(|| {
                    OrchestratorError::Configuration(
                        "use_default_agent_if_none_identified is set but no default agent is registered"
                            .to_string(),
                    )
                })?
            }
            None => {
                let text = self
                    .config
                    .no_selected_agent_message
                    .clone()
                    .or_else(|| self.config.general_routing_error_message_to_user.clone())
                    .unwrap_or_else(|| DEFAULT_NO_SELECTED_AGENT_MESSAGE.to_string());
                return Ok(self.terminal_response(
                    user_input,
                    user_id,
                    session_id,
                    &options.additional_params,
                    text,
                ));
            }
        };

        self.dispatch_to_agent(
            selected,
            user_input,
            user_id,
            session_id,
            options.additional_params,
            cancellation,
        )
        .await
    }

    /// Dispatch directly with a caller-supplied selection, bypassing
    /// classification. Observationally equivalent to
    /// [`route_request`](Self::route_request) when the classifier would
    /// have made the same choice.
    pub async fn agent_process_request(
        &self,
        user_input: &str,
        user_id: &str,
        session_id: &str,
        classifier_result: ClassifierResult,
        options: RequestOptions,
    ) -> Result<AgentResponse, OrchestratorError> {
        let selected = classifier_result.selected_agent.ok_or_else(|| {
            OrchestratorError::Configuration(
                "classifier result carries no selected agent".to_string(),
            )
        })?;
        let cancellation = options.cancellation.clone().unwrap_or_default();
        self.dispatch_to_agent(
            selected,
            user_input,
            user_id,
            session_id,
            options.additional_params,
            cancellation,
        )
        .await
    }

    fn history_bound(&self) -> usize {
        2 * self.config.max_message_pairs_per_agent.max(1)
    }

    async fn dispatch_to_agent(
        &self,
        agent: Arc<dyn Agent>,
        user_input: &str,
        user_id: &str,
        session_id: &str,
        additional_params: HashMap<String, String>,
        cancellation: CancellationToken,
    ) -> Result<AgentResponse, OrchestratorError> {
        let bound = self.history_bound();
        let agent_history = match self
            .storage
            .fetch_chat(user_id, session_id, agent.id(), Some(bound))
            .await
        {
            Ok(history) => history,
            Err(e) => {
                log::error!("failed to fetch history for agent '{}': {}", agent.id(), e);
                Vec::new()
            }
        };
        if self.config.log_agent_chat || agent.log_agent_chat() {
            log::info!(
                "dispatching to agent '{}' with {} history messages",
                agent.id(),
                agent_history.len()
            );
        }

        let callbacks = agent.callbacks();
        let tracking = match &callbacks {
            Some(cb) => {
                cb.on_agent_start(&AgentStartPayload {
                    agent_id: agent.id().to_string(),
                    agent_name: agent.name().to_string(),
                    input: user_input.to_string(),
                    messages: agent_history.clone(),
                    additional_params: additional_params.clone(),
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                })
                .await
            }
            None => serde_json::Value::Null,
        };

        let started = Instant::now();
        let outcome = tokio::select! {
            _ = cancellation.cancelled() => return Err(OrchestratorError::Canceled),
            outcome = agent.process_request(
                user_input,
                user_id,
                session_id,
                &agent_history,
                &additional_params,
            ) => outcome,
        };
        let output = outcome.map_err(|source| {
            log::error!("agent '{}' failed: {}", agent.id(), source);
            OrchestratorError::Dispatch {
                agent_id: agent.id().to_string(),
                source,
            }
        })?;

        let metadata = RequestMetadata {
            agent_id: agent.id().to_string(),
            agent_name: agent.name().to_string(),
            user_input: user_input.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            additional_params,
        };

        match output {
            AgentOutput::Message(message) => {
                if self.config.log_execution_times {
                    log::info!(
                        "agent '{}' took {}ms",
                        agent.id(),
                        started.elapsed().as_millis()
                    );
                }
                if agent.save_chat() {
                    persist_exchange(
                        &self.storage,
                        user_id,
                        session_id,
                        agent.id(),
                        user_input,
                        &message,
                        Some(bound),
                    )
                    .await;
                }
                if let Some(cb) = &callbacks {
                    cb.on_agent_end(&AgentEndPayload {
                        agent_id: agent.id().to_string(),
                        agent_name: agent.name().to_string(),
                        response: message.clone(),
                        messages: agent_history,
                        tracking,
                    })
                    .await;
                }
                Ok(AgentResponse {
                    metadata,
                    output: ResponseOutput::Message(message),
                    streaming: false,
                })
            }
            AgentOutput::Stream(events) => {
                let stream = self.pump_stream(StreamContext {
                    agent_id: agent.id().to_string(),
                    agent_name: agent.name().to_string(),
                    save_chat: agent.save_chat(),
                    callbacks,
                    tracking,
                    agent_history,
                    user_input: user_input.to_string(),
                    user_id: user_id.to_string(),
                    session_id: session_id.to_string(),
                    bound,
                    started,
                    cancellation,
                    events,
                });
                Ok(AgentResponse {
                    metadata,
                    output: ResponseOutput::Stream(stream),
                    streaming: true,
                })
            }
        }
    }

    /// Consume a streaming agent's events in a background task: forward
    /// tokens to the caller, fire callbacks, and persist the assembled
    /// assistant turn once the stream finishes.
    fn pump_stream(&self, ctx: StreamContext) -> ContentBlockStream {
        let (tx, rx) =
            mpsc::channel::<Result<ContentBlock, Box<dyn Error + Send + Sync>>>(32);
        let storage = Arc::clone(&self.storage);
        let log_execution_times = self.config.log_execution_times;

        tokio::spawn(async move {
            let StreamContext {
                agent_id,
                agent_name,
                save_chat,
                callbacks,
                tracking,
                agent_history,
                user_input,
                user_id,
                session_id,
                bound,
                started,
                cancellation,
                mut events,
            } = ctx;

            let mut collected = String::new();
            let mut final_message: Option<ConversationMessage> = None;
            let mut outcome = StreamOutcome::Completed;

            loop {
                tokio::select! {
                    _ = cancellation.cancelled() => {
                        outcome = StreamOutcome::Canceled;
                        break;
                    }
                    event = events.recv() => match event {
                        None => break,
                        Some(StreamEvent::Start { agent_id }) => {
                            log::debug!("agent '{}' started streaming", agent_id);
                        }
                        Some(StreamEvent::Token { text }) => {
                            collected.push_str(&text);
                            if let Some(cb) = &callbacks {
                                cb.on_llm_new_token(&text).await;
                            }
                            // A dropped caller stream is not an error; keep
                            // draining so the exchange is still persisted.
                            let _ = tx.send(Ok(ContentBlock::text(text))).await;
                        }
                        Some(StreamEvent::End { final_message: message }) => {
                            final_message = Some(message);
                            break;
                        }
                        Some(StreamEvent::Error { message }) => {
                            outcome = StreamOutcome::Failed(message);
                            break;
                        }
                    }
                }
            }

            match outcome {
                StreamOutcome::Completed => {
                    let assistant = match final_message {
                        Some(message)
                            if message.first_text().map_or(false, |t| !t.is_empty()) =>
                        {
                            message
                        }
                        _ if !collected.is_empty() => {
                            ConversationMessage::assistant(collected.clone())
                        }
                        _ => {
                            // Zero chunks: an empty assistant turn is not
                            // meaningful, so nothing is persisted.
                            log::debug!("agent '{}' streamed no content", agent_id);
                            return;
                        }
                    };
                    if log_execution_times {
                        log::info!(
                            "agent '{}' stream completed in {}ms",
                            agent_id,
                            started.elapsed().as_millis()
                        );
                    }
                    if save_chat {
                        persist_exchange(
                            &storage,
                            &user_id,
                            &session_id,
                            &agent_id,
                            &user_input,
                            &assistant,
                            Some(bound),
                        )
                        .await;
                    }
                    if let Some(cb) = &callbacks {
                        cb.on_agent_end(&AgentEndPayload {
                            agent_id,
                            agent_name,
                            response: assistant,
                            messages: agent_history,
                            tracking,
                        })
                        .await;
                    }
                }
                StreamOutcome::Failed(message) => {
                    log::error!("agent '{}' stream failed: {}", agent_id, message);
                    let mut content = Vec::new();
                    if !collected.is_empty() {
                        content.push(ContentBlock::text(collected.clone()));
                    }
                    content.push(ContentBlock::text(format!(
                        "[stream interrupted: {}]",
                        message
                    )));
                    let assistant =
                        ConversationMessage::new(ParticipantRole::Assistant, content);
                    if save_chat {
                        persist_exchange(
                            &storage,
                            &user_id,
                            &session_id,
                            &agent_id,
                            &user_input,
                            &assistant,
                            Some(bound),
                        )
                        .await;
                    }
                    let _ = tx
                        .send(Err(Box::<dyn Error + Send + Sync>::from(message)))
                        .await;
                }
                StreamOutcome::Canceled => {
                    // Bytes already forwarded count as delivered; the
                    // persisted turn records the truncation.
                    log::warn!("stream for agent '{}' canceled by caller", agent_id);
                    let mut content = Vec::new();
                    if !collected.is_empty() {
                        content.push(ContentBlock::text(collected.clone()));
                    }
                    content.push(ContentBlock::text(STREAM_TRUNCATION_MARKER));
                    let assistant =
                        ConversationMessage::new(ParticipantRole::Assistant, content);
                    if save_chat {
                        persist_exchange(
                            &storage,
                            &user_id,
                            &session_id,
                            &agent_id,
                            &user_input,
                            &assistant,
                            Some(bound),
                        )
                        .await;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    fn terminal_response(
        &self,
        user_input: &str,
        user_id: &str,
        session_id: &str,
        additional_params: &HashMap<String, String>,
        text: String,
    ) -> AgentResponse {
        AgentResponse {
            metadata: RequestMetadata {
                agent_id: TERMINAL_AGENT_ID.to_string(),
                agent_name: TERMINAL_AGENT_ID.to_string(),
                user_input: user_input.to_string(),
                user_id: user_id.to_string(),
                session_id: session_id.to_string(),
                additional_params: additional_params.clone(),
            },
            output: ResponseOutput::Message(ConversationMessage::assistant(text)),
            streaming: false,
        }
    }
}

struct StreamContext {
    agent_id: String,
    agent_name: String,
    save_chat: bool,
    callbacks: Option<Arc<dyn AgentCallbacks>>,
    tracking: serde_json::Value,
    agent_history: Vec<ConversationMessage>,
    user_input: String,
    user_id: String,
    session_id: String,
    bound: usize,
    started: Instant,
    cancellation: CancellationToken,
    events: StreamReceiver,
}

enum StreamOutcome {
    Completed,
    Failed(String),
    Canceled,
}

/// Write the user turn then the assistant turn under the agent's key.
/// Failures are logged and swallowed: the reply has already been produced
/// and still reaches the caller.
async fn persist_exchange(
    storage: &Arc<dyn ChatStorage>,
    user_id: &str,
    session_id: &str,
    agent_id: &str,
    user_input: &str,
    assistant: &ConversationMessage,
    max_history_size: Option<usize>,
) {
    if let Err(e) = storage
        .save_message(
            user_id,
            session_id,
            agent_id,
            ConversationMessage::user(user_input),
            max_history_size,
        )
        .await
    {
        log::error!("failed to save user turn for agent '{}': {}", agent_id, e);
    }
    if let Err(e) = storage
        .save_message(user_id, session_id, agent_id, assistant.clone(), max_history_size)
        .await
    {
        log::error!(
            "failed to save assistant turn for agent '{}': {}",
            agent_id,
            e
        );
    }
}
