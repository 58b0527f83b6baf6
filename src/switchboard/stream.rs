//! Streaming envelope between agents and the orchestrator.
//!
//! A streaming agent produces typed [`StreamEvent`]s into an
//! [`mpsc::Sender`]; the orchestrator is the single consumer. It forwards
//! tokens to the caller, accumulates the assistant turn for persistence,
//! and turns `Error` events into stream failures.

use tokio::sync::mpsc;

use crate::switchboard::message::ConversationMessage;

/// Default channel capacity for agent token streams.
pub const STREAM_CHANNEL_CAPACITY: usize = 32;

/// Events emitted by a streaming agent, in order: one optional `Start`,
/// any number of `Token`s, then exactly one of `End` or `Error`. Dropping
/// the sender without a terminal event is treated as a normal end of
/// stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// The agent has started generating.
    Start { agent_id: String },
    /// An incremental piece of the assistant's reply.
    Token { text: String },
    /// Generation finished; carries the agent's assembled final turn.
    End { final_message: ConversationMessage },
    /// Generation failed mid-way.
    Error { message: String },
}

/// Producer half handed to a streaming agent.
pub type StreamSender = mpsc::Sender<StreamEvent>;

/// Consumer half returned from a streaming agent.
pub type StreamReceiver = mpsc::Receiver<StreamEvent>;

/// Create a channel sized for token streaming.
pub fn stream_channel() -> (StreamSender, StreamReceiver) {
    mpsc::channel(STREAM_CHANNEL_CAPACITY)
}
